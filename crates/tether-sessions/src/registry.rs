use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use tether_core::ChannelKey;
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::store;
use crate::types::{ChannelSession, RegistryFile};

/// Durable map from a chat channel to its backend conversation session.
///
/// Every mutation rewrites the whole file while the write lock is held, so
/// the file on disk always matches the last completed `set`.
pub struct SessionRegistry {
    path: PathBuf,
    map: RwLock<HashMap<String, String>>,
}

impl SessionRegistry {
    /// Empty registry backed by `path`. Call [`load`](Self::load) to read it.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            map: RwLock::new(HashMap::new()),
        }
    }

    /// `new` followed by `load`.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let registry = Self::new(path);
        registry.load();
        registry
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the in-memory map with the file's contents.
    ///
    /// A missing or unreadable file leaves the registry empty; startup never
    /// fails on it. Returns the number of mappings loaded.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn load(&self) -> usize {
        let sessions = match store::read(&self.path) {
            Ok(Some(file)) => file.sessions,
            Ok(None) => {
                debug!("no registry file, starting empty");
                Default::default()
            }
            Err(e) => {
                warn!(error = %e, "registry file unreadable, starting empty");
                Default::default()
            }
        };
        let loaded: HashMap<String, String> = sessions.into_iter().collect();
        let count = loaded.len();
        *self.map.write().unwrap_or_else(PoisonError::into_inner) = loaded;
        info!(count, "channel sessions loaded");
        count
    }

    /// Session mapped to `(provider, channel_id)`, if any.
    pub fn get(&self, provider: &str, channel_id: &str) -> Option<String> {
        let key = ChannelKey::new(provider, channel_id).format();
        self.map
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
    }

    /// Map `(provider, channel_id)` to `session_id`, overwriting any previous
    /// mapping, and persist the full map.
    ///
    /// The in-memory update stands even when persisting fails; the error is
    /// returned so the caller can report it.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn set(&self, provider: &str, channel_id: &str, session_id: &str) -> Result<()> {
        let key = ChannelKey::new(provider, channel_id).format();
        let mut map = self.map.write().unwrap_or_else(PoisonError::into_inner);
        let previous = map.insert(key.clone(), session_id.to_string());

        let file = RegistryFile {
            sessions: map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        };
        if let Err(e) = store::write_atomic(&self.path, &file) {
            warn!(error = %e, channel = %key, "failed to persist channel sessions");
            return Err(e);
        }
        debug!(channel = %key, previous = ?previous, "channel session mapped");
        Ok(())
    }

    /// All mappings, ordered by channel key.
    pub fn entries(&self) -> Vec<ChannelSession> {
        let map = self.map.read().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<ChannelSession> = map
            .iter()
            .filter_map(|(key, session_id)| {
                Some(ChannelSession {
                    channel: ChannelKey::parse(key)?,
                    session_id: session_id.clone(),
                })
            })
            .collect();
        entries.sort_by_key(|e| e.channel.format());
        entries
    }

    pub fn len(&self) -> usize {
        self.map
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
