use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tether_core::ChannelKey;

/// On-disk form of the registry.
///
/// ```json
/// { "sessions": { "discord:1234": "ses_abc", "telegram:-100": "ses_def" } }
/// ```
///
/// Keys are [`ChannelKey::format`] strings. A `BTreeMap` keeps the file
/// ordering stable across rewrites.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryFile {
    #[serde(default)]
    pub sessions: BTreeMap<String, String>,
}

/// One channel → session association.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelSession {
    #[serde(flatten)]
    pub channel: ChannelKey,
    pub session_id: String,
}
