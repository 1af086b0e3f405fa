//! Routes chat messages to backend sessions and delivers the replies.

use std::sync::Arc;

use tether_core::config::ChannelsConfig;
use tether_engine::{ConversationEngine, FragmentAssembler, ResponseFragment};
use tether_sessions::SessionRegistry;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::channel::Channel;
use crate::chunk::split_chunks;
use crate::commands::{Command, HELP};
use crate::error::ChannelError;
use crate::render::{error_reply, render_reply};
use crate::types::{InboundMessage, OutboundMessage};

/// `/sessions` shows at most this many entries.
const SESSION_LIST_LIMIT: usize = 10;

/// Rendered answer to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    /// Session the message was routed to, when one was resolved.
    pub session_id: Option<String>,
}

impl Reply {
    fn plain(text: impl Into<String>, session_id: Option<String>) -> Self {
        Self {
            text: text.into(),
            session_id,
        }
    }
}

pub struct MessageRouter {
    engine: Arc<dyn ConversationEngine>,
    registry: Arc<SessionRegistry>,
    settings: ChannelsConfig,
    /// Held while a channel's first session is created.
    creating: tokio::sync::Mutex<()>,
}

impl MessageRouter {
    pub fn new(
        engine: Arc<dyn ConversationEngine>,
        registry: Arc<SessionRegistry>,
        settings: ChannelsConfig,
    ) -> Self {
        Self {
            engine,
            registry,
            settings,
            creating: tokio::sync::Mutex::new(()),
        }
    }

    pub fn engine(&self) -> &Arc<dyn ConversationEngine> {
        &self.engine
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Answer `inbound` and deliver the reply to `channel` in chunks.
    #[instrument(skip_all, fields(channel = %inbound.key()))]
    pub async fn handle(
        &self,
        inbound: &InboundMessage,
        channel: &dyn Channel,
    ) -> Result<(), ChannelError> {
        let reply = self.respond(inbound).await;
        for chunk in split_chunks(&reply.text, self.settings.max_reply_chars) {
            channel
                .send(&OutboundMessage {
                    channel: channel.name().to_string(),
                    recipient_id: inbound.channel_id.clone(),
                    content: chunk,
                })
                .await?;
        }
        Ok(())
    }

    /// Answer `inbound` without delivering it. Failures become an
    /// error reply rather than an `Err`.
    pub async fn respond(&self, inbound: &InboundMessage) -> Reply {
        if let Some(cmd) = Command::parse(&inbound.content) {
            debug!(command = ?cmd, "session command");
            return self.run_command(cmd, inbound).await;
        }

        let session_id = match self.resolve_session(inbound).await {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "could not resolve session");
                return Reply::plain(error_reply(&e.to_string()), None);
            }
        };

        let assembly = self.collect(self.engine.send(&session_id, &inbound.content)).await;
        Reply::plain(render_reply(&assembly, &self.settings), Some(session_id))
    }

    /// Resolve the session for `inbound` and start a turn, returning the raw
    /// fragment stream. Commands are not interpreted here.
    pub async fn open_stream(
        &self,
        inbound: &InboundMessage,
    ) -> Result<(String, mpsc::Receiver<ResponseFragment>), ChannelError> {
        let session_id = self.resolve_session(inbound).await?;
        let rx = self.engine.send(&session_id, &inbound.content);
        Ok((session_id, rx))
    }

    /// Mapped session for the channel, creating and recording one on first use.
    pub async fn resolve_session(&self, inbound: &InboundMessage) -> Result<String, ChannelError> {
        if let Some(id) = self.registry.get(&inbound.provider, &inbound.channel_id) {
            return Ok(id);
        }
        let _creating = self.creating.lock().await;
        // a concurrent message may have created it while we waited
        if let Some(id) = self.registry.get(&inbound.provider, &inbound.channel_id) {
            return Ok(id);
        }
        let info = self.engine.create_session(None).await?;
        info!(session = %info.id, channel = %inbound.key(), "new channel session");
        self.record(inbound, &info.id);
        Ok(info.id)
    }

    async fn collect(&self, mut rx: mpsc::Receiver<ResponseFragment>) -> FragmentAssembler {
        let mut assembly = FragmentAssembler::new();
        while let Some(frag) = rx.recv().await {
            assembly.apply(frag);
            if assembly.is_done() {
                break;
            }
        }
        if !assembly.is_done() {
            warn!("fragment stream closed before completion");
            assembly.apply(ResponseFragment::failed("", "response ended unexpectedly"));
        }
        assembly
    }

    /// Persist failures are logged; the in-memory mapping still applies.
    fn record(&self, inbound: &InboundMessage, session_id: &str) {
        if let Err(e) = self
            .registry
            .set(&inbound.provider, &inbound.channel_id, session_id)
        {
            warn!(error = %e, session = %session_id, "session mapping not persisted");
        }
    }

    async fn run_command(&self, cmd: Command, inbound: &InboundMessage) -> Reply {
        let current = self.registry.get(&inbound.provider, &inbound.channel_id);
        match cmd {
            Command::Help => Reply::plain(HELP, current),

            Command::Session => match current {
                Some(id) => Reply::plain(format!("Current session: `{id}`"), Some(id)),
                None => Reply::plain(
                    "No session yet. Send a message or use `/new` to start one.",
                    None,
                ),
            },

            Command::Status => {
                let mode = if self.engine.is_connected() {
                    "connected (streaming)"
                } else {
                    "disconnected (polling)"
                };
                let session = current.as_deref().unwrap_or("none");
                Reply::plain(
                    format!("Backend: {mode}\nSession: `{session}`"),
                    current,
                )
            }

            Command::New { title } => match self.engine.create_session(title.as_deref()).await {
                Ok(info) => {
                    self.record(inbound, &info.id);
                    info!(session = %info.id, channel = %inbound.key(), "session replaced");
                    let text = if info.title.is_empty() {
                        format!("Started new session `{}`", info.id)
                    } else {
                        format!("Started new session `{}` ({})", info.id, info.title)
                    };
                    Reply::plain(text, Some(info.id))
                }
                Err(e) => Reply::plain(error_reply(&e.to_string()), current),
            },

            Command::Switch { session_id: None } => {
                Reply::plain("Usage: `/switch <sessionID>`", current)
            }
            Command::Switch {
                session_id: Some(target),
            } => match self.engine.get_session(&target).await {
                Ok(info) => {
                    self.record(inbound, &info.id);
                    info!(session = %info.id, channel = %inbound.key(), "session switched");
                    Reply::plain(format!("Switched to session `{}`", info.id), Some(info.id))
                }
                Err(e) if e.is_not_found() => {
                    Reply::plain(format!("Session `{target}` not found"), current)
                }
                Err(e) => Reply::plain(error_reply(&e.to_string()), current),
            },

            Command::Sessions => match self.engine.list_sessions().await {
                Ok(mut sessions) => {
                    if sessions.is_empty() {
                        return Reply::plain("No sessions.", current);
                    }
                    sessions.sort_by(|a, b| b.time.updated.cmp(&a.time.updated));
                    let lines: Vec<String> = sessions
                        .iter()
                        .take(SESSION_LIST_LIMIT)
                        .map(|s| {
                            let marker = if current.as_deref() == Some(s.id.as_str()) {
                                " ← active"
                            } else {
                                ""
                            };
                            if s.title.is_empty() {
                                format!("- `{}`{marker}", s.id)
                            } else {
                                format!("- `{}` {}{marker}", s.id, s.title)
                            }
                        })
                        .collect();
                    Reply::plain(lines.join("\n"), current)
                }
                Err(e) => Reply::plain(error_reply(&e.to_string()), current),
            },

            Command::Abort => match current {
                None => Reply::plain("No active session.", None),
                Some(id) => match self.engine.abort(&id).await {
                    Ok(()) => Reply::plain("Aborted.", Some(id)),
                    Err(e) => Reply::plain(error_reply(&e.to_string()), Some(id)),
                },
            },
        }
    }
}
