//! Session commands intercepted before a message reaches the backend.
//!
//! Unknown `/words` are not commands: the backend has its own slash
//! commands and receives them untouched.

pub const HELP: &str = "**Commands**\n\
    - `/new [title]` — start a new session for this channel\n\
    - `/switch <sessionID>` — attach this channel to an existing session\n\
    - `/session` — show the current session\n\
    - `/sessions` — list recent sessions\n\
    - `/abort` — stop the response in progress\n\
    - `/status` — show backend connection state\n\
    - `/help` — show this help";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    New { title: Option<String> },
    /// `None` when the id argument is missing.
    Switch { session_id: Option<String> },
    Session,
    Sessions,
    Abort,
    Status,
    Help,
}

impl Command {
    /// Parse a routed message. `None` means forward it to the backend.
    pub fn parse(message: &str) -> Option<Self> {
        let trimmed = message.trim();
        let body = trimmed.strip_prefix('/')?;
        let (name, arg) = match body.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (body, ""),
        };
        let arg = (!arg.is_empty()).then(|| arg.to_string());

        let cmd = match name.to_ascii_lowercase().as_str() {
            "new" => Self::New { title: arg },
            "switch" => Self::Switch {
                session_id: arg.and_then(|a| a.split_whitespace().next().map(str::to_string)),
            },
            "session" => Self::Session,
            "sessions" => Self::Sessions,
            "abort" => Self::Abort,
            "status" => Self::Status,
            "help" => Self::Help,
            _ => return None,
        };
        Some(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_not_a_command() {
        assert_eq!(Command::parse("hello /new"), None);
        assert_eq!(Command::parse(""), None);
    }

    #[test]
    fn unknown_slash_goes_to_backend() {
        assert_eq!(Command::parse("/compact"), None);
    }

    #[test]
    fn new_takes_optional_title() {
        assert_eq!(Command::parse("/new"), Some(Command::New { title: None }));
        assert_eq!(
            Command::parse("  /NEW  bug triage "),
            Some(Command::New {
                title: Some("bug triage".into())
            })
        );
    }

    #[test]
    fn switch_takes_first_argument() {
        assert_eq!(
            Command::parse("/switch ses_123 extra"),
            Some(Command::Switch {
                session_id: Some("ses_123".into())
            })
        );
        assert_eq!(
            Command::parse("/switch"),
            Some(Command::Switch { session_id: None })
        );
    }

    #[test]
    fn bare_commands() {
        assert_eq!(Command::parse("/session"), Some(Command::Session));
        assert_eq!(Command::parse("/sessions"), Some(Command::Sessions));
        assert_eq!(Command::parse("/abort"), Some(Command::Abort));
        assert_eq!(Command::parse("/status"), Some(Command::Status));
        assert_eq!(Command::parse("/help"), Some(Command::Help));
    }
}
