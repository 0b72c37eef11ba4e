//! Line commands read from stdin.

use realtime_wire::ConversationId;
use thiserror::Error;

pub const HELP: &str = "commands: /send <conversation> <text>, /typing <conversation>, /refresh, /logout, /quit";

/// A parsed input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Post a message
    Send {
        conversation: ConversationId,
        text: String,
    },
    /// Signal typing
    Typing { conversation: ConversationId },
    /// Rotate tokens
    Refresh,
    /// End the session and forget stored tokens
    Logout,
    /// Exit, keeping stored tokens
    Quit,
    /// Print usage
    Help,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command {0:?}; {}", HELP)]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
}

/// Parse one line; blank lines yield `None`
pub fn parse_command(line: &str) -> Result<Option<Command>, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word {
        "/send" => {
            let (conversation, text) = rest
                .split_once(char::is_whitespace)
                .map(|(c, t)| (c, t.trim()))
                .filter(|(_, t)| !t.is_empty())
                .ok_or(CommandError::Usage("/send <conversation> <text>"))?;
            Command::Send {
                conversation: conversation.into(),
                text: text.to_string(),
            }
        }
        "/typing" => {
            if rest.is_empty() || rest.contains(char::is_whitespace) {
                return Err(CommandError::Usage("/typing <conversation>"));
            }
            Command::Typing {
                conversation: rest.into(),
            }
        }
        "/refresh" => Command::Refresh,
        "/logout" => Command::Logout,
        "/quit" | "/exit" => Command::Quit,
        "/help" => Command::Help,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_keeps_spaces_in_text() {
        assert_eq!(
            parse_command("/send m-1 hello  there ").unwrap(),
            Some(Command::Send {
                conversation: "m-1".into(),
                text: "hello  there".to_string(),
            })
        );
    }

    #[test]
    fn test_send_requires_text() {
        assert_eq!(
            parse_command("/send m-1").unwrap_err(),
            CommandError::Usage("/send <conversation> <text>")
        );
        assert!(parse_command("/send m-1    ").is_err());
    }

    #[test]
    fn test_typing_takes_one_conversation() {
        assert_eq!(
            parse_command("/typing 42").unwrap(),
            Some(Command::Typing {
                conversation: "42".into()
            })
        );
        assert!(parse_command("/typing").is_err());
        assert!(parse_command("/typing a b").is_err());
    }

    #[test]
    fn test_simple_commands_and_blank_lines() {
        assert_eq!(parse_command("  ").unwrap(), None);
        assert_eq!(parse_command("/refresh").unwrap(), Some(Command::Refresh));
        assert_eq!(parse_command("/logout").unwrap(), Some(Command::Logout));
        assert_eq!(parse_command("/quit").unwrap(), Some(Command::Quit));
        assert_eq!(parse_command("/exit").unwrap(), Some(Command::Quit));
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(
            parse_command("hello").unwrap_err(),
            CommandError::Unknown("hello".to_string())
        );
    }
}
