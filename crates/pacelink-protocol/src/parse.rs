//! Parsing companion command JSON into domain commands.

use pacelink_core::{ActivityKind, Command, DomainError};
use serde::Deserialize;
use thiserror::Error;

/// Raw command JSON structure from the companion UI.
///
/// Flat and lenient: only `command` is required; `activity_kind` applies to
/// start commands and defaults to running when absent, matching what the
/// companion app has historically sent.
#[derive(Debug, Clone, Deserialize)]
pub struct RawCommand {
    pub command: String,
    #[serde(default)]
    pub activity_kind: Option<String>,
}

/// Errors from turning raw command JSON into a domain command.
///
/// Parse errors are reported back over the link; they never affect the
/// running session.
#[derive(Error, Debug, Clone)]
pub enum ParseError {
    #[error("Malformed command payload: {0}")]
    Malformed(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Unknown activity kind: {0}")]
    UnknownActivityKind(String),
}

/// Parse failures are invalid arguments in the domain taxonomy: rejected
/// at the ingress boundary, session untouched.
impl From<ParseError> for DomainError {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::Malformed(reason) => {
                DomainError::invalid_argument("command", format!("malformed payload: {reason}"))
            }
            ParseError::UnknownCommand(name) => {
                DomainError::invalid_argument("command", format!("unknown command: {name}"))
            }
            ParseError::UnknownActivityKind(label) => DomainError::invalid_argument(
                "activity_kind",
                format!("unknown activity kind: {label}"),
            ),
        }
    }
}

/// Parses a raw command JSON value into a domain [`Command`].
pub fn parse_command(data: &serde_json::Value) -> Result<Command, ParseError> {
    let raw: RawCommand = serde_json::from_value(data.clone())
        .map_err(|e| ParseError::Malformed(e.to_string()))?;
    raw.to_command()
}

impl RawCommand {
    /// Converts the raw structure to a domain command.
    pub fn to_command(&self) -> Result<Command, ParseError> {
        match self.command.as_str() {
            "start" => {
                let activity_kind = match self.activity_kind.as_deref() {
                    Some(label) => ActivityKind::from_label(label)
                        .ok_or_else(|| ParseError::UnknownActivityKind(label.to_string()))?,
                    None => ActivityKind::Running,
                };
                Ok(Command::Start { activity_kind })
            }
            "stop" => Ok(Command::Stop),
            other => Err(ParseError::UnknownCommand(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start_command() {
        let data = serde_json::json!({"command": "start", "activity_kind": "cycling"});
        let command = parse_command(&data).unwrap();
        assert_eq!(
            command,
            Command::Start {
                activity_kind: ActivityKind::Cycling
            }
        );
    }

    #[test]
    fn test_parse_start_defaults_to_running() {
        let data = serde_json::json!({"command": "start"});
        let command = parse_command(&data).unwrap();
        assert_eq!(
            command,
            Command::Start {
                activity_kind: ActivityKind::Running
            }
        );
    }

    #[test]
    fn test_parse_start_strength_label() {
        let data = serde_json::json!({"command": "start", "activity_kind": "strength"});
        let command = parse_command(&data).unwrap();
        assert_eq!(
            command,
            Command::Start {
                activity_kind: ActivityKind::StrengthTraining
            }
        );
    }

    #[test]
    fn test_parse_stop_command() {
        let data = serde_json::json!({"command": "stop"});
        assert_eq!(parse_command(&data).unwrap(), Command::Stop);
    }

    #[test]
    fn test_parse_unknown_command() {
        let data = serde_json::json!({"command": "pause"});
        assert!(matches!(
            parse_command(&data),
            Err(ParseError::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_parse_unknown_activity_kind() {
        let data = serde_json::json!({"command": "start", "activity_kind": "swimming"});
        assert!(matches!(
            parse_command(&data),
            Err(ParseError::UnknownActivityKind(_))
        ));
    }

    #[test]
    fn test_parse_missing_command_field() {
        let data = serde_json::json!({"activity_kind": "running"});
        assert!(matches!(parse_command(&data), Err(ParseError::Malformed(_))));
    }

    #[test]
    fn test_parse_error_maps_to_invalid_argument() {
        let err: DomainError = ParseError::UnknownActivityKind("swimming".to_string()).into();
        match err {
            DomainError::InvalidArgument { ref field, .. } => assert_eq!(field, "activity_kind"),
        }
        assert!(err.to_string().contains("swimming"));

        let err: DomainError = ParseError::UnknownCommand("pause".to_string()).into();
        match err {
            DomainError::InvalidArgument { ref field, .. } => assert_eq!(field, "command"),
        }
    }
}
