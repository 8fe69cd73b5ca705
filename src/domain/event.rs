use serde::{Deserialize, Serialize};

use super::SessionMode;

/// Event delivered to the client attached to a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Session is registered and its backend is running
    Created { pid: u32, mode: SessionMode },
    /// Raw output chunk, exactly as produced by the backend
    Data { chunk: String },
    /// Backend terminated
    Exit {
        exit_code: Option<u32>,
        signal: Option<String>,
    },
    /// Session could not be created
    Error { message: String },
}

impl SessionEvent {
    pub fn data(chunk: impl Into<String>) -> Self {
        Self::Data {
            chunk: chunk.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// The output chunk, for `Data` events
    pub fn as_data(&self) -> Option<&str> {
        match self {
            Self::Data { chunk } => Some(chunk),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_is_tagged() {
        let json = serde_json::to_value(SessionEvent::Created {
            pid: 42,
            mode: SessionMode::Demo,
        })
        .unwrap();
        assert_eq!(json["type"], "created");
        assert_eq!(json["mode"], "demo");

        let json = serde_json::to_value(SessionEvent::data("hi")).unwrap();
        assert_eq!(json["type"], "data");
        assert_eq!(json["chunk"], "hi");
    }
}
