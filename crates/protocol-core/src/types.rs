use std::fmt;

use chrono::{DateTime, Utc};

/// Opaque command correlation identifier, generated by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandId(String);

impl CommandId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CommandId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CommandId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Identifier of a named, ordered event stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamId(String);

impl StreamId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for StreamId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for StreamId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// A point in a stream: which stream, and a 0-based event number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub stream_id: StreamId,
    pub event_number: u64,
}

/// The outcome of a previously issued command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResult {
    Success(Position),
    Failure(String),
}

/// A command targeting an aggregate; expects exactly one [`CommandResult`].
#[derive(Debug, Clone)]
pub struct Command {
    pub id: CommandId,
    pub target: StreamId,
    pub name: String,
    pub payload: serde_json::Value,
}

/// An immutable fact produced by the server and delivered through a
/// subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub position: Position,
    pub event_type: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Raised when a [`crate::ClientProtocol::send`] has not received a
/// matching `command_result` within [`crate::COMMAND_DEADLINE`]. Carries
/// the command id and the bound in milliseconds, per spec.md §6/§8.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("command {command_id} timed out after {timeout_ms}ms")]
pub struct CommandTimeoutError {
    pub command_id: CommandId,
    pub timeout_ms: u64,
}

/// Wire/core conversions, kept next to the types they translate so the
/// mapping between "what's on the wire" and "what the caller sees" is
/// defined in exactly one place.
pub(crate) mod wire {
    use super::*;
    use protocol_wire as wire;

    pub fn position_to_wire(position: &Position) -> wire::Position {
        wire::Position {
            stream_id: position.stream_id.as_str().to_owned(),
            event_number: position.event_number,
        }
    }

    pub fn position_from_wire(position: wire::Position) -> Position {
        Position {
            stream_id: StreamId::from(position.stream_id),
            event_number: position.event_number,
        }
    }

    pub fn command_to_wire(command: &Command) -> wire::CommandEnvelope {
        wire::CommandEnvelope {
            id: command.id.as_str().to_owned(),
            target: command.target.as_str().to_owned(),
            name: command.name.clone(),
            payload: command.payload.clone(),
        }
    }

    pub fn result_from_wire(envelope: wire::CommandResultEnvelope) -> CommandResult {
        if envelope.success {
            // Validated by protocol_wire::decode: success implies position is present.
            let position = envelope.position.expect("decode validates success implies position");
            CommandResult::Success(position_from_wire(position))
        } else {
            CommandResult::Failure(envelope.error.unwrap_or_default())
        }
    }

    pub fn result_to_wire(command_id: &CommandId, result: &CommandResult) -> wire::CommandResultEnvelope {
        match result {
            CommandResult::Success(position) => wire::CommandResultEnvelope {
                command_id: command_id.as_str().to_owned(),
                success: true,
                position: Some(position_to_wire(position)),
                error: None,
            },
            CommandResult::Failure(error) => wire::CommandResultEnvelope {
                command_id: command_id.as_str().to_owned(),
                success: false,
                position: None,
                error: Some(error.clone()),
            },
        }
    }

    pub fn event_from_wire(envelope: wire::EventEnvelope) -> Event {
        Event {
            position: position_from_wire(envelope.position),
            event_type: envelope.event_type,
            data: envelope.data,
            timestamp: envelope.timestamp,
        }
    }

    pub fn event_to_wire(stream_id: &StreamId, event: &Event) -> wire::EventEnvelope {
        wire::EventEnvelope {
            stream_id: stream_id.as_str().to_owned(),
            position: position_to_wire(&event.position),
            event_type: event.event_type.clone(),
            data: event.data.clone(),
            timestamp: event.timestamp,
        }
    }
}
