// protocol-wire: envelope types and codec for the correlated command/event
// wire protocol.
//
// Every message on the wire is a single JSON object discriminated on
// `type`.  The five variants below are the whole schema; anything else
// fails to decode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A point in a stream: the stream it belongs to and a 0-based event number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    #[serde(rename = "streamId")]
    pub stream_id: String,
    #[serde(rename = "eventNumber")]
    pub event_number: u64,
}

/// Client → server: issue a command against a target aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub id: String,
    pub target: String,
    pub name: String,
    pub payload: serde_json::Value,
}

/// Client → server: subscribe to a stream by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeEnvelope {
    #[serde(rename = "streamId")]
    pub stream_id: String,
}

/// Server → client: the outcome of a previously issued command.
///
/// `position` is present iff `success`; `error` is present iff `!success`.
/// That cross-field constraint isn't expressible in serde's tagging alone,
/// so [`decode`] validates it explicitly after deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResultEnvelope {
    #[serde(rename = "commandId")]
    pub command_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Server → client: one event delivered on a subscribed stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "streamId")]
    pub stream_id: String,
    pub position: Position,
    #[serde(rename = "eventType")]
    pub event_type: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// The five wire envelope variants, tagged on `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    #[serde(rename = "command")]
    Command(CommandEnvelope),
    #[serde(rename = "subscribe")]
    Subscribe(SubscribeEnvelope),
    #[serde(rename = "command_result")]
    CommandResult(CommandResultEnvelope),
    #[serde(rename = "event")]
    Event(EventEnvelope),
}

/// Decode failure: malformed JSON, unknown `type`, a missing/wrong-typed
/// required field, or a `command_result` whose `success`/`position`/`error`
/// combination is inconsistent.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid envelope: {message}")]
pub struct ProtocolValidationError {
    pub message: String,
    pub raw: String,
}

/// Serialize an envelope to its wire text form.
///
/// Total: every `Envelope` value we can construct is representable as
/// JSON, so this never fails.
pub fn encode(envelope: &Envelope) -> String {
    serde_json::to_string(envelope).expect("Envelope always serializes")
}

/// Parse and validate a wire text payload into an [`Envelope`].
pub fn decode(text: &str) -> Result<Envelope, ProtocolValidationError> {
    let envelope: Envelope = serde_json::from_str(text).map_err(|e| ProtocolValidationError {
        message: e.to_string(),
        raw: text.to_owned(),
    })?;
    validate(&envelope).map_err(|message| ProtocolValidationError {
        message,
        raw: text.to_owned(),
    })?;
    Ok(envelope)
}

fn validate(envelope: &Envelope) -> Result<(), String> {
    if let Envelope::CommandResult(result) = envelope {
        match (result.success, &result.position, &result.error) {
            (true, None, _) => {
                return Err("command_result with success=true must carry position".to_owned());
            }
            (false, _, None) => {
                return Err("command_result with success=false must carry error".to_owned());
            }
            _ => {}
        }
    }
    Ok(())
}
