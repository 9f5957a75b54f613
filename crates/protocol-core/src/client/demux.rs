use std::sync::Arc;

use futures_util::StreamExt;

use crate::client::correlation::CorrelationTable;
use crate::client::subscription::SubscriptionTable;
use crate::transport::Transport;
use crate::types::{wire, CommandId, StreamId};

/// Consumes raw inbound frames and routes each decoded envelope to the
/// correlation table (command results) or subscription table (events),
/// owned for the lifetime of a single [`crate::client::ClientProtocol`].
///
/// A frame that fails to decode, or an event for a stream nobody
/// subscribed to (the subscription was dropped concurrently), is logged
/// and skipped — it never tears down the loop. One malformed frame must
/// not take out every other in-flight command and subscription.
///
/// Takes the transport by `Arc` and builds the inbound stream itself so
/// the stream's borrow of `transport` lives entirely inside this future —
/// no `'static` stream ever has to be manufactured from a borrowed one.
pub(crate) async fn run<T: Transport>(
    transport: Arc<T>,
    correlation: Arc<CorrelationTable>,
    subscriptions: Arc<SubscriptionTable>,
) {
    let mut inbound = transport.inbound().map(|(_connection, frame)| frame);
    while let Some(frame) = inbound.next().await {
        let envelope = match protocol_wire::decode(&frame) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(error = %err, "discarding unparseable inbound frame");
                continue;
            }
        };

        match envelope {
            protocol_wire::Envelope::CommandResult(result) => {
                let id = CommandId::from(result.command_id.clone());
                match correlation.take(&id) {
                    Some(slot) => {
                        let _ = slot.send(wire::result_from_wire(result));
                    }
                    None => {
                        tracing::debug!(command_id = %id, "result for unknown or already-resolved command");
                    }
                }
            }
            protocol_wire::Envelope::Event(event) => {
                let stream_id = StreamId::from(event.stream_id.clone());
                match subscriptions.get(&stream_id) {
                    Some(queue) => {
                        let _ = queue.send(wire::event_from_wire(event));
                    }
                    None => {
                        tracing::debug!(stream_id = %stream_id, "event for a stream with no active subscription");
                    }
                }
            }
            protocol_wire::Envelope::Command(_) | protocol_wire::Envelope::Subscribe(_) => {
                tracing::warn!("client received a server-bound envelope, ignoring");
            }
        }
    }
}
