// A toy event-sourced "aggregate engine" standing in for the real one
// spec.md §1 treats as an external collaborator. protocol-core never
// interprets payloads; this loop is only here so `protocol-gateway` is a
// runnable end-to-end demo rather than a pile of unused wiring. Every
// command appends one event to its target stream and reports success —
// there is no actual business logic or validation to ground beyond that.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use chrono::Utc;

use protocol_core::{CommandResult, Event, Position, ServerProtocol, StreamId, Transport};

/// Drains `ServerProtocol`'s command stream forever, appending one event
/// per command to an in-process per-stream counter and publishing it to
/// whoever is subscribed.
pub async fn run<T: Transport>(
    server: Arc<ServerProtocol<T>>,
    mut commands: protocol_core::CommandStream<T::ConnectionId>,
) {
    let next_event_number: Mutex<HashMap<StreamId, u64>> = Mutex::new(HashMap::new());

    while let Some((connection, command)) = commands.next().await {
        let event_number = {
            let mut counters = next_event_number.lock().expect("demo store poisoned");
            let counter = counters.entry(command.target.clone()).or_insert(0);
            let number = *counter;
            *counter += 1;
            number
        };

        let position = Position {
            stream_id: command.target.clone(),
            event_number,
        };

        if let Err(err) = server
            .send_result(connection, &command.id, &CommandResult::Success(position.clone()))
            .await
        {
            tracing::warn!(error = %err, command_id = %command.id, "failed to send command result");
        }

        let event = Event {
            position,
            event_type: command.name.clone(),
            data: command.payload.clone(),
            timestamp: Utc::now(),
        };

        server.publish_event(&command.target, &event).await;
    }
}
