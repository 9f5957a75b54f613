use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use protocol_core::{ClientProtocol, Command, CommandId, CommandResult, Position, SendError, StreamId};
use protocol_core::Transport;
use protocol_testkit::pair;
use protocol_wire::{CommandResultEnvelope, Envelope, EventEnvelope, Position as WirePosition};

fn sample_command(id: &str) -> Command {
    Command {
        id: CommandId::from(id),
        target: StreamId::from("user-1"),
        name: "CreateUser".to_owned(),
        payload: serde_json::json!({ "email": "a@example.com" }),
    }
}

fn encode_success(command_id: &str, stream_id: &str, event_number: u64) -> String {
    protocol_wire::encode(&Envelope::CommandResult(CommandResultEnvelope {
        command_id: command_id.to_owned(),
        success: true,
        position: Some(WirePosition {
            stream_id: stream_id.to_owned(),
            event_number,
        }),
        error: None,
    }))
}

fn encode_failure(command_id: &str, error: &str) -> String {
    protocol_wire::encode(&Envelope::CommandResult(CommandResultEnvelope {
        command_id: command_id.to_owned(),
        success: false,
        position: None,
        error: Some(error.to_owned()),
    }))
}

async fn recv_command_id(server: &protocol_testkit::ServerTransport) -> (protocol_testkit::ConnectionId, String) {
    let mut inbound = server.inbound();
    let (conn, frame) = inbound.next().await.expect("server should see an inbound frame");
    let id = match protocol_wire::decode(&frame).expect("valid envelope") {
        Envelope::Command(command) => command.id,
        other => panic!("expected a command envelope, got {other:?}"),
    };
    (conn, id)
}

#[tokio::test]
async fn happy_path_send_resolves_with_the_servers_reported_position() {
    let (client_transport, server_transport) = pair();
    let protocol = ClientProtocol::new(Arc::new(client_transport));

    let server = tokio::spawn(async move {
        let (conn, id) = recv_command_id(&server_transport).await;
        server_transport.send_to(conn, encode_success(&id, "user-1", 0)).await.unwrap();
    });

    let result = protocol.send(sample_command("cmd-1")).await.unwrap();
    assert_eq!(
        result,
        CommandResult::Success(Position {
            stream_id: StreamId::from("user-1"),
            event_number: 0,
        })
    );
    server.await.unwrap();
}

#[tokio::test]
async fn a_failure_result_is_returned_to_the_caller_without_the_command_erroring() {
    let (client_transport, server_transport) = pair();
    let protocol = ClientProtocol::new(Arc::new(client_transport));

    let server = tokio::spawn(async move {
        let (conn, id) = recv_command_id(&server_transport).await;
        server_transport.send_to(conn, encode_failure(&id, "email already registered")).await.unwrap();
    });

    let result = protocol.send(sample_command("cmd-2")).await.unwrap();
    assert_eq!(result, CommandResult::Failure("email already registered".to_owned()));
    server.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn a_result_arriving_just_before_the_deadline_still_resolves() {
    let (client_transport, server_transport) = pair();
    let protocol = ClientProtocol::new(Arc::new(client_transport));

    let send_task = tokio::spawn(async move { protocol.send(sample_command("cmd-late")).await });

    tokio::time::advance(Duration::from_millis(9_999)).await;

    let (conn, id) = recv_command_id(&server_transport).await;
    server_transport.send_to(conn, encode_success(&id, "user-1", 3)).await.unwrap();

    let result = send_task.await.unwrap().unwrap();
    assert_eq!(
        result,
        CommandResult::Success(Position {
            stream_id: StreamId::from("user-1"),
            event_number: 3,
        })
    );
}

#[tokio::test(start_paused = true)]
async fn a_command_with_no_result_times_out_once_the_deadline_elapses() {
    let (client_transport, _server_transport) = pair();
    let protocol = ClientProtocol::new(Arc::new(client_transport));

    let send_task = tokio::spawn(async move { protocol.send(sample_command("cmd-timeout")).await });

    tokio::time::advance(Duration::from_millis(10_001)).await;

    let result = send_task.await.unwrap();
    match result {
        Err(SendError::Timeout(err)) => {
            assert_eq!(err.command_id, CommandId::from("cmd-timeout"));
            assert_eq!(err.timeout_ms, 10_000);
        }
        other => panic!("expected a CommandTimeoutError, got {other:?}"),
    }
}

#[tokio::test]
async fn dropping_a_send_before_it_resolves_removes_its_correlation_table_entry() {
    let (client_transport, server_transport) = pair();
    let protocol = Arc::new(ClientProtocol::new(Arc::new(client_transport)));

    let protocol_for_send = Arc::clone(&protocol);
    let send_task = tokio::spawn(async move { protocol_for_send.send(sample_command("cmd-cancelled")).await });

    // Wait for the command frame to actually reach the server before
    // cancelling, so we know the slot was inserted.
    let (conn, id) = recv_command_id(&server_transport).await;
    assert_eq!(id, "cmd-cancelled");

    send_task.abort();
    let _ = send_task.await;

    // A late result for the cancelled command must be dropped silently,
    // and a fresh send reusing the same id must succeed rather than
    // failing with a stale DuplicateCommandId.
    server_transport.send_to(conn, encode_success("cmd-cancelled", "user-1", 0)).await.unwrap();

    let result = protocol.send(sample_command("cmd-cancelled")).await;
    assert!(result.is_ok(), "re-using the cancelled command's id should succeed, got {result:?}");
}

#[tokio::test]
async fn concurrent_sends_resolve_correctly_even_when_results_arrive_out_of_order() {
    let (client_transport, server_transport) = pair();
    let protocol = Arc::new(ClientProtocol::new(Arc::new(client_transport)));

    let server = tokio::spawn(async move {
        let mut inbound = server_transport.inbound();
        let (conn_a, frame_a) = inbound.next().await.unwrap();
        let id_a = match protocol_wire::decode(&frame_a).unwrap() {
            Envelope::Command(c) => c.id,
            _ => panic!("expected command"),
        };
        let (conn_b, frame_b) = inbound.next().await.unwrap();
        let id_b = match protocol_wire::decode(&frame_b).unwrap() {
            Envelope::Command(c) => c.id,
            _ => panic!("expected command"),
        };

        // Answer the second command first.
        server_transport.send_to(conn_b, encode_success(&id_b, "user-1", 1)).await.unwrap();
        server_transport.send_to(conn_a, encode_success(&id_a, "user-1", 0)).await.unwrap();
    });

    let protocol_a = Arc::clone(&protocol);
    let protocol_b = Arc::clone(&protocol);
    let (result_a, result_b) = tokio::join!(
        protocol_a.send(sample_command("cmd-a")),
        protocol_b.send(sample_command("cmd-b")),
    );

    assert_eq!(
        result_a.unwrap(),
        CommandResult::Success(Position { stream_id: StreamId::from("user-1"), event_number: 0 })
    );
    assert_eq!(
        result_b.unwrap(),
        CommandResult::Success(Position { stream_id: StreamId::from("user-1"), event_number: 1 })
    );
    server.await.unwrap();
}

#[tokio::test]
async fn a_subscription_only_sees_events_for_its_own_stream() {
    let (client_transport, server_transport) = pair();
    let protocol = ClientProtocol::new(Arc::new(client_transport));

    let mut subscription = protocol.subscribe(StreamId::from("user-1")).await.unwrap();

    // The server sees the subscribe envelope before pushing anything.
    let (conn, _frame) = {
        let mut inbound = server_transport.inbound();
        inbound.next().await.unwrap()
    };

    let other_stream_event = Envelope::Event(EventEnvelope {
        stream_id: "user-2".to_owned(),
        position: WirePosition { stream_id: "user-2".to_owned(), event_number: 0 },
        event_type: "UserCreated".to_owned(),
        data: serde_json::json!({}),
        timestamp: chrono::Utc::now(),
    });
    let own_stream_event = Envelope::Event(EventEnvelope {
        stream_id: "user-1".to_owned(),
        position: WirePosition { stream_id: "user-1".to_owned(), event_number: 0 },
        event_type: "UserCreated".to_owned(),
        data: serde_json::json!({ "email": "a@example.com" }),
        timestamp: chrono::Utc::now(),
    });

    server_transport.send_to(conn, protocol_wire::encode(&other_stream_event)).await.unwrap();
    server_transport.send_to(conn, protocol_wire::encode(&own_stream_event)).await.unwrap();

    let event = subscription.next().await.expect("should receive the own-stream event");
    assert_eq!(event.event_type, "UserCreated");
    assert_eq!(event.position.stream_id, StreamId::from("user-1"));
}

#[tokio::test]
async fn a_stray_result_for_an_unknown_command_id_does_not_disturb_a_later_send() {
    let (client_transport, server_transport) = pair();
    let protocol = ClientProtocol::new(Arc::new(client_transport));

    let server = tokio::spawn(async move {
        let (conn, id) = recv_command_id(&server_transport).await;

        // First send a result for a command id nobody registered. demux
        // must log and discard this rather than panicking or wedging the
        // correlation table, and the real command below must still resolve.
        server_transport
            .send_to(conn, encode_success("orphan-id-nobody-sent", "user-1", 99))
            .await
            .unwrap();
        server_transport.send_to(conn, encode_success(&id, "user-1", 0)).await.unwrap();
    });

    let result = protocol.send(sample_command("cmd-real")).await.unwrap();
    assert_eq!(
        result,
        CommandResult::Success(Position {
            stream_id: StreamId::from("user-1"),
            event_number: 0,
        })
    );
    server.await.unwrap();
}
