//! Connection lifecycle integration tests.
//!
//! Drives the full controller over the simulated transport:
//! - Handshake flow (open -> Connected)
//! - Disconnect racing an in-flight handshake
//! - Rapid reconnect
//! - Socket loss, broker ERROR and connect timeout

use std::{
    cell::RefCell,
    rc::Rc,
    time::{Duration, Instant},
};

use stompmux_core::{
    Client, ClientConfig, ClientError, ConnectionState, DisconnectReason, Frame, Heartbeat,
    StateChange, Transport, handler_fn,
};
use stompmux_harness::{SimCall, SimTransport};

const URL: &str = "ws://localhost:8082/stomp";

/// Both clients share one simulated network, so every event goes to both;
/// each ignores ids that are not its own.
fn drain(sim: &SimTransport, mut clients: [&mut Client<SimTransport>; 2]) {
    for event in sim.clone().poll_events() {
        for client in &mut clients {
            client.handle_event(event.clone());
        }
    }
}

fn client_with(sim: &SimTransport) -> (Client<SimTransport>, Rc<RefCell<Vec<StateChange>>>) {
    let mut client = Client::new(sim.clone(), ClientConfig::default());
    let changes = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&changes);
    client.on_state_change(move |change| sink.borrow_mut().push(change.clone()));
    (client, changes)
}

#[test]
fn handshake_lifecycle() {
    let sim = SimTransport::new();
    let (mut client, changes) = client_with(&sim);

    let id = client.connect(URL, Instant::now()).expect("open");
    client.pump();
    assert_eq!(client.state(), ConnectionState::Connecting);

    sim.accept(id);
    assert_eq!(client.pump(), 1);
    assert_eq!(client.state(), ConnectionState::Connected);

    let states: Vec<_> = changes.borrow().iter().map(|c| c.current).collect();
    assert_eq!(states, vec![ConnectionState::Connecting, ConnectionState::Connected]);
}

#[test]
fn open_passes_config_through() {
    let sim = SimTransport::new();
    let mut config = ClientConfig {
        heartbeat: Heartbeat { outgoing: Duration::from_secs(4), incoming: Duration::from_secs(8) },
        ..ClientConfig::default()
    };
    config.connect_headers.insert("host".into(), "localhost".into());
    let mut client = Client::new(sim.clone(), config);

    let id = client.connect(URL, Instant::now()).expect("open");

    let options = sim.open_options(id).expect("link exists");
    assert_eq!(options.url, URL);
    assert_eq!(options.heartbeat.header_value(), "4000,8000");
    assert_eq!(options.headers.get("host").map(String::as_str), Some("localhost"));
}

#[test]
fn disconnect_before_handshake_ignores_late_connected() {
    let sim = SimTransport::new();
    let (mut client, changes) = client_with(&sim);

    let id = client.connect(URL, Instant::now()).expect("open");
    client.disconnect();
    assert_eq!(client.state(), ConnectionState::Disconnected);

    // Handshake completes after we gave up.
    sim.accept(id);
    client.pump();

    assert_eq!(client.state(), ConnectionState::Disconnected);
    let last = changes.borrow().last().cloned().expect("at least one change");
    assert_eq!(last.current, ConnectionState::Disconnected);
    assert_eq!(last.reason, Some(DisconnectReason::Requested));
}

#[test]
fn rapid_reconnect_keeps_one_live_transport() {
    let sim = SimTransport::new();
    let (mut client, _) = client_with(&sim);

    let first = client.connect(URL, Instant::now()).expect("open");
    let second = client.connect(URL, Instant::now()).expect("open");
    let third = client.connect(URL, Instant::now()).expect("open");

    assert_eq!(sim.closed(), vec![first, second]);
    assert_eq!(sim.live_connections(), vec![third]);

    // Close must come before the replacing open.
    let calls = sim.calls();
    let close_first = calls.iter().position(|c| *c == SimCall::Close { connection: first });
    let open_second = calls
        .iter()
        .position(|c| matches!(c, SimCall::Open { connection, .. } if *connection == second));
    assert!(close_first < open_second);

    sim.accept(first);
    sim.accept(second);
    client.pump();
    assert_eq!(client.state(), ConnectionState::Connecting);

    sim.accept(third);
    client.pump();
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[test]
fn reconnect_starts_with_empty_registry() {
    let sim = SimTransport::auto_accept();
    let (mut client, _) = client_with(&sim);

    client.connect(URL, Instant::now()).expect("open");
    client.pump();
    client.subscribe("/sub/chat/room", handler_fn(|_| Ok(()))).expect("subscribe");

    client.connect(URL, Instant::now()).expect("reopen");
    client.pump();

    assert_eq!(client.state(), ConnectionState::Connected);
    assert!(client.registry().is_empty());
}

#[test]
fn socket_close_drops_to_disconnected() {
    let sim = SimTransport::auto_accept();
    let (mut client, changes) = client_with(&sim);

    let id = client.connect(URL, Instant::now()).expect("open");
    client.pump();
    client.subscribe("/sub/digitaltwin/pong", handler_fn(|_| Ok(()))).expect("subscribe");

    sim.drop_socket(id, "1006");
    client.pump();

    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(client.registry().lookup("/sub/digitaltwin/pong").is_none());
    assert_eq!(
        changes.borrow().last().and_then(|c| c.reason.clone()),
        Some(DisconnectReason::SocketClosed { reason: "1006".into() })
    );

    // No automatic retry.
    assert_eq!(sim.opened(), vec![id]);
}

#[test]
fn stomp_error_reports_diagnostic() {
    let sim = SimTransport::auto_accept();
    let (mut client, changes) = client_with(&sim);

    let id = client.connect(URL, Instant::now()).expect("open");
    client.pump();
    sim.stomp_error(id, "Invalid destination");
    client.pump();

    let changes = changes.borrow();
    let tail: Vec<_> = changes.iter().rev().take(2).rev().collect();
    assert_eq!(tail[0].current, ConnectionState::Erroring);
    assert_eq!(
        tail[0].reason,
        Some(DisconnectReason::StompError { message: "Invalid destination".into() })
    );
    assert_eq!(tail[1].current, ConnectionState::Disconnected);
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[test]
fn server_disconnect_is_terminal() {
    let sim = SimTransport::auto_accept();
    let (mut client, _) = client_with(&sim);

    let id = client.connect(URL, Instant::now()).expect("open");
    client.pump();
    sim.server_disconnect(id);
    client.pump();

    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(matches!(
        client.subscribe("/sub/a", handler_fn(|_| Ok(()))),
        Err(ClientError::NotConnected { .. })
    ));
}

#[test]
fn connect_timeout_closes_transport() {
    let sim = SimTransport::new();
    let config = ClientConfig { connect_timeout: Duration::from_millis(500), ..Default::default() };
    let mut client = Client::new(sim.clone(), config);
    let t0 = Instant::now();

    let id = client.connect(URL, t0).expect("open");
    client.tick(t0 + Duration::from_millis(400));
    assert_eq!(client.state(), ConnectionState::Connecting);

    client.tick(t0 + Duration::from_millis(600));
    client.pump();
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(sim.closed(), vec![id]);

    sim.accept(id);
    client.pump();
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[test]
fn refused_open_leaves_client_disconnected() {
    let sim = SimTransport::new();
    sim.refuse_open(true);
    let (mut client, changes) = client_with(&sim);

    let result = client.connect(URL, Instant::now());

    assert!(result.is_err());
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(matches!(
        changes.borrow().last().and_then(|c| c.reason.clone()),
        Some(DisconnectReason::OpenFailed { .. })
    ));

    sim.refuse_open(false);
    client.connect(URL, Instant::now()).expect("second attempt opens");
    assert_eq!(client.state(), ConnectionState::Connecting);
}

#[test]
fn independent_clients_do_not_interfere() {
    let sim = SimTransport::auto_accept();
    let mut alice = Client::new(sim.clone(), ClientConfig::default());
    let mut bob = Client::new(sim.clone(), ClientConfig::default());
    let alice_seen = Rc::new(RefCell::new(0usize));
    let bob_seen = Rc::new(RefCell::new(0usize));

    alice.connect(URL, Instant::now()).expect("open");
    bob.connect(URL, Instant::now()).expect("open");

    drain(&sim, [&mut alice, &mut bob]);
    assert_eq!(alice.state(), ConnectionState::Connected);
    assert_eq!(bob.state(), ConnectionState::Connected);

    let sink = Rc::clone(&alice_seen);
    alice
        .subscribe(
            "/sub/chat/room",
            handler_fn(move |_| {
                *sink.borrow_mut() += 1;
                Ok(())
            }),
        )
        .expect("subscribe");
    let sink = Rc::clone(&bob_seen);
    bob.subscribe(
        "/sub/chat/room",
        handler_fn(move |_| {
            *sink.borrow_mut() += 1;
            Ok(())
        }),
    )
    .expect("subscribe");

    alice.disconnect();
    sim.publish(&Frame::new("/sub/chat/room", "hello"));
    drain(&sim, [&mut alice, &mut bob]);

    assert_eq!(*alice_seen.borrow(), 0);
    assert_eq!(*bob_seen.borrow(), 1);
    assert_eq!(bob.state(), ConnectionState::Connected);
}
