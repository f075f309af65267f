//! Controller and Relay over loopback TCP.

use std::net::SocketAddr;
use std::time::Duration;

use dpp_controller::controller::enroll;
use dpp_controller::framing::{read_frame, write_frame};
use dpp_controller::{Controller, ControllerSettings, Message, RadioFrame, Relay, RouteTable};
use dpp_core::encoding::to_hex;
use dpp_core::errors::StatusCode;
use dpp_protocol::config::{Credential, LegacySecret};
use dpp_protocol::{Action, AuthRequest, Capability, Engine, EngineSettings, Event, Input, Peer};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout, Instant};

const IDLE: Duration = Duration::from_secs(5);
const SSID: &[u8] = b"dpp-net";
const PASS: &str = "secret-pass";

fn controller_settings() -> ControllerSettings {
    ControllerSettings {
        listen: "127.0.0.1:0".parse().unwrap(),
        idle_timeout_ms: IDLE.as_millis() as u64,
        conf: Some(format!(
            "conf=sta-psk ssid={} pass={}",
            to_hex(SSID),
            to_hex(PASS.as_bytes())
        )),
        ..ControllerSettings::default()
    }
}

type ControllerEvents = mpsc::UnboundedReceiver<(Peer, Event)>;

async fn start_controller() -> (SocketAddr, String, Option<[u8; 32]>, ControllerEvents) {
    let mut controller = Controller::bind(&controller_settings()).await.unwrap();
    let events = controller.subscribe();
    let addr = controller.local_addr().unwrap();
    let uri = controller.provisioning().uri().unwrap();
    let hash = controller.provisioning().key_hash();
    tokio::spawn(controller.run());
    (addr, uri, hash, events)
}

fn enrollee(uri: &str) -> (Engine, u32) {
    let mut engine = Engine::new(EngineSettings {
        allowed_roles: Capability::Enrollee,
        ..EngineSettings::default()
    });
    let id = engine.bootstraps_mut().parse_uri(uri).unwrap();
    (engine, id)
}

fn assert_psk_profile(engine: &Engine) {
    let profiles: Vec<_> = engine.profiles().collect();
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0].object.ssid, SSID);
    match &profiles[0].object.credential {
        Credential::Legacy { secret, .. } => {
            assert_eq!(secret, &LegacySecret::Passphrase(PASS.into()));
        }
        other => panic!("unexpected credential {other:?}"),
    }
}

async fn wait_for_result(events: &mut mpsc::UnboundedReceiver<(Peer, Event)>) -> Event {
    timeout(IDLE, async {
        loop {
            let (_, event) = events.recv().await.expect("controller stopped");
            if matches!(event, Event::ConfResult { .. }) {
                return event;
            }
        }
    })
    .await
    .expect("no configuration result")
}

// ─── Direct connection ───

#[tokio::test]
async fn enrollee_is_configured_over_tcp() {
    let (addr, uri, _, mut controller_events) = start_controller().await;
    let (mut engine, peer_id) = enrollee(&uri);

    let events = enroll(addr, &mut engine, AuthRequest::new(peer_id), IDLE)
        .await
        .unwrap();

    assert!(events
        .iter()
        .any(|e| matches!(e, Event::AuthSuccess { initiator: true, .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::ConfReceived { profile_ids, .. } if profile_ids.len() == 1)));
    assert_psk_profile(&engine);

    let result = wait_for_result(&mut controller_events).await;
    assert!(matches!(result, Event::ConfResult { status: StatusCode::Ok, .. }));
}

#[tokio::test]
async fn wrong_bootstrap_key_fails_without_configuration() {
    let (addr, _, _, _) = start_controller().await;
    let other = Controller::bind(&controller_settings()).await.unwrap();
    let stranger_uri = other.provisioning().uri().unwrap();
    let (mut engine, peer_id) = enrollee(&stranger_uri);
    engine.settings_mut().init_max_tries = 1;
    engine.settings_mut().resp_wait_time = 200;
    engine.settings_mut().init_retry_time = 100;

    let events = enroll(addr, &mut engine, AuthRequest::new(peer_id), IDLE)
        .await
        .unwrap();

    assert!(events
        .iter()
        .any(|e| matches!(e, Event::AuthInitFailed { .. })));
    assert_eq!(engine.profiles().count(), 0);
}

// ─── Malformed input ───

#[tokio::test]
async fn short_frame_closes_only_that_connection() {
    let (addr, uri, _, mut controller_events) = start_controller().await;

    let mut bad = TcpStream::connect(addr).await.unwrap();
    write_frame(&mut bad, &[0x09, 0x50, 0x6f]).await.unwrap();
    let closed = timeout(IDLE, read_frame(&mut bad)).await.unwrap();
    assert!(closed.is_err());

    let (mut engine, peer_id) = enrollee(&uri);
    enroll(addr, &mut engine, AuthRequest::new(peer_id), IDLE)
        .await
        .unwrap();
    assert_psk_profile(&engine);
    wait_for_result(&mut controller_events).await;
}

#[tokio::test]
async fn oversized_length_closes_the_connection() {
    let (addr, uri, _, _) = start_controller().await;

    let mut bad = TcpStream::connect(addr).await.unwrap();
    bad.write_all(&u32::MAX.to_be_bytes()).await.unwrap();
    let closed = timeout(IDLE, read_frame(&mut bad)).await.unwrap();
    assert!(closed.is_err());

    let (mut engine, peer_id) = enrollee(&uri);
    enroll(addr, &mut engine, AuthRequest::new(peer_id), IDLE)
        .await
        .unwrap();
    assert_psk_profile(&engine);
}

#[tokio::test]
async fn unknown_message_class_closes_the_connection() {
    let (addr, _, _, _) = start_controller().await;
    let mut bad = TcpStream::connect(addr).await.unwrap();
    write_frame(&mut bad, &[0x42, 0x00, 0x00, 0x00]).await.unwrap();
    let closed = timeout(IDLE, read_frame(&mut bad)).await.unwrap();
    assert!(closed.is_err());
}

// ─── Relay ───

const RELAY: Peer = Peer([0x02, 0x00, 0x00, 0x00, 0x00, 0xaa]);
const STATION: Peer = Peer([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
const FREQ: u32 = 2437;

/// The Enrollee talks over the air to the relay; the relay carries its
/// frames to the Controller picked by bootstrap key hash.
#[tokio::test]
async fn relay_routes_by_bootstrap_hash() {
    let (addr, uri, hash, mut controller_events) = start_controller().await;
    let mut routes = RouteTable::new(None);
    routes.add(hash.unwrap(), addr);

    let (radio_tx, mut radio_rx) = mpsc::channel(16);
    let mut relay = Relay::new(routes, radio_tx, IDLE);
    let (mut engine, peer_id) = enrollee(&uri);

    let req = AuthRequest {
        peer: Some(RELAY),
        freq: Some(FREQ),
        ..AuthRequest::new(peer_id)
    };
    let mut actions = engine.auth_init(req, Instant::now().into_std()).unwrap();
    let mut events = Vec::new();
    let mut token: u8 = 0;

    let done = timeout(IDLE, async {
        loop {
            for action in std::mem::take(&mut actions) {
                let message = match action {
                    Action::SendFrame { frame, .. } => Message::Action(frame),
                    Action::GasQuery { body, .. } => {
                        token = token.wrapping_add(1);
                        Message::GasRequest { token, body }
                    }
                    Action::Event(e) => {
                        events.push(e);
                        continue;
                    }
                    _ => continue,
                };
                relay
                    .from_radio(RadioFrame {
                        peer: STATION,
                        freq: FREQ,
                        message,
                    })
                    .await
                    .unwrap();
            }
            if events.iter().any(|e| matches!(e, Event::ConfReceived { .. })) {
                return;
            }

            let deadline = engine.next_deadline().map(Instant::from_std);
            tokio::select! {
                frame = radio_rx.recv() => {
                    let RadioFrame { peer, freq, message } = frame.expect("relay stopped");
                    assert_eq!(peer, STATION);
                    assert_eq!(freq, FREQ);
                    let input = match message {
                        Message::Action(frame) => Input::Frame { peer: RELAY, freq, frame },
                        Message::GasResponse { body, .. } => {
                            Input::GasResponse { peer: RELAY, body }
                        }
                        other => panic!("controller sent {other:?}"),
                    };
                    actions = engine.handle(input, Instant::now().into_std());
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    actions = engine.handle(Input::Tick, Instant::now().into_std());
                }
            }
        }
    })
    .await;

    assert!(done.is_ok(), "enrollee not configured: {events:?}");
    assert_eq!(relay.connections(), 1);
    assert_psk_profile(&engine);
    wait_for_result(&mut controller_events).await;
}

#[tokio::test]
async fn relay_without_route_refuses() {
    let (radio_tx, _radio_rx) = mpsc::channel(1);
    let mut relay = Relay::new(RouteTable::new(None), radio_tx, IDLE);
    let (mut engine, peer_id) = {
        let (_, uri, _, _) = start_controller().await;
        enrollee(&uri)
    };
    let req = AuthRequest {
        peer: Some(RELAY),
        freq: Some(FREQ),
        ..AuthRequest::new(peer_id)
    };
    let actions = engine.auth_init(req, Instant::now().into_std()).unwrap();
    let frame = actions
        .into_iter()
        .find_map(|a| match a {
            Action::SendFrame { frame, .. } => Some(frame),
            _ => None,
        })
        .unwrap();
    let err = relay
        .from_radio(RadioFrame {
            peer: STATION,
            freq: FREQ,
            message: Message::Action(frame),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, dpp_controller::ControllerError::NoRoute(_)));
    assert_eq!(relay.connections(), 0);
}
