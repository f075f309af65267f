//! End-to-end engine scenarios over an in-memory air interface.
//!
//! Two engines exchange frames through [`Air`], which serializes every
//! frame to action-frame bytes and back, carries GAS bodies, and owns a
//! manual clock. Time only moves when a test calls `advance`.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dpp_core::bootstrap::{BootstrapParams, BootstrapType};
use dpp_core::crypto::Curve;
use dpp_core::encoding::to_hex;
use dpp_core::errors::StatusCode;
use dpp_core::fault::{FaultInjector, FaultPoint};
use dpp_core::frame::{DppFrame, FrameType};
use dpp_protocol::config::{ConfParams, ConnStatus, Credential, LegacySecret, NetworkConf};
use dpp_protocol::connector::{decode_claims, NetRole};
use dpp_protocol::config::Akm;
use dpp_protocol::{
    Action, AuthRequest, Capability, Engine, EngineSettings, Event, FailureReason, Input, Peer,
    PkexRequest, Role,
};

const DEV0: Peer = Peer([0x02, 0, 0, 0, 0, 0x00]);
const DEV1: Peer = Peer([0x02, 0, 0, 0, 0, 0x01]);

struct Device {
    mac: Peer,
    engine: Engine,
    events: Vec<Event>,
}

struct Air {
    devs: [Device; 2],
    now: Instant,
    queue: VecDeque<(usize, Input)>,
    /// Deliver every frame of this type twice.
    duplicate: Option<FrameType>,
    next_token: u8,
}

impl Air {
    fn new(dev0: Engine, dev1: Engine, now: Instant) -> Self {
        Self {
            devs: [
                Device {
                    mac: DEV0,
                    engine: dev0,
                    events: Vec::new(),
                },
                Device {
                    mac: DEV1,
                    engine: dev1,
                    events: Vec::new(),
                },
            ],
            now,
            queue: VecDeque::new(),
            duplicate: None,
            next_token: 0,
        }
    }

    fn engine(&mut self, idx: usize) -> &mut Engine {
        &mut self.devs[idx].engine
    }

    fn events(&self, idx: usize) -> &[Event] {
        &self.devs[idx].events
    }

    /// Run an API call on one device and deliver everything it causes.
    fn call(&mut self, idx: usize, f: impl FnOnce(&mut Engine, Instant) -> Vec<Action>) {
        let now = self.now;
        let actions = f(&mut self.devs[idx].engine, now);
        self.dispatch(idx, actions);
        self.settle();
    }

    fn dispatch(&mut self, from: usize, actions: Vec<Action>) {
        let to = 1 - from;
        let src = self.devs[from].mac;
        for action in actions {
            match action {
                Action::SendFrame { peer, freq, frame } => {
                    if peer != self.devs[to].mac && !peer.is_broadcast() {
                        continue;
                    }
                    let bytes = frame.to_action_bytes().expect("encode");
                    let frame = DppFrame::from_action_bytes(&bytes).expect("decode");
                    let copies = if self.duplicate == Some(frame.frame_type) { 2 } else { 1 };
                    for _ in 0..copies {
                        self.queue.push_back((
                            to,
                            Input::Frame {
                                peer: src,
                                freq,
                                frame: frame.clone(),
                            },
                        ));
                    }
                }
                Action::GasQuery { freq, body, .. } => {
                    self.next_token = self.next_token.wrapping_add(1);
                    self.queue.push_back((
                        to,
                        Input::GasRequest {
                            peer: src,
                            freq,
                            token: self.next_token,
                            body,
                        },
                    ));
                }
                Action::GasReply { body, .. } => {
                    self.queue
                        .push_back((to, Input::GasResponse { peer: src, body }));
                }
                Action::Event(event) => self.devs[from].events.push(event),
                Action::Listen { .. } | Action::StopListen => {}
            }
        }
    }

    fn settle(&mut self) {
        let mut budget = 1_000;
        while let Some((to, input)) = self.queue.pop_front() {
            budget -= 1;
            assert!(budget > 0, "frame storm");
            let now = self.now;
            let actions = self.devs[to].engine.handle(input, now);
            self.dispatch(to, actions);
        }
    }

    /// Move the clock forward by `d`, firing timers on the way.
    fn advance(&mut self, d: Duration) {
        let end = self.now + d;
        loop {
            self.settle();
            let next = self
                .devs
                .iter()
                .filter_map(|dev| dev.engine.next_deadline())
                .min();
            match next {
                Some(at) if at <= end => {
                    self.now = self.now.max(at);
                    for idx in 0..2 {
                        let due = self.devs[idx]
                            .engine
                            .next_deadline()
                            .is_some_and(|t| t <= self.now);
                        if due {
                            let now = self.now;
                            let actions = self.devs[idx].engine.handle(Input::Tick, now);
                            self.dispatch(idx, actions);
                        }
                    }
                }
                _ => break,
            }
        }
        self.now = end;
    }
}

fn settings(role: Capability) -> EngineSettings {
    EngineSettings {
        allowed_roles: role,
        ..Default::default()
    }
}

fn pair(role0: Capability, role1: Capability) -> (Air, DateTime<Utc>) {
    let t0 = Instant::now();
    let wall = Utc::now();
    let dev0 = Engine::with_clock(settings(role0), t0, wall);
    let dev1 = Engine::with_clock(settings(role1), t0, wall);
    (Air::new(dev0, dev1, t0), wall)
}

fn own_bootstrap(engine: &mut Engine, kind: BootstrapType, chan: Option<&str>) -> u32 {
    engine
        .bootstraps_mut()
        .generate(BootstrapParams {
            kind: Some(kind),
            chan: chan.map(str::to_string),
            mac: Some(DEV0.to_string()),
            ..Default::default()
        })
        .expect("generate bootstrap")
}

fn psk_conf(pass: &str) -> ConfParams {
    format!(
        "conf=sta-psk ssid={} pass={}",
        to_hex(b"test"),
        to_hex(pass.as_bytes())
    )
    .parse()
    .expect("conf params")
}

fn dpp_conf(configurator: u32, expiry: i64) -> ConfParams {
    format!(
        "conf=sta-dpp ssid={} expiry={expiry} configurator={configurator}",
        to_hex(b"test")
    )
    .parse()
    .expect("conf params")
}

fn received_profiles(events: &[Event]) -> Vec<u32> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::ConfReceived { profile_ids, .. } => Some(profile_ids.clone()),
            _ => None,
        })
        .flatten()
        .collect()
}

fn count(events: &[Event], pred: impl Fn(&Event) -> bool) -> usize {
    events.iter().filter(|e| pred(e)).count()
}

/// dev1 scans dev0's QR code and configures it with `conf`.
fn qr_configure(air: &mut Air, conf: ConfParams) {
    let own = own_bootstrap(air.engine(0), BootstrapType::QrCode, Some("81/1"));
    let uri = air.engine(0).bootstraps().get_uri(own).expect("uri");
    let peer_id = air.engine(1).bootstraps_mut().parse_uri(&uri).expect("parse uri");
    let req = AuthRequest {
        role: Some(Capability::Configurator),
        conf: Some(conf),
        ..AuthRequest::new(peer_id)
    };
    air.call(1, |e, now| e.auth_init(req, now).expect("auth_init"));
}

// ─── Scenario A: QR code, legacy PSK ──────────────────────────────────

#[test]
fn qr_auth_then_psk_configuration() {
    let (mut air, _) = pair(Capability::Enrollee, Capability::Configurator);
    qr_configure(&mut air, psk_conf("secret passphrase"));

    let first_rx = air.events(0).iter().find_map(|e| match e {
        Event::Rx { freq, frame_type, .. } => Some((*freq, *frame_type)),
        _ => None,
    });
    assert_eq!(first_rx, Some((2412, FrameType::AuthReq)));

    assert!(air.events(1).contains(&Event::AuthSuccess {
        peer: DEV0,
        initiator: true,
        role: Role::Configurator,
        mutual: false,
    }));
    assert!(air.events(0).contains(&Event::AuthSuccess {
        peer: DEV1,
        initiator: false,
        role: Role::Enrollee,
        mutual: false,
    }));

    let ids = received_profiles(air.events(0));
    assert_eq!(ids.len(), 1);
    let profile = air.engine(0).profile(ids[0]).expect("stored profile");
    assert_eq!(profile.object.ssid, b"test");
    assert_eq!(
        profile.object.credential,
        Credential::Legacy {
            akm: Akm::Psk,
            secret: LegacySecret::Passphrase("secret passphrase".into()),
        }
    );
    assert!(profile.net_access_key.is_none());

    assert!(air.events(1).contains(&Event::ConfResult {
        peer: DEV0,
        status: StatusCode::Ok,
    }));
    assert!(!air.engine(0).has_session(DEV1));
    assert!(!air.engine(1).has_session(DEV0));
}

#[test]
fn incompatible_roles_are_reported_on_both_sides() {
    let (mut air, _) = pair(Capability::Enrollee, Capability::Enrollee);
    let own = own_bootstrap(air.engine(0), BootstrapType::QrCode, Some("81/1"));
    let uri = air.engine(0).bootstraps().get_uri(own).unwrap();
    let peer_id = air.engine(1).bootstraps_mut().parse_uri(&uri).unwrap();
    air.call(1, |e, now| e.auth_init(AuthRequest::new(peer_id), now).unwrap());

    assert!(air.events(0).contains(&Event::NotCompatible {
        peer: DEV1,
        initiator: false,
    }));
    assert!(air.events(1).contains(&Event::NotCompatible {
        peer: DEV0,
        initiator: true,
    }));
    assert_eq!(count(air.events(1), |e| matches!(e, Event::AuthSuccess { .. })), 0);
}

// ─── Connection status ────────────────────────────────────────────────

fn psk_conf_with_status(pass: &str) -> ConfParams {
    format!(
        "conf=sta-psk ssid={} pass={} conn_status=1",
        to_hex(b"test"),
        to_hex(pass.as_bytes())
    )
    .parse()
    .expect("conf params")
}

#[test]
fn enrollee_reports_connection_status() {
    let (mut air, _) = pair(Capability::Enrollee, Capability::Configurator);
    qr_configure(&mut air, psk_conf_with_status("secret passphrase"));
    assert_eq!(received_profiles(air.events(0)).len(), 1);
    assert!(air.engine(0).has_session(DEV1));
    assert!(air.engine(1).has_session(DEV0));

    let status = ConnStatus::new(StatusCode::Ok, b"test", None);
    air.call(0, |e, _| e.report_conn_status(DEV1, status).unwrap());

    let reported = air.events(1).iter().find_map(|e| match e {
        Event::ConnStatusResult { peer, status } if *peer == DEV0 => Some(status.clone()),
        _ => None,
    });
    let reported = reported.expect("connection status result");
    assert_eq!(reported.status(), Some(StatusCode::Ok));
    assert_eq!(reported.ssid().as_deref(), Some(&b"test"[..]));
    assert!(!air.engine(0).has_session(DEV1));
    assert!(!air.engine(1).has_session(DEV0));
}

#[test]
fn unreported_connection_status_closes_both_sides() {
    let (mut air, _) = pair(Capability::Enrollee, Capability::Configurator);
    qr_configure(&mut air, psk_conf_with_status("secret passphrase"));
    assert!(air.engine(0).next_deadline().is_some());

    air.advance(EngineSettings::default().status_wait() + Duration::from_millis(1));
    assert_eq!(air.engine(0).session_count(), 0);
    assert!(air.engine(0).next_deadline().is_none());
    assert!(air.events(1).contains(&Event::Fail {
        peer: DEV0,
        reason: FailureReason::Timeout,
    }));
    assert_eq!(air.engine(1).session_count(), 0);

    // Nothing is left to report on.
    let status = ConnStatus::new(StatusCode::Ok, b"test", None);
    assert!(air.engine(0).report_conn_status(DEV1, status).is_err());
}

// ─── Scenario B: PKEX ─────────────────────────────────────────────────

fn pkex_pair(code0: &str, code1: &str) -> Air {
    let (mut air, _) = pair(Capability::Enrollee, Capability::Configurator);
    air.engine(1)
        .set_conf_params(Some(psk_conf("pkex passphrase")))
        .unwrap();
    let own0 = own_bootstrap(air.engine(0), BootstrapType::Pkex, None);
    let own1 = own_bootstrap(air.engine(1), BootstrapType::Pkex, None);
    let listen = PkexRequest {
        own_bootstrap: own0,
        identifier: Some("test".into()),
        code: code0.into(),
        initiate: None,
    };
    air.call(0, |e, now| e.pkex_add(listen, now).unwrap());
    let initiate = PkexRequest {
        own_bootstrap: own1,
        identifier: Some("test".into()),
        code: code1.into(),
        initiate: Some((DEV0, 2437)),
    };
    air.call(1, |e, now| e.pkex_add(initiate, now).unwrap());
    air
}

#[test]
fn pkex_then_mutual_authentication() {
    let air = pkex_pair("secret", "secret");

    for (idx, peer) in [(0, DEV1), (1, DEV0)] {
        assert_eq!(
            count(air.events(idx), |e| matches!(e, Event::PkexDone { peer: p, .. } if *p == peer)),
            1,
            "device {idx}"
        );
        assert!(air
            .events(idx)
            .iter()
            .any(|e| matches!(e, Event::AuthSuccess { mutual: true, .. })));
    }
    // Neither side ever saw a URI; the peer keys came from PKEX.
    let peer_key_0 = air.events(0).iter().find_map(|e| match e {
        Event::PkexDone { bootstrap_id, .. } => Some(*bootstrap_id),
        _ => None,
    });
    let entry = air.devs[0]
        .engine
        .bootstraps()
        .get(peer_key_0.unwrap())
        .unwrap();
    assert_eq!(entry.kind, BootstrapType::Pkex);
    assert_eq!(received_profiles(air.events(0)).len(), 1);
}

#[test]
fn pkex_wrong_code_is_possible_mismatch() {
    let air = pkex_pair("secret", "wrong code");
    let mismatch = |e: &Event| {
        matches!(
            e,
            Event::Fail {
                reason: FailureReason::PossibleCodeMismatch,
                ..
            }
        )
    };
    assert_eq!(count(air.events(0), mismatch) + count(air.events(1), mismatch), 1);
    for idx in 0..2 {
        assert_eq!(count(air.events(idx), |e| matches!(e, Event::PkexDone { .. })), 0);
        assert_eq!(count(air.events(idx), |e| matches!(e, Event::AuthSuccess { .. })), 0);
    }
}

// ─── Idempotence ──────────────────────────────────────────────────────

#[test]
fn duplicate_handshake_frames_do_not_advance_twice() {
    for dup in [FrameType::AuthResp, FrameType::AuthConf, FrameType::ConfigurationResult] {
        let (mut air, _) = pair(Capability::Enrollee, Capability::Configurator);
        air.duplicate = Some(dup);
        qr_configure(&mut air, psk_conf("secret passphrase"));

        for idx in 0..2 {
            assert_eq!(
                count(air.events(idx), |e| matches!(e, Event::AuthSuccess { .. })),
                1,
                "{dup:?} on device {idx}"
            );
            assert_eq!(count(air.events(idx), |e| matches!(e, Event::Fail { .. })), 0);
        }
        assert_eq!(received_profiles(air.events(0)).len(), 1);
        assert_eq!(
            count(air.events(1), |e| matches!(e, Event::ConfResult { .. })),
            1
        );
    }
}

#[test]
fn responder_retransmits_then_gives_up_without_confirm() {
    let (mut air, _) = pair(Capability::Enrollee, Capability::Configurator);
    let own = own_bootstrap(air.engine(0), BootstrapType::QrCode, Some("81/1"));
    let uri = air.engine(0).bootstraps().get_uri(own).unwrap();
    let peer_id = air.engine(1).bootstraps_mut().parse_uri(&uri).unwrap();

    // Hand dev1's Auth Request to dev0 by hand and swallow the answers.
    let now = air.now;
    let actions = air
        .engine(1)
        .auth_init(AuthRequest::new(peer_id), now)
        .unwrap();
    let Some(Action::SendFrame { frame, .. }) = actions
        .into_iter()
        .find(|a| matches!(a, Action::SendFrame { .. }))
    else {
        panic!("no auth request");
    };
    let mut responses = 0;
    let mut failed = false;
    let mut out = air.engine(0).handle(
        Input::Frame {
            peer: DEV1,
            freq: 2412,
            frame,
        },
        now,
    );
    let mut clock = now;
    for _ in 0..20 {
        responses += out
            .iter()
            .filter(|a| matches!(a, Action::SendFrame { .. }))
            .count();
        failed |= out.contains(&Action::Event(Event::Fail {
            peer: DEV1,
            reason: FailureReason::NoConfirmReceived,
        }));
        let Some(at) = air.engine(0).next_deadline() else {
            break;
        };
        clock = at;
        out = air.engine(0).handle(Input::Tick, clock);
    }
    assert!(failed);
    assert_eq!(responses, EngineSettings::default().resp_max_tries as usize);
    assert!(!air.engine(0).has_session(DEV1));
    assert!(clock > now);
}

// ─── Scenario D: reconfiguration ─────────────────────────────────────

#[test]
fn reconfiguration_after_connector_expiry() {
    let (mut air, wall) = pair(Capability::Enrollee, Capability::Configurator);
    let conf_id = air.engine(1).configurator_add(Curve::P256, None, None).unwrap();
    let first_expiry = wall.timestamp() + 3600;
    qr_configure(&mut air, dpp_conf(conf_id, first_expiry));

    let old_ids = received_profiles(air.events(0));
    assert_eq!(old_ids.len(), 1);
    let old_id = old_ids[0];
    assert!(air.engine(0).profile(old_id).unwrap().net_access_key.is_some());

    // Two hours later the Connector has expired.
    air.advance(Duration::from_secs(7200));
    let second_expiry = wall.timestamp() + 3 * 3600;
    air.engine(1)
        .set_conf_params(Some(dpp_conf(conf_id, second_expiry)))
        .unwrap();
    air.call(0, |e, now| e.reconfig(old_id, 1, now).unwrap());

    assert!(air.events(1).iter().any(|e| matches!(
        e,
        Event::ReconfigAnnouncement { peer, configurator_id, .. }
            if *peer == DEV0 && *configurator_id == conf_id
    )));
    assert!(air.events(1).contains(&Event::ReconfigAuthSuccess {
        peer: DEV0,
        initiator: true,
    }));
    assert!(air.events(0).contains(&Event::ReconfigAuthSuccess {
        peer: DEV1,
        initiator: false,
    }));
    assert!(air.events(0).contains(&Event::ChirpStopped));

    let ids = received_profiles(air.events(0));
    assert_eq!(ids.len(), 2);
    let new_id = ids[1];
    assert_ne!(new_id, old_id);

    let expiry_of = |air: &mut Air, id: u32| {
        let connector = air.engine(0).profile(id).unwrap().connector().unwrap().to_string();
        decode_claims(&connector).unwrap().expiry
    };
    let old_expiry = expiry_of(&mut air, old_id);
    let new_expiry = expiry_of(&mut air, new_id);
    assert!(old_expiry.is_some() && new_expiry.is_some());
    assert_ne!(old_expiry, new_expiry);

    // The new Connector names the fresh key, not the old one.
    let old_key = air.engine(0).profile(old_id).unwrap().net_access_key.clone().unwrap();
    let new_key = air.engine(0).profile(new_id).unwrap().net_access_key.clone().unwrap();
    assert_ne!(old_key.public(), new_key.public());
}

#[test]
fn reconfig_announcement_from_unknown_network_is_ignored() {
    let (mut air, wall) = pair(Capability::Enrollee, Capability::Configurator);
    let conf_id = air.engine(1).configurator_add(Curve::P256, None, None).unwrap();
    qr_configure(&mut air, dpp_conf(conf_id, wall.timestamp() + 3600));
    let profile = received_profiles(air.events(0))[0];

    // A different Configurator takes over dev1.
    air.engine(1)
        .configurator_remove(dpp_core::bootstrap::Selector::All)
        .unwrap();
    let other = air.engine(1).configurator_add(Curve::P256, None, None).unwrap();
    air.engine(1)
        .set_conf_params(Some(dpp_conf(other, wall.timestamp() + 3600)))
        .unwrap();
    air.call(0, |e, now| e.reconfig(profile, 1, now).unwrap());

    assert_eq!(
        count(air.events(1), |e| matches!(e, Event::ReconfigAnnouncement { .. })),
        0
    );
    assert_eq!(received_profiles(air.events(0)).len(), 1);
}

// ─── Network introduction ─────────────────────────────────────────────

#[test]
fn station_and_ap_agree_on_pmkid() {
    let (mut air, wall) = pair(Capability::Enrollee, Capability::Configurator);
    let conf_id = air.engine(1).configurator_add(Curve::P256, None, None).unwrap();
    qr_configure(&mut air, dpp_conf(conf_id, wall.timestamp() + 3600));
    let sta_profile = received_profiles(air.events(0))[0];

    let ap_conf = NetworkConf::new(NetRole::Ap, Akm::Dpp, b"test".to_vec());
    let ap_profile = air.engine(1).configurator_sign(conf_id, &ap_conf).unwrap();
    air.engine(1).set_ap_profile(Some(ap_profile)).unwrap();

    air.call(0, |e, _| e.peer_discovery(sta_profile, DEV1, 2412).unwrap());

    let pmkid = |events: &[Event]| {
        events.iter().find_map(|e| match e {
            Event::Introduction { pmkid, .. } => Some(*pmkid),
            _ => None,
        })
    };
    let sta = pmkid(air.events(0)).expect("station introduction");
    let ap = pmkid(air.events(1)).expect("AP introduction");
    assert_eq!(sta, ap);
}

#[test]
fn expired_station_connector_gets_invalid_connector() {
    let (mut air, wall) = pair(Capability::Enrollee, Capability::Configurator);
    let conf_id = air.engine(1).configurator_add(Curve::P256, None, None).unwrap();
    qr_configure(&mut air, dpp_conf(conf_id, wall.timestamp() + 60));
    let sta_profile = received_profiles(air.events(0))[0];
    let ap_conf = NetworkConf::new(NetRole::Ap, Akm::Dpp, b"test".to_vec());
    let ap_profile = air.engine(1).configurator_sign(conf_id, &ap_conf).unwrap();
    air.engine(1).set_ap_profile(Some(ap_profile)).unwrap();

    air.advance(Duration::from_secs(120));
    air.call(0, |e, _| e.peer_discovery(sta_profile, DEV1, 2412).unwrap());

    assert!(air.events(1).contains(&Event::IntroFailed {
        peer: DEV0,
        status: StatusCode::InvalidConnector,
    }));
    assert!(air.events(0).contains(&Event::IntroFailed {
        peer: DEV1,
        status: StatusCode::InvalidConnector,
    }));
}

// ─── Faults and transport failures ────────────────────────────────────

#[test]
fn injected_sign_failure_fails_configuration_cleanly() {
    let faults = FaultInjector::enabled();
    let (mut air, wall) = pair(Capability::Enrollee, Capability::Configurator);
    air.devs[1].engine = Engine::with_clock(settings(Capability::Configurator), air.now, wall)
        .with_faults(faults.clone());
    let conf_id = air.engine(1).configurator_add(Curve::P256, None, None).unwrap();
    faults.arm(FaultPoint::Sign, 1);

    qr_configure(&mut air, dpp_conf(conf_id, wall.timestamp() + 3600));
    assert_eq!(faults.fired(), vec![FaultPoint::Sign]);
    assert_eq!(
        count(air.events(1), |e| matches!(e, Event::ConfFailed { .. })),
        1
    );
    assert!(!air.engine(1).has_session(DEV0));

    // The Enrollee never hears back and gives up after its budget.
    assert!(received_profiles(air.events(0)).is_empty());
    air.advance(EngineSettings::default().conf_budget() + Duration::from_millis(1));
    assert!(air.events(0).contains(&Event::ConfFailed {
        peer: DEV1,
        reason: FailureReason::Timeout,
    }));
    assert_eq!(air.engine(0).session_count(), 0);
}

#[test]
fn unanswered_initiator_walks_channels_then_fails() {
    let t0 = Instant::now();
    let mut responder = Engine::with_clock(EngineSettings::default(), t0, Utc::now());
    let own = own_bootstrap(&mut responder, BootstrapType::QrCode, Some("81/1,115/36"));
    let uri = responder.bootstraps().get_uri(own).unwrap();

    let mut initiator = Engine::with_clock(EngineSettings::default(), t0, Utc::now());
    let peer_id = initiator.bootstraps_mut().parse_uri(&uri).unwrap();
    let mut freqs = Vec::new();
    let collect = |actions: Vec<Action>, freqs: &mut Vec<u32>| {
        let mut failed = false;
        for a in actions {
            match a {
                Action::SendFrame { freq, .. } => freqs.push(freq),
                Action::Event(Event::AuthInitFailed { .. }) => failed = true,
                _ => {}
            }
        }
        failed
    };
    let mut failed = collect(
        initiator.auth_init(AuthRequest::new(peer_id), t0).unwrap(),
        &mut freqs,
    );
    while let Some(at) = initiator.next_deadline() {
        failed |= collect(initiator.handle(Input::Tick, at), &mut freqs);
    }
    assert!(failed);
    let sweeps = EngineSettings::default().init_max_tries as usize;
    assert_eq!(freqs.len(), 2 * sweeps);
    assert_eq!(&freqs[..2], &[2412, 5180]);
    assert!(freqs.chunks(2).all(|c| c == [2412, 5180]));
}
