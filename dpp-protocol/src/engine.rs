//! The DPP engine: bootstrap keys, Configurators, stored network
//! profiles and at most one session per peer.
//!
//! The engine is sans-IO. The host feeds [`Input`]s and carries out the
//! returned [`Action`]s; time only enters as the `now` argument, and due
//! timers run when the host sends [`Input::Tick`] at or after
//! [`Engine::next_deadline`]. Wall-clock time (Connector expiry) is the
//! engine's epoch plus the elapsed `Instant`.
//!
//! Session lifetime and timers are tied together: a session stores the
//! id of its single pending timer, the id is cancelled when the session
//! ends, and a fired timer that no longer matches its session is ignored.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dpp_core::bootstrap::{BootstrapInfo, BootstrapManager};
use dpp_core::crypto::{Curve, KeyPair, PublicKey};
use dpp_core::errors::StatusCode;
use dpp_core::fault::FaultInjector;
use dpp_core::frame::{DppFrame, FrameType};
use tracing::{debug, info, warn};

use crate::auth::{AuthSession, AuthState, ConfirmOutcome, RequestOutcome, ResponseOutcome, Side};
use crate::capability::{Capability, Role};
use crate::config::{
    CertificateAuthority, ConfParams, ConfigAttributes, ConfigObject, ConfiguratorExchange,
    ConfiguratorStore, ConnStatus, CsrProvider, EnrolleeExchange, EnrolleeOutcome, NetworkConf,
    NetworkProfile,
};
use crate::connector::{build_peer_disc_req, build_peer_disc_resp, parse_peer_disc, peer_intro};
use crate::errors::{Dropped, FailureReason, ProtocolError};
use crate::events::{Action, Event, Input, Peer};
use crate::pkex::{PkexCode, PkexLimiter, PkexOutcome, PkexRequestOutcome, PkexSession, PkexState};
use crate::presence::{
    build_presence_announcement, parse_presence_announcement, ChirpSchedule, ChirpStep,
};
use crate::reconfig::{
    build_announcement, parse_announcement, ReconfigOutcome, ReconfigSession, ReconfigState,
};
use crate::settings::EngineSettings;
use crate::timers::{TimerId, Timers};

/// Channel used when neither the request nor the bootstrap names one.
const DEFAULT_INIT_FREQ: u32 = 2412;

/// Start an Authentication exchange as Initiator.
#[derive(Debug, Clone, Default)]
pub struct AuthRequest {
    pub peer_bootstrap: u32,
    /// Own bootstrap to offer for mutual authentication.
    pub own_bootstrap: Option<u32>,
    /// Destination; defaults to the bootstrap's MAC, then broadcast.
    pub peer: Option<Peer>,
    pub freq: Option<u32>,
    /// Overrides `allowed_roles` for this exchange.
    pub role: Option<Capability>,
    /// Configuration to hand out if we end up Configurator.
    pub conf: Option<ConfParams>,
}

impl AuthRequest {
    pub fn new(peer_bootstrap: u32) -> Self {
        Self {
            peer_bootstrap,
            ..Default::default()
        }
    }
}

/// Register a PKEX code, optionally initiating towards a peer.
#[derive(Debug, Clone)]
pub struct PkexRequest {
    pub own_bootstrap: u32,
    pub identifier: Option<String>,
    pub code: String,
    pub initiate: Option<(Peer, u32)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    Session(Peer),
    Chirp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfPhase {
    AwaitRequest,
    AwaitResult,
    AwaitConnStatus,
}

enum Stage {
    /// Placeholder while a handler owns the real stage.
    Idle,
    Auth(Box<AuthSession>),
    Pkex(Box<PkexSession>),
    Reconfig(Box<ReconfigSession>),
    EnrolleeConf {
        exchange: EnrolleeExchange,
        /// Private half of the key the Connector will name.
        key: KeyPair,
    },
    /// Configured; the Configurator asked for a Connection Status Result.
    EnrolleeAwaitStatus { exchange: EnrolleeExchange },
    ConfiguratorConf {
        exchange: ConfiguratorExchange,
        phase: ConfPhase,
    },
}

impl Stage {
    fn name(&self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::Auth(_) => "auth",
            Stage::Pkex(_) => "pkex",
            Stage::Reconfig(_) => "reconfig",
            Stage::EnrolleeConf { .. } => "enrollee-conf",
            Stage::EnrolleeAwaitStatus { .. } => "enrollee-status",
            Stage::ConfiguratorConf { .. } => "configurator-conf",
        }
    }
}

struct Session {
    freq: u32,
    stage: Stage,
    timer: Option<TimerId>,
    /// Transmissions (Responder, PKEX) or channel sweeps (Initiator).
    tries: u32,
    channels: Vec<u32>,
    channel: usize,
    /// Initiator finished a sweep and waits before the next one.
    deferred: bool,
    last_sent: Option<DppFrame>,
    conf: Option<ConfParams>,
}

impl Session {
    fn new(freq: u32, stage: Stage) -> Self {
        Self {
            freq,
            stage,
            timer: None,
            tries: 1,
            channels: vec![freq],
            channel: 0,
            deferred: false,
            last_sent: None,
            conf: None,
        }
    }

    fn take_stage(&mut self) -> Stage {
        std::mem::replace(&mut self.stage, Stage::Idle)
    }
}

struct ChirpRun {
    plan: ChirpSchedule,
    timer: Option<TimerId>,
}

pub struct Engine {
    settings: EngineSettings,
    faults: FaultInjector,
    origin: Instant,
    origin_wall: DateTime<Utc>,
    bootstraps: BootstrapManager,
    configurators: ConfiguratorStore,
    profiles: BTreeMap<u32, NetworkProfile>,
    next_profile_id: u32,
    sessions: BTreeMap<Peer, Session>,
    timers: Timers<TimerKind>,
    out: Vec<Action>,
    conf_params: Option<ConfParams>,
    pkex: Option<(u32, PkexCode)>,
    pkex_limiter: PkexLimiter,
    chirp: Option<ChirpRun>,
    reconfig_profile: Option<u32>,
    ap_profile: Option<u32>,
    intro_pending: BTreeMap<Peer, (u8, u32)>,
    listen_freq: Option<u32>,
    next_tid: u8,
    ca: Option<Box<dyn CertificateAuthority>>,
    csr: Option<Box<dyn CsrProvider>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("sessions", &self.sessions.len())
            .field("profiles", &self.profiles.len())
            .field("timers", &self.timers.len())
            .finish_non_exhaustive()
    }
}

fn config_error(e: crate::config::ConfigError) -> ProtocolError {
    ProtocolError::InvalidConfig(e.to_string())
}

impl Engine {
    pub fn new(settings: EngineSettings) -> Self {
        Self::with_clock(settings, Instant::now(), Utc::now())
    }

    /// Engine whose wall clock reads `wall` at `origin`.
    pub fn with_clock(settings: EngineSettings, origin: Instant, wall: DateTime<Utc>) -> Self {
        let pkex_limiter = PkexLimiter::new(settings.pkex_t_limit);
        Self {
            settings,
            faults: FaultInjector::disabled(),
            origin,
            origin_wall: wall,
            bootstraps: BootstrapManager::new(),
            configurators: ConfiguratorStore::new(),
            profiles: BTreeMap::new(),
            next_profile_id: 0,
            sessions: BTreeMap::new(),
            timers: Timers::new(),
            out: Vec::new(),
            conf_params: None,
            pkex: None,
            pkex_limiter,
            chirp: None,
            reconfig_profile: None,
            ap_profile: None,
            intro_pending: BTreeMap::new(),
            listen_freq: None,
            next_tid: 0,
            ca: None,
            csr: None,
        }
    }

    pub fn with_faults(mut self, faults: FaultInjector) -> Self {
        self.faults = faults;
        self
    }

    /// Start from existing provisioning state.
    pub fn with_state(
        mut self,
        bootstraps: BootstrapManager,
        configurators: ConfiguratorStore,
    ) -> Self {
        self.bootstraps = bootstraps;
        self.configurators = configurators;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut EngineSettings {
        &mut self.settings
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    pub fn bootstraps(&self) -> &BootstrapManager {
        &self.bootstraps
    }

    pub fn bootstraps_mut(&mut self) -> &mut BootstrapManager {
        &mut self.bootstraps
    }

    pub fn configurators(&self) -> &ConfiguratorStore {
        &self.configurators
    }

    pub fn configurator_add(
        &mut self,
        curve: Curve,
        csign_key: Option<&[u8]>,
        pp_key: Option<&[u8]>,
    ) -> Result<u32, ProtocolError> {
        self.configurators
            .add(curve, csign_key, pp_key, &self.faults)
            .map_err(config_error)
    }

    pub fn configurator_remove(
        &mut self,
        which: dpp_core::bootstrap::Selector,
    ) -> Result<(), ProtocolError> {
        Ok(self.configurators.remove(which)?)
    }

    /// C-sign private key of a Configurator, hex encoded.
    pub fn configurator_get_key(&self, id: u32) -> Result<String, ProtocolError> {
        self.configurators
            .get_key(id)
            .map_err(|_| ProtocolError::UnknownConfigurator(id))
    }

    /// Provision this device from one of its own Configurators.
    pub fn configurator_sign(&mut self, id: u32, conf: &NetworkConf) -> Result<u32, ProtocolError> {
        let configurator = self
            .configurators
            .get(id)
            .ok_or(ProtocolError::UnknownConfigurator(id))?;
        let (object, key) = configurator
            .self_configure(conf, &self.faults)
            .map_err(config_error)?;
        Ok(self.add_profile(object, key))
    }

    pub fn profiles(&self) -> impl Iterator<Item = &NetworkProfile> {
        self.profiles.values()
    }

    pub fn profile(&self, id: u32) -> Option<&NetworkProfile> {
        self.profiles.get(&id)
    }

    pub fn remove_profile(&mut self, id: u32) -> Result<NetworkProfile, ProtocolError> {
        self.profiles.remove(&id).ok_or(ProtocolError::UnknownProfile(id))
    }

    /// Configuration handed out when a peer reaches us without an
    /// explicit per-exchange configuration (chirp, reconfiguration,
    /// Responder role).
    pub fn set_conf_params(&mut self, params: Option<ConfParams>) -> Result<(), ProtocolError> {
        if let Some(p) = &params {
            p.validate().map_err(config_error)?;
            if let Some(id) = p.configurator {
                self.configurators
                    .get(id)
                    .ok_or(ProtocolError::UnknownConfigurator(id))?;
            }
        }
        self.conf_params = params;
        Ok(())
    }

    pub fn set_certificate_authority(&mut self, ca: Box<dyn CertificateAuthority>) {
        self.ca = Some(ca);
    }

    pub fn set_csr_provider(&mut self, provider: Box<dyn CsrProvider>) {
        self.csr = Some(provider);
    }

    /// Answer Peer Discovery Requests with this profile's Connector.
    pub fn set_ap_profile(&mut self, id: Option<u32>) -> Result<(), ProtocolError> {
        if let Some(id) = id {
            self.profiles.get(&id).ok_or(ProtocolError::UnknownProfile(id))?;
        }
        self.ap_profile = id;
        Ok(())
    }

    pub fn has_session(&self, peer: Peer) -> bool {
        self.sessions.contains_key(&peer)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub fn listen(&mut self, freq: u32) -> Vec<Action> {
        self.listen_freq = Some(freq);
        self.out.push(Action::Listen {
            freq,
            duration: None,
        });
        self.flush()
    }

    pub fn stop_listen(&mut self) -> Vec<Action> {
        self.listen_freq = None;
        self.out.push(Action::StopListen);
        self.flush()
    }

    fn flush(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.out)
    }

    fn emit(&mut self, event: Event) {
        self.out.push(Action::Event(event));
    }

    fn send(&mut self, peer: Peer, freq: u32, frame: DppFrame) {
        debug!(%peer, freq, frame_type = ?frame.frame_type, "tx");
        self.out.push(Action::SendFrame { peer, freq, frame });
    }

    fn send_tracked(&mut self, peer: Peer, s: &mut Session, frame: DppFrame) {
        s.last_sent = Some(frame.clone());
        self.send(peer, s.freq, frame);
    }

    fn wall(&self, now: Instant) -> DateTime<Utc> {
        let elapsed = now.saturating_duration_since(self.origin);
        self.origin_wall
            + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero())
    }

    fn arm(&mut self, peer: Peer, s: &mut Session, at: Instant) {
        if let Some(old) = s.timer.take() {
            self.timers.cancel(old);
        }
        s.timer = Some(self.timers.schedule(at, TimerKind::Session(peer)));
    }

    fn disarm(&mut self, s: &mut Session) {
        if let Some(old) = s.timer.take() {
            self.timers.cancel(old);
        }
    }

    fn keep(&mut self, peer: Peer, s: Session) {
        self.sessions.insert(peer, s);
    }

    fn end(&mut self, peer: Peer, mut s: Session) {
        self.disarm(&mut s);
        debug!(%peer, stage = s.stage.name(), "session closed");
    }

    fn fail(&mut self, peer: Peer, s: Session, reason: FailureReason) {
        warn!(%peer, %reason, "session failed");
        self.emit(Event::Fail { peer, reason });
        self.end(peer, s);
    }

    fn tid(&mut self) -> u8 {
        self.next_tid = self.next_tid.wrapping_add(1);
        self.next_tid
    }

    fn add_profile(&mut self, object: ConfigObject, key: KeyPair) -> u32 {
        self.next_profile_id += 1;
        let id = self.next_profile_id;
        let net_access_key = object.credential.dpp().map(|_| key);
        info!(id, akm = %object.credential.akm(), "network profile stored");
        self.profiles.insert(
            id,
            NetworkProfile {
                id,
                object,
                net_access_key,
            },
        );
        id
    }

    fn config_attributes(&self) -> ConfigAttributes {
        ConfigAttributes::new(self.settings.device_name.clone(), self.settings.net_role)
    }

    fn dropped(&self, peer: Peer, what: FrameType, why: Dropped) {
        debug!(%peer, frame_type = ?what, %why, "frame dropped");
    }

    /// Abort whatever runs with `peer`.
    pub fn abort(&mut self, peer: Peer) -> Vec<Action> {
        if let Some(s) = self.sessions.remove(&peer) {
            self.fail(peer, s, FailureReason::Aborted);
        }
        self.flush()
    }

    // ----- Authentication -------------------------------------------------

    pub fn auth_init(
        &mut self,
        req: AuthRequest,
        now: Instant,
    ) -> Result<Vec<Action>, ProtocolError> {
        self.start_auth(req, now)?;
        Ok(self.flush())
    }

    fn start_auth(&mut self, req: AuthRequest, now: Instant) -> Result<(), ProtocolError> {
        let peer_bi = self
            .bootstraps
            .get(req.peer_bootstrap)
            .ok_or(ProtocolError::UnknownBootstrap(req.peer_bootstrap))?
            .clone();
        let own_bi = match req.own_bootstrap {
            Some(id) => {
                let bi = self.bootstraps.get(id).ok_or(ProtocolError::UnknownBootstrap(id))?;
                if !bi.is_own() {
                    return Err(ProtocolError::NotOwnKey(id));
                }
                Some(bi.clone())
            }
            None => None,
        };
        let peer = req
            .peer
            .or_else(|| peer_bi.mac.map(Peer))
            .unwrap_or(Peer::BROADCAST);
        if self.sessions.contains_key(&peer) {
            return Err(ProtocolError::AlreadyInExchange {
                peer: peer.to_string(),
            });
        }
        if let Some(conf) = &req.conf {
            conf.validate().map_err(config_error)?;
        }
        let mut params = self.settings.auth_params();
        if let Some(role) = req.role {
            params.capability = role;
        }
        let (auth, frame) = AuthSession::initiate(own_bi.as_ref(), &peer_bi, params, &self.faults)?;

        let channels = match req.freq {
            Some(f) => vec![f],
            None if !peer_bi.freqs.is_empty() => peer_bi.freqs.clone(),
            None => vec![self.listen_freq.unwrap_or(DEFAULT_INIT_FREQ)],
        };
        let mut s = Session::new(channels[0], Stage::Auth(Box::new(auth)));
        s.channels = channels;
        s.conf = req.conf;
        info!(%peer, freq = s.freq, bootstrap = peer_bi.id, "auth request");
        self.send_tracked(peer, &mut s, frame);
        self.arm(peer, &mut s, now + self.settings.resp_wait());
        self.keep(peer, s);
        Ok(())
    }

    /// A peer bootstrap key was added; answer any Initiator we told to
    /// wait for it.
    pub fn peer_bootstrap_added(
        &mut self,
        bootstrap_id: u32,
        now: Instant,
    ) -> Result<Vec<Action>, ProtocolError> {
        let bi = self
            .bootstraps
            .get(bootstrap_id)
            .ok_or(ProtocolError::UnknownBootstrap(bootstrap_id))?
            .clone();
        let waiting: Vec<Peer> = self
            .sessions
            .iter()
            .filter(|(_, s)| {
                matches!(&s.stage, Stage::Auth(a) if *a.state() == AuthState::AwaitingPeerBootstrap)
            })
            .map(|(p, _)| *p)
            .collect();
        for peer in waiting {
            if let Some(mut s) = self.sessions.remove(&peer) {
                let result = match &mut s.stage {
                    Stage::Auth(a) => a.resume_with_peer(&bi, &self.faults),
                    _ => Err(ProtocolError::InvalidState("not waiting for a bootstrap")),
                };
                match result {
                    Ok(frame) => {
                        info!(%peer, "peer bootstrap known, sending auth response");
                        s.tries = 1;
                        self.send_tracked(peer, &mut s, frame);
                        self.arm(peer, &mut s, now + self.settings.resp_retry());
                        self.keep(peer, s);
                    }
                    Err(e) => {
                        debug!(%peer, %e, "bootstrap does not fit waiting session");
                        self.keep(peer, s);
                    }
                }
            }
        }
        Ok(self.flush())
    }

    fn is_finished(s: &Session) -> bool {
        matches!(&s.stage, Stage::Pkex(p) if *p.state() == PkexState::Done)
    }

    fn rx_auth_req(&mut self, peer: Peer, freq: u32, frame: DppFrame, now: Instant) {
        if let Some(s) = self.sessions.get(&peer) {
            if Self::is_finished(s) {
                if let Some(mut s) = self.sessions.remove(&peer) {
                    self.disarm(&mut s);
                }
            } else {
                let resend = match &s.stage {
                    Stage::Auth(a) if a.side() == Side::Responder => s.last_sent.clone(),
                    _ => None,
                };
                match resend {
                    Some(f) => self.send(peer, freq, f),
                    None => debug!(%peer, "auth request while busy"),
                }
                return;
            }
        }
        let params = self.settings.auth_params();
        let (auth, outcome) =
            match AuthSession::respond(&self.bootstraps, &frame, params, &self.faults) {
                Ok(v) => v,
                Err(why) => return self.dropped(peer, frame.frame_type, why),
            };
        match outcome {
            RequestOutcome::Respond(resp) => {
                self.stop_chirp();
                let mut s = Session::new(freq, Stage::Auth(Box::new(auth)));
                self.send_tracked(peer, &mut s, resp);
                self.arm(peer, &mut s, now + self.settings.resp_retry());
                self.keep(peer, s);
            }
            RequestOutcome::Pending(resp) => {
                let mut s = Session::new(freq, Stage::Auth(Box::new(auth)));
                self.send_tracked(peer, &mut s, resp);
                self.emit(Event::ScanPeerQrCode { peer });
                self.arm(peer, &mut s, now + self.settings.resp_retry());
                self.keep(peer, s);
            }
            RequestOutcome::NotCompatible(resp) => {
                self.send(peer, freq, resp);
                self.emit(Event::NotCompatible {
                    peer,
                    initiator: false,
                });
            }
        }
    }

    fn rx_auth_resp(&mut self, peer: Peer, freq: u32, frame: DppFrame, now: Instant) {
        let key = if self.sessions.contains_key(&peer) {
            peer
        } else {
            Peer::BROADCAST
        };
        let Some(mut s) = self.sessions.remove(&key) else {
            return self.dropped(peer, frame.frame_type, Dropped::Unexpected);
        };
        let outcome = match &mut s.stage {
            Stage::Auth(a) => a.rx_response(&frame, &self.faults),
            _ => Err(Dropped::Unexpected),
        };
        let outcome = match outcome {
            Ok(o) => o,
            Err(why) => {
                self.keep(key, s);
                return self.dropped(peer, frame.frame_type, why);
            }
        };
        s.freq = freq;
        match outcome {
            ResponseOutcome::Authenticated(confirm) => {
                self.send(peer, freq, confirm);
                self.auth_success(peer, s, true, now);
            }
            ResponseOutcome::Pending => {
                self.emit(Event::ResponsePending { peer });
                self.arm(peer, &mut s, now + self.settings.init_retry());
                self.keep(peer, s);
            }
            ResponseOutcome::Failed { reason, confirm } => {
                if let Some(c) = confirm {
                    self.send(peer, freq, c);
                }
                if reason == FailureReason::NotCompatible {
                    self.emit(Event::NotCompatible {
                        peer,
                        initiator: true,
                    });
                    self.end(peer, s);
                } else {
                    self.fail(peer, s, reason);
                }
            }
        }
    }

    fn rx_auth_conf(&mut self, peer: Peer, frame: DppFrame, now: Instant) {
        let Some(mut s) = self.sessions.remove(&peer) else {
            return self.dropped(peer, frame.frame_type, Dropped::Unexpected);
        };
        let outcome = match &mut s.stage {
            Stage::Auth(a) => a.rx_confirm(&frame, &self.faults),
            _ => Err(Dropped::Unexpected),
        };
        match outcome {
            Ok(ConfirmOutcome::Authenticated) => self.auth_success(peer, s, false, now),
            Ok(ConfirmOutcome::Failed(reason)) => self.fail(peer, s, reason),
            Err(why) => {
                self.keep(peer, s);
                self.dropped(peer, frame.frame_type, why);
            }
        }
    }

    fn auth_success(&mut self, peer: Peer, mut s: Session, initiator: bool, now: Instant) {
        self.disarm(&mut s);
        let Stage::Auth(auth) = s.take_stage() else {
            return;
        };
        let Some(role) = auth.own_role() else {
            return self.fail(peer, s, FailureReason::NotCompatible);
        };
        self.emit(Event::AuthSuccess {
            peer,
            initiator,
            role,
            mutual: auth.is_mutual(),
        });
        match role {
            Role::Enrollee => {
                let attrs = self.config_attributes();
                let exchange = EnrolleeExchange::new(
                    auth.curve(),
                    auth.ke(),
                    auth.peer_version(),
                    auth.protocol_key().public().clone(),
                    attrs,
                );
                s.stage = Stage::EnrolleeConf {
                    exchange,
                    key: auth.protocol_key().clone(),
                };
                self.send_conf_request(peer, s, now);
            }
            Role::Configurator => {
                let Some(peer_key) = auth.peer_protocol_key().cloned() else {
                    return self.fail(peer, s, FailureReason::InvalidPeerKey);
                };
                self.serve_config(peer, s, auth.ke(), auth.peer_version(), peer_key, now);
            }
        }
    }

    // ----- Configuration --------------------------------------------------

    fn serve_config(
        &mut self,
        peer: Peer,
        mut s: Session,
        ke: &[u8],
        peer_version: u8,
        peer_key: PublicKey,
        now: Instant,
    ) {
        s.stage = Stage::ConfiguratorConf {
            exchange: ConfiguratorExchange::new(ke, peer_version, peer_key),
            phase: ConfPhase::AwaitRequest,
        };
        self.arm(peer, &mut s, now + self.settings.conf_budget());
        self.keep(peer, s);
    }

    fn send_conf_request(&mut self, peer: Peer, mut s: Session, now: Instant) {
        let body = match &mut s.stage {
            Stage::EnrolleeConf { exchange, .. } => exchange.request(&self.faults),
            _ => return,
        };
        match body {
            Ok(body) => {
                self.out.push(Action::GasQuery {
                    peer,
                    freq: s.freq,
                    body,
                });
                self.arm(peer, &mut s, now + self.settings.conf_budget());
                self.keep(peer, s);
            }
            Err(e) => {
                let reason = FailureReason::from_crypto(&e, "ke");
                self.conf_failed(peer, s, reason);
            }
        }
    }

    fn conf_failed(&mut self, peer: Peer, s: Session, reason: FailureReason) {
        warn!(%peer, %reason, "configuration failed");
        self.emit(Event::ConfFailed { peer, reason });
        self.end(peer, s);
    }

    fn rx_gas_response(&mut self, peer: Peer, body: Vec<u8>, now: Instant) {
        let Some(mut s) = self.sessions.remove(&peer) else {
            return debug!(%peer, "GAS response without session");
        };
        let (mut exchange, key) = match s.take_stage() {
            Stage::EnrolleeConf { exchange, key } => (exchange, key),
            other => {
                s.stage = other;
                self.keep(peer, s);
                return debug!(%peer, "GAS response in wrong state");
            }
        };
        self.disarm(&mut s);
        match exchange.rx_response(&body, self.wall(now), &self.faults) {
            Ok(EnrolleeOutcome::Configured {
                objects,
                send_conn_status,
            }) => {
                let profile_ids: Vec<u32> = objects
                    .into_iter()
                    .map(|o| self.add_profile(o, key.clone()))
                    .collect();
                info!(%peer, ?profile_ids, "configuration received");
                self.emit(Event::ConfReceived { peer, profile_ids });
                if exchange.peer_version() >= 2 {
                    match exchange.result_frame(StatusCode::Ok, &self.faults) {
                        Ok(f) => self.send(peer, s.freq, f),
                        Err(e) => warn!(%peer, %e, "could not build configuration result"),
                    }
                }
                if send_conn_status {
                    s.stage = Stage::EnrolleeAwaitStatus { exchange };
                    self.arm(peer, &mut s, now + self.settings.status_wait());
                    self.keep(peer, s);
                } else {
                    self.end(peer, s);
                }
            }
            Ok(EnrolleeOutcome::CsrNeeded { csr_attrs }) => {
                self.emit(Event::CsrRequested { peer });
                let csr = match &self.csr {
                    Some(provider) => provider.generate_csr(&csr_attrs),
                    None => Err("no CSR provider".to_string()),
                };
                match csr {
                    Ok(der) => {
                        exchange.set_csr(&der);
                        s.stage = Stage::EnrolleeConf { exchange, key };
                        self.send_conf_request(peer, s, now);
                    }
                    Err(e) => self.conf_failed(peer, s, FailureReason::Config(e)),
                }
            }
            Err(reason) => {
                if exchange.peer_version() >= 2 {
                    if let Ok(f) = exchange.result_frame(StatusCode::ConfigRejected, &self.faults) {
                        self.send(peer, s.freq, f);
                    }
                }
                self.conf_failed(peer, s, reason);
            }
        }
    }

    fn rx_gas_request(&mut self, peer: Peer, token: u8, body: Vec<u8>, now: Instant) {
        let Some(mut s) = self.sessions.remove(&peer) else {
            return debug!(%peer, "config request without session");
        };
        let mut exchange = match s.take_stage() {
            Stage::ConfiguratorConf {
                exchange,
                phase: ConfPhase::AwaitRequest,
            } => exchange,
            other => {
                s.stage = other;
                self.keep(peer, s);
                return debug!(%peer, "config request in wrong state");
            }
        };
        let request = exchange.rx_request(&body, &self.faults).map(|attrs| attrs.clone());
        let request = match request {
            Ok(attrs) => attrs,
            Err(why) => {
                s.stage = Stage::ConfiguratorConf {
                    exchange,
                    phase: ConfPhase::AwaitRequest,
                };
                self.keep(peer, s);
                return debug!(%peer, %why, "config request dropped");
            }
        };
        self.emit(Event::ConfRequestReceived {
            peer,
            name: request.name.clone(),
            net_role: request.net_role,
        });
        let params = s
            .conf
            .clone()
            .or_else(|| self.conf_params.clone())
            .unwrap_or_default();
        let reply = {
            let configurator = params.configurator.and_then(|id| self.configurators.get(id));
            exchange.respond(&params, configurator, self.ca.as_deref(), &self.faults)
        };
        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                let reason = FailureReason::from_crypto(&e, "ke");
                return self.conf_failed(peer, s, reason);
            }
        };
        self.out.push(Action::GasReply {
            peer,
            token,
            body: reply.body,
        });
        info!(%peer, status = %reply.status, objects = reply.objects, "configuration sent");
        self.emit(Event::ConfSent {
            peer,
            status: reply.status,
        });
        let next = match reply.status {
            StatusCode::CsrNeeded => Some((ConfPhase::AwaitRequest, self.settings.conf_budget())),
            StatusCode::Ok if exchange.expects_result() => {
                Some((ConfPhase::AwaitResult, self.settings.result_wait()))
            }
            _ => None,
        };
        match next {
            Some((phase, wait)) => {
                s.stage = Stage::ConfiguratorConf { exchange, phase };
                self.arm(peer, &mut s, now + wait);
                self.keep(peer, s);
            }
            None => self.end(peer, s),
        }
    }

    fn rx_conf_result(&mut self, peer: Peer, frame: DppFrame, now: Instant) {
        let Some(mut s) = self.sessions.remove(&peer) else {
            return self.dropped(peer, frame.frame_type, Dropped::Unexpected);
        };
        let (exchange, phase) = match s.take_stage() {
            Stage::ConfiguratorConf { exchange, phase } => (exchange, phase),
            other => {
                s.stage = other;
                self.keep(peer, s);
                return self.dropped(peer, frame.frame_type, Dropped::Unexpected);
            }
        };
        match (frame.frame_type, phase) {
            (FrameType::ConfigurationResult, ConfPhase::AwaitResult) => {
                match exchange.rx_result(&frame, &self.faults) {
                    Ok(status) => {
                        info!(%peer, %status, "configuration result");
                        self.emit(Event::ConfResult { peer, status });
                        if status == StatusCode::Ok && exchange.conn_status_requested() {
                            s.stage = Stage::ConfiguratorConf {
                                exchange,
                                phase: ConfPhase::AwaitConnStatus,
                            };
                            self.arm(peer, &mut s, now + self.settings.status_wait());
                            self.keep(peer, s);
                        } else {
                            self.end(peer, s);
                        }
                    }
                    Err(reason) => self.fail(peer, s, reason),
                }
            }
            (FrameType::ConnectionStatusResult, ConfPhase::AwaitConnStatus) => {
                match exchange.rx_conn_status(&frame, &self.faults) {
                    Ok(status) => {
                        info!(%peer, result = status.result, "connection status result");
                        self.emit(Event::ConnStatusResult { peer, status });
                        self.end(peer, s);
                    }
                    Err(reason) => self.fail(peer, s, reason),
                }
            }
            (ty, phase) => {
                s.stage = Stage::ConfiguratorConf { exchange, phase };
                self.keep(peer, s);
                self.dropped(peer, ty, Dropped::Unexpected);
            }
        }
    }

    /// Enrollee: report how association went, when the Configurator
    /// asked for it.
    pub fn report_conn_status(
        &mut self,
        peer: Peer,
        status: ConnStatus,
    ) -> Result<Vec<Action>, ProtocolError> {
        let s = self
            .sessions
            .remove(&peer)
            .ok_or(ProtocolError::InvalidState("no connection status pending"))?;
        let frame = match &s.stage {
            Stage::EnrolleeAwaitStatus { exchange } => {
                Some(exchange.conn_status_frame(&status, &self.faults))
            }
            _ => None,
        };
        match frame {
            Some(Ok(frame)) => {
                self.send(peer, s.freq, frame);
                self.end(peer, s);
                Ok(self.flush())
            }
            Some(Err(e)) => {
                self.keep(peer, s);
                Err(e.into())
            }
            None => {
                self.keep(peer, s);
                Err(ProtocolError::InvalidState("no connection status pending"))
            }
        }
    }

    // ----- PKEX -----------------------------------------------------------

    pub fn pkex_add(
        &mut self,
        req: PkexRequest,
        now: Instant,
    ) -> Result<Vec<Action>, ProtocolError> {
        let own = self.own_bootstrap(req.own_bootstrap)?;
        let code = PkexCode::new(req.identifier.as_deref(), &req.code);
        self.pkex_limiter.reset();
        if let Some((peer, freq)) = req.initiate {
            if self.sessions.contains_key(&peer) {
                return Err(ProtocolError::AlreadyInExchange {
                    peer: peer.to_string(),
                });
            }
            let (session, frame) = PkexSession::initiate(&own, code.clone(), &self.faults)?;
            let mut s = Session::new(freq, Stage::Pkex(Box::new(session)));
            self.send_tracked(peer, &mut s, frame);
            self.arm(peer, &mut s, now + self.settings.resp_retry());
            self.keep(peer, s);
        }
        self.pkex = Some((own.id, code));
        Ok(self.flush())
    }

    pub fn pkex_remove(&mut self) {
        self.pkex = None;
        self.pkex_limiter.reset();
    }

    fn own_bootstrap(&self, id: u32) -> Result<BootstrapInfo, ProtocolError> {
        let bi = self.bootstraps.get(id).ok_or(ProtocolError::UnknownBootstrap(id))?;
        if !bi.is_own() {
            return Err(ProtocolError::NotOwnKey(id));
        }
        Ok(bi.clone())
    }

    fn rx_pkex_req(&mut self, peer: Peer, freq: u32, frame: DppFrame, now: Instant) {
        let Some((own_id, code)) = self.pkex.clone() else {
            return self.dropped(peer, frame.frame_type, Dropped::NotForUs);
        };
        if let Some(s) = self.sessions.get(&peer) {
            let resend = match &s.stage {
                Stage::Pkex(p) if p.is_repeated_request(&frame) => s.last_sent.clone(),
                _ => None,
            };
            match resend {
                Some(f) => self.send(peer, freq, f),
                None => debug!(%peer, "PKEX request while busy"),
            }
            return;
        }
        if !self.pkex_limiter.allows(&peer.to_string()) {
            return self.dropped(peer, frame.frame_type, Dropped::Limited);
        }
        let Some(own) = self.bootstraps.get(own_id).cloned() else {
            return self.dropped(peer, frame.frame_type, Dropped::NotForUs);
        };
        match PkexSession::respond(&own, &code, &frame, &self.faults) {
            Ok(PkexRequestOutcome::Respond(session, resp)) => {
                let mut s = Session::new(freq, Stage::Pkex(session));
                self.send_tracked(peer, &mut s, resp);
                let idle = self.settings.resp_retry() * self.settings.resp_max_tries;
                self.arm(peer, &mut s, now + idle);
                self.keep(peer, s);
            }
            Ok(PkexRequestOutcome::BadGroup(resp)) => self.send(peer, freq, resp),
            Err(why) => self.dropped(peer, frame.frame_type, why),
        }
    }

    fn rx_pkex(&mut self, peer: Peer, freq: u32, frame: DppFrame, now: Instant) {
        let Some(mut s) = self.sessions.remove(&peer) else {
            return self.dropped(peer, frame.frame_type, Dropped::Unexpected);
        };
        let outcome = match &mut s.stage {
            Stage::Pkex(p) => match frame.frame_type {
                FrameType::PkexExchResp => p.rx_exchange_resp(&frame, &self.faults),
                FrameType::PkexCommitRevealReq => p.rx_commit_reveal_req(&frame, &self.faults),
                FrameType::PkexCommitRevealResp => p.rx_commit_reveal_resp(&frame, &self.faults),
                _ => Err(Dropped::Unexpected),
            },
            _ => Err(Dropped::Unexpected),
        };
        let outcome = match outcome {
            Ok(o) => o,
            Err(why) => {
                // A repeated Commit-Reveal Request gets our response again.
                if why == Dropped::Unexpected
                    && frame.frame_type == FrameType::PkexCommitRevealReq
                    && Self::is_finished(&s)
                {
                    if let Some(f) = s.last_sent.clone() {
                        self.send(peer, freq, f);
                    }
                }
                self.keep(peer, s);
                return self.dropped(peer, frame.frame_type, why);
            }
        };
        match outcome {
            PkexOutcome::Send(next) => {
                s.tries = 1;
                self.send_tracked(peer, &mut s, next);
                self.arm(peer, &mut s, now + self.settings.resp_retry());
                self.keep(peer, s);
            }
            PkexOutcome::Done {
                frame: reply,
                peer_bootstrap,
            } => {
                let bootstrap_id = match self.bootstraps.find_peer_by_key(&peer_bootstrap) {
                    Some(bi) => bi.id,
                    None => match self.bootstraps.add_pkex_peer(peer_bootstrap) {
                        Ok(id) => id,
                        Err(e) => return self.fail(peer, s, FailureReason::from_crypto(&e, "z")),
                    },
                };
                info!(%peer, bootstrap_id, "PKEX done");
                self.emit(Event::PkexDone { peer, bootstrap_id });
                match reply {
                    Some(reply) => {
                        // Responder lingers to answer a repeated Commit-Reveal.
                        self.send_tracked(peer, &mut s, reply);
                        let linger = self.settings.resp_retry() * self.settings.resp_max_tries;
                        self.arm(peer, &mut s, now + linger);
                        self.keep(peer, s);
                    }
                    None => {
                        self.end(peer, s);
                        let own_bootstrap = self.pkex.as_ref().map(|(id, _)| *id);
                        let req = AuthRequest {
                            peer_bootstrap: bootstrap_id,
                            own_bootstrap,
                            peer: Some(peer),
                            freq: Some(freq),
                            ..Default::default()
                        };
                        if let Err(e) = self.start_auth(req, now) {
                            warn!(%peer, %e, "could not start authentication after PKEX");
                            self.emit(Event::AuthInitFailed { peer });
                        }
                    }
                }
            }
            PkexOutcome::Failed(reason) => {
                if s.stage_is_pkex_responder() {
                    let source = peer.to_string();
                    let failures = self.pkex_limiter.record_failure(&source);
                    if failures >= self.settings.pkex_t_limit {
                        self.emit(Event::PkexTLimit { peer });
                    }
                }
                self.fail(peer, s, reason);
            }
        }
    }

    // ----- Presence and reconfiguration announcements ----------------------

    /// Chirp the Presence Announcement of own bootstrap `own_id`.
    pub fn chirp(
        &mut self,
        own_id: u32,
        iterations: u32,
        listen: Option<u32>,
        now: Instant,
    ) -> Result<Vec<Action>, ProtocolError> {
        let own = self.own_bootstrap(own_id)?;
        let mut plan = ChirpSchedule::new(
            build_presence_announcement(&own),
            &own.freqs,
            iterations,
            self.settings.chirp_channel(),
            self.settings.chirp_round(),
        );
        if let Some(freq) = listen {
            plan = plan.with_listen(freq);
        }
        self.stop_chirp();
        self.reconfig_profile = None;
        self.start_chirp(plan, now);
        Ok(self.flush())
    }

    /// Announce a stored profile for reconfiguration.
    pub fn reconfig(
        &mut self,
        profile_id: u32,
        iterations: u32,
        now: Instant,
    ) -> Result<Vec<Action>, ProtocolError> {
        let profile = self
            .profiles
            .get(&profile_id)
            .ok_or(ProtocolError::UnknownProfile(profile_id))?;
        let dpp = profile
            .object
            .credential
            .dpp()
            .ok_or(ProtocolError::InvalidState("profile has no Connector"))?;
        let nak = profile
            .net_access_key
            .as_ref()
            .ok_or(ProtocolError::InvalidState("profile has no netAccessKey"))?;
        if self.sessions.values().any(|s| matches!(s.stage, Stage::Auth(_))) {
            return Err(ProtocolError::InvalidState("authentication in progress"));
        }
        let plan = ChirpSchedule::new(
            build_announcement(&dpp.csign, nak.curve()),
            &[],
            iterations,
            self.settings.chirp_channel(),
            self.settings.chirp_round(),
        );
        self.stop_chirp();
        self.reconfig_profile = Some(profile_id);
        info!(profile_id, "reconfiguration announced");
        self.start_chirp(plan, now);
        Ok(self.flush())
    }

    pub fn chirp_stop(&mut self) -> Vec<Action> {
        self.stop_chirp();
        self.flush()
    }

    fn stop_chirp(&mut self) {
        if let Some(run) = self.chirp.take() {
            if let Some(t) = run.timer {
                self.timers.cancel(t);
            }
            self.emit(Event::ChirpStopped);
        }
    }

    fn start_chirp(&mut self, plan: ChirpSchedule, now: Instant) {
        self.chirp = Some(ChirpRun { plan, timer: None });
        self.chirp_next(now);
    }

    fn chirp_next(&mut self, now: Instant) {
        let Some(run) = self.chirp.as_mut() else {
            return;
        };
        let step = run.plan.step();
        let frame = run.plan.frame().clone();
        let wait = match step {
            ChirpStep::Send { freq, wait } => {
                self.send(Peer::BROADCAST, freq, frame);
                wait
            }
            ChirpStep::RoundWait { wait, listen_freq } => {
                if let Some(freq) = listen_freq {
                    self.out.push(Action::Listen {
                        freq,
                        duration: Some(wait),
                    });
                }
                wait
            }
            ChirpStep::Stopped => {
                info!("chirping iterations completed");
                self.chirp = None;
                return self.emit(Event::ChirpStopped);
            }
        };
        let timer = self.timers.schedule(now + wait, TimerKind::Chirp);
        if let Some(run) = self.chirp.as_mut() {
            run.timer = Some(timer);
        }
    }

    fn rx_presence(&mut self, peer: Peer, freq: u32, frame: DppFrame, now: Instant) {
        let hash = match parse_presence_announcement(&frame) {
            Ok(h) => h,
            Err(e) => return self.dropped(peer, frame.frame_type, e.into()),
        };
        let Some(bootstrap_id) = self.bootstraps.find_chirp(&hash).map(|bi| bi.id) else {
            return self.dropped(peer, frame.frame_type, Dropped::NotForUs);
        };
        self.emit(Event::ChirpRx {
            peer,
            freq,
            bootstrap_id,
        });
        if self.conf_params.is_none() || self.sessions.contains_key(&peer) {
            return;
        }
        let req = AuthRequest {
            peer_bootstrap: bootstrap_id,
            peer: Some(peer),
            freq: Some(freq),
            role: Some(Capability::Configurator),
            ..Default::default()
        };
        if let Err(e) = self.start_auth(req, now) {
            warn!(%peer, %e, "could not answer presence announcement");
        }
    }

    fn rx_reconfig_announcement(&mut self, peer: Peer, freq: u32, frame: DppFrame, now: Instant) {
        let ann = match parse_announcement(&frame) {
            Ok(a) => a,
            Err(e) => return self.dropped(peer, frame.frame_type, e.into()),
        };
        let Some(conf) = self.configurators.find_by_csign_hash(&ann.csign_hash) else {
            return self.dropped(peer, frame.frame_type, Dropped::NotForUs);
        };
        if conf.curve().ike_group() != ann.group {
            return debug!(%peer, group = ann.group, "reconfig announcement for another group");
        }
        let configurator_id = conf.id();
        self.emit(Event::ReconfigAnnouncement {
            peer,
            freq,
            configurator_id,
        });
        let Some(mut params) = self.conf_params.clone() else {
            return debug!(%peer, "no configuration for reconfiguration");
        };
        if self.sessions.contains_key(&peer) {
            return debug!(%peer, "reconfig announcement while busy");
        }
        params.configurator = Some(configurator_id);
        let tid = self.tid();
        let Some(conf) = self.configurators.get(configurator_id) else {
            return;
        };
        match ReconfigSession::initiate(conf, tid, &self.faults) {
            Ok((session, req)) => {
                let mut s = Session::new(freq, Stage::Reconfig(Box::new(session)));
                s.conf = Some(params);
                self.send_tracked(peer, &mut s, req);
                self.arm(peer, &mut s, now + self.settings.resp_wait());
                self.keep(peer, s);
            }
            Err(e) => warn!(%peer, %e, "could not start reconfiguration"),
        }
    }

    fn rx_reconfig_req(&mut self, peer: Peer, freq: u32, frame: DppFrame, now: Instant) {
        let Some(profile_id) = self.reconfig_profile else {
            return self.dropped(peer, frame.frame_type, Dropped::NotForUs);
        };
        if let Some(s) = self.sessions.get(&peer) {
            let resend = match &s.stage {
                Stage::Reconfig(r)
                    if r.side() == Side::Responder
                        && frame.attrs.get(dpp_core::attributes::AttrId::TransactionId)
                            == Some(&[r.transaction_id()][..]) =>
                {
                    s.last_sent.clone()
                }
                _ => None,
            };
            match resend {
                Some(f) => self.send(peer, freq, f),
                None => debug!(%peer, "reconfig request while busy"),
            }
            return;
        }
        let Some(profile) = self.profiles.get(&profile_id) else {
            return self.dropped(peer, frame.frame_type, Dropped::NotForUs);
        };
        match ReconfigSession::respond(profile, &frame, &self.faults) {
            Ok((session, resp)) => {
                self.stop_chirp();
                let mut s = Session::new(freq, Stage::Reconfig(Box::new(session)));
                self.send_tracked(peer, &mut s, resp);
                self.arm(peer, &mut s, now + self.settings.resp_retry());
                self.keep(peer, s);
            }
            Err(why) => self.dropped(peer, frame.frame_type, why),
        }
    }

    fn rx_reconfig(&mut self, peer: Peer, frame: DppFrame, now: Instant) {
        let Some(mut s) = self.sessions.remove(&peer) else {
            return self.dropped(peer, frame.frame_type, Dropped::Unexpected);
        };
        let csign = s
            .conf
            .as_ref()
            .and_then(|c| c.configurator)
            .and_then(|id| self.configurators.get(id))
            .map(|c| c.csign().clone());
        let outcome = match (&mut s.stage, frame.frame_type, csign) {
            (Stage::Reconfig(r), FrameType::ReconfigAuthResp, Some(csign)) => {
                r.rx_auth_resp(&frame, &csign, &self.faults)
            }
            (Stage::Reconfig(r), FrameType::ReconfigAuthConf, _) => {
                r.rx_auth_conf(&frame, &self.faults)
            }
            _ => Err(Dropped::Unexpected),
        };
        let outcome = match outcome {
            Ok(o) => o,
            Err(why) => {
                self.keep(peer, s);
                return self.dropped(peer, frame.frame_type, why);
            }
        };
        self.disarm(&mut s);
        let Stage::Reconfig(r) = s.take_stage() else {
            return;
        };
        match outcome {
            ReconfigOutcome::Failed(reason) => self.fail(peer, s, reason),
            ReconfigOutcome::Authenticated(confirm) => {
                let initiator = r.side() == Side::Initiator;
                info!(%peer, initiator, "reconfiguration authenticated");
                self.emit(Event::ReconfigAuthSuccess { peer, initiator });
                if initiator {
                    self.send(peer, s.freq, confirm);
                    let Some(peer_key) = r.peer_key().cloned() else {
                        return self.fail(peer, s, FailureReason::InvalidPeerKey);
                    };
                    self.serve_config(peer, s, r.ke(), r.peer_version(), peer_key, now);
                } else {
                    self.reconfig_profile = None;
                    let attrs = self.config_attributes();
                    let exchange = EnrolleeExchange::new(
                        r.curve(),
                        r.ke(),
                        r.peer_version(),
                        r.own_key().public().clone(),
                        attrs,
                    );
                    s.stage = Stage::EnrolleeConf {
                        exchange,
                        key: r.own_key().clone(),
                    };
                    self.send_conf_request(peer, s, now);
                }
            }
        }
    }

    // ----- Network introduction -------------------------------------------

    /// Station: send a Peer Discovery Request with a stored Connector.
    pub fn peer_discovery(
        &mut self,
        profile_id: u32,
        peer: Peer,
        freq: u32,
    ) -> Result<Vec<Action>, ProtocolError> {
        let profile = self
            .profiles
            .get(&profile_id)
            .ok_or(ProtocolError::UnknownProfile(profile_id))?;
        let connector = profile
            .connector()
            .ok_or(ProtocolError::InvalidState("profile has no Connector"))?
            .to_string();
        let tid = self.tid();
        let frame = build_peer_disc_req(tid, &connector, self.settings.protocol_version);
        self.intro_pending.insert(peer, (tid, profile_id));
        self.send(peer, freq, frame);
        Ok(self.flush())
    }

    fn rx_peer_disc_req(&mut self, peer: Peer, freq: u32, frame: DppFrame, now: Instant) {
        let Some(profile_id) = self.ap_profile else {
            return self.dropped(peer, frame.frame_type, Dropped::NotForUs);
        };
        let req = match parse_peer_disc(&frame) {
            Ok(r) => r,
            Err(e) => return self.dropped(peer, frame.frame_type, e.into()),
        };
        let Some((own_connector, nak, csign)) = self.profile_keys(profile_id) else {
            return self.dropped(peer, frame.frame_type, Dropped::NotForUs);
        };
        let peer_connector = req.connector.unwrap_or_default();
        let version = self.settings.protocol_version;
        let wall = self.wall(now);
        match peer_intro(&own_connector, &nak, &csign, &peer_connector, wall, &self.faults) {
            Ok(intro) => {
                let resp = build_peer_disc_resp(
                    req.transaction_id,
                    StatusCode::Ok,
                    Some(&own_connector),
                    version,
                );
                self.send(peer, freq, resp);
                info!(%peer, profile_id, "network introduction (AP)");
                self.emit(Event::Introduction {
                    peer,
                    profile_id,
                    pmkid: intro.pmkid,
                });
            }
            Err(e) => {
                let status = e.status();
                warn!(%peer, %e, "peer connector rejected");
                let resp = build_peer_disc_resp(req.transaction_id, status, None, version);
                self.send(peer, freq, resp);
                self.emit(Event::IntroFailed { peer, status });
            }
        }
    }

    fn rx_peer_disc_resp(&mut self, peer: Peer, frame: DppFrame, now: Instant) {
        let resp = match parse_peer_disc(&frame) {
            Ok(r) => r,
            Err(e) => return self.dropped(peer, frame.frame_type, e.into()),
        };
        let Some(&(tid, profile_id)) = self.intro_pending.get(&peer) else {
            return self.dropped(peer, frame.frame_type, Dropped::Unexpected);
        };
        if tid != resp.transaction_id {
            return self.dropped(peer, frame.frame_type, Dropped::NotForUs);
        }
        self.intro_pending.remove(&peer);
        match (resp.status, resp.connector) {
            (Some(StatusCode::Ok), Some(peer_connector)) => {
                let Some((own_connector, nak, csign)) = self.profile_keys(profile_id) else {
                    return;
                };
                match peer_intro(
                    &own_connector,
                    &nak,
                    &csign,
                    &peer_connector,
                    self.wall(now),
                    &self.faults,
                ) {
                    Ok(intro) => {
                        info!(%peer, profile_id, "network introduction (station)");
                        self.emit(Event::Introduction {
                            peer,
                            profile_id,
                            pmkid: intro.pmkid,
                        });
                    }
                    Err(e) => {
                        warn!(%peer, %e, "AP connector rejected");
                        self.emit(Event::IntroFailed {
                            peer,
                            status: e.status(),
                        });
                    }
                }
            }
            (status, _) => {
                let status = status.unwrap_or(StatusCode::InvalidConnector);
                self.emit(Event::IntroFailed { peer, status });
            }
        }
    }

    fn profile_keys(&self, id: u32) -> Option<(String, KeyPair, PublicKey)> {
        let profile = self.profiles.get(&id)?;
        let dpp = profile.object.credential.dpp()?;
        Some((
            dpp.connector.clone(),
            profile.net_access_key.clone()?,
            dpp.csign.clone(),
        ))
    }

    // ----- Input dispatch and timers ----------------------------------------

    pub fn handle(&mut self, input: Input, now: Instant) -> Vec<Action> {
        match input {
            Input::Frame { peer, freq, frame } => self.rx_frame(peer, freq, frame, now),
            Input::TxStatus { peer, ok } => self.tx_status(peer, ok, now),
            Input::GasRequest {
                peer, token, body, ..
            } => self.rx_gas_request(peer, token, body, now),
            Input::GasResponse { peer, body } => self.rx_gas_response(peer, body, now),
            Input::GasTimeout { peer } => {
                if let Some(s) = self.sessions.remove(&peer) {
                    if matches!(s.stage, Stage::EnrolleeConf { .. }) {
                        self.conf_failed(peer, s, FailureReason::Timeout);
                    } else {
                        self.keep(peer, s);
                    }
                }
            }
            Input::Tick => self.run_timers(now),
        }
        self.flush()
    }

    fn rx_frame(&mut self, peer: Peer, freq: u32, frame: DppFrame, now: Instant) {
        debug!(%peer, freq, frame_type = ?frame.frame_type, "rx");
        self.emit(Event::Rx {
            peer,
            freq,
            frame_type: frame.frame_type,
        });
        match frame.frame_type {
            FrameType::AuthReq => self.rx_auth_req(peer, freq, frame, now),
            FrameType::AuthResp => self.rx_auth_resp(peer, freq, frame, now),
            FrameType::AuthConf => self.rx_auth_conf(peer, frame, now),
            FrameType::PkexExchReq => self.rx_pkex_req(peer, freq, frame, now),
            FrameType::PkexV1ExchReq => self.dropped(peer, frame.frame_type, Dropped::Unsupported),
            FrameType::PkexExchResp
            | FrameType::PkexCommitRevealReq
            | FrameType::PkexCommitRevealResp => self.rx_pkex(peer, freq, frame, now),
            FrameType::ConfigurationResult | FrameType::ConnectionStatusResult => {
                self.rx_conf_result(peer, frame, now)
            }
            FrameType::PresenceAnnouncement => self.rx_presence(peer, freq, frame, now),
            FrameType::ReconfigAnnouncement => {
                self.rx_reconfig_announcement(peer, freq, frame, now)
            }
            FrameType::ReconfigAuthReq => self.rx_reconfig_req(peer, freq, frame, now),
            FrameType::ReconfigAuthResp | FrameType::ReconfigAuthConf => {
                self.rx_reconfig(peer, frame, now)
            }
            FrameType::PeerDiscReq => self.rx_peer_disc_req(peer, freq, frame, now),
            FrameType::PeerDiscResp => self.rx_peer_disc_resp(peer, frame, now),
        }
    }

    /// A failed transmit of an Auth Request moves on without waiting.
    fn tx_status(&mut self, peer: Peer, ok: bool, now: Instant) {
        if ok {
            return;
        }
        let key = if self.sessions.contains_key(&peer) { peer } else { Peer::BROADCAST };
        let Some(mut s) = self.sessions.remove(&key) else {
            return;
        };
        let waiting = matches!(
            &s.stage,
            Stage::Auth(a) if a.state() == &AuthState::AwaitingResponse { pending: false }
        );
        if waiting && !s.deferred {
            debug!(%peer, "auth request not acknowledged");
            self.arm(key, &mut s, now);
        }
        self.keep(key, s);
    }

    fn run_timers(&mut self, now: Instant) {
        while let Some((id, kind)) = self.timers.pop_expired(now) {
            match kind {
                TimerKind::Chirp => {
                    if let Some(run) = self.chirp.as_mut() {
                        if run.timer == Some(id) {
                            run.timer = None;
                            self.chirp_next(now);
                        }
                    }
                }
                TimerKind::Session(peer) => {
                    let Some(mut s) = self.sessions.remove(&peer) else {
                        continue;
                    };
                    if s.timer != Some(id) {
                        self.keep(peer, s);
                        continue;
                    }
                    s.timer = None;
                    self.session_timeout(peer, s, now);
                }
            }
        }
    }

    fn session_timeout(&mut self, peer: Peer, mut s: Session, now: Instant) {
        enum Next {
            Resend(Duration),
            InitiatorStep,
            Fail(FailureReason),
            InitFailed,
            ConfTimeout,
            StatusUnreported,
            Close,
        }
        let next = match &s.stage {
            Stage::Idle => Next::Close,
            Stage::Auth(a) => match (a.side(), a.state()) {
                (Side::Initiator, AuthState::AwaitingResponse { pending: false }) => {
                    Next::InitiatorStep
                }
                (Side::Initiator, _) => Next::InitFailed,
                // A RESPONSE_PENDING answer is retransmitted like a full one
                // until the peer bootstrap arrives.
                (
                    Side::Responder,
                    AuthState::AwaitingConfirm | AuthState::AwaitingPeerBootstrap,
                ) => {
                    if s.tries < self.settings.resp_max_tries {
                        Next::Resend(self.settings.resp_retry())
                    } else {
                        Next::Fail(FailureReason::NoConfirmReceived)
                    }
                }
                (Side::Responder, _) => Next::Fail(FailureReason::Timeout),
            },
            Stage::Pkex(p) => match (p.side(), p.state()) {
                (_, PkexState::Done) => Next::Close,
                (Side::Initiator, _) if s.tries < self.settings.resp_max_tries => {
                    Next::Resend(self.settings.resp_retry())
                }
                _ => Next::Fail(FailureReason::Timeout),
            },
            Stage::Reconfig(r) => match (r.side(), r.state()) {
                (Side::Initiator, ReconfigState::AwaitingResponse)
                    if s.tries < self.settings.init_max_tries =>
                {
                    Next::Resend(self.settings.resp_wait())
                }
                (Side::Responder, ReconfigState::AwaitingConfirm)
                    if s.tries < self.settings.resp_max_tries =>
                {
                    Next::Resend(self.settings.resp_retry())
                }
                (Side::Responder, _) => Next::Fail(FailureReason::NoConfirmReceived),
                _ => Next::Fail(FailureReason::Timeout),
            },
            Stage::EnrolleeConf { .. } => Next::ConfTimeout,
            Stage::EnrolleeAwaitStatus { .. } => Next::StatusUnreported,
            Stage::ConfiguratorConf { phase, .. } => match phase {
                ConfPhase::AwaitRequest => Next::ConfTimeout,
                ConfPhase::AwaitResult | ConfPhase::AwaitConnStatus => {
                    Next::Fail(FailureReason::Timeout)
                }
            },
        };
        match next {
            Next::Resend(wait) => {
                s.tries += 1;
                if let Some(f) = s.last_sent.clone() {
                    debug!(%peer, tries = s.tries, "retransmit");
                    self.send(peer, s.freq, f);
                }
                self.arm(peer, &mut s, now + wait);
                self.keep(peer, s);
            }
            Next::InitiatorStep => self.initiator_step(peer, s, now),
            Next::Fail(reason) => self.fail(peer, s, reason),
            Next::InitFailed => {
                warn!(%peer, "no response to authentication request");
                self.emit(Event::AuthInitFailed { peer });
                self.end(peer, s);
            }
            Next::ConfTimeout => self.conf_failed(peer, s, FailureReason::Timeout),
            Next::StatusUnreported => {
                info!(%peer, "connection status not reported, closing");
                self.end(peer, s);
            }
            Next::Close => self.end(peer, s),
        }
    }

    /// Walk the peer's channels; pause between sweeps; give up after
    /// `init_max_tries` sweeps.
    fn initiator_step(&mut self, peer: Peer, mut s: Session, now: Instant) {
        if !s.deferred && s.channel + 1 < s.channels.len() {
            s.channel += 1;
        } else if !s.deferred {
            if s.tries >= self.settings.init_max_tries {
                warn!(%peer, sweeps = s.tries, "no response to authentication request");
                self.emit(Event::AuthInitFailed { peer });
                return self.end(peer, s);
            }
            s.tries += 1;
            s.deferred = true;
            self.arm(peer, &mut s, now + self.settings.init_retry());
            return self.keep(peer, s);
        } else {
            s.deferred = false;
            s.channel = 0;
        }
        s.freq = s.channels[s.channel];
        if let Some(f) = s.last_sent.clone() {
            debug!(%peer, freq = s.freq, "auth request retry");
            self.send(peer, s.freq, f);
        }
        self.arm(peer, &mut s, now + self.settings.resp_wait());
        self.keep(peer, s);
    }
}

impl Session {
    fn stage_is_pkex_responder(&self) -> bool {
        matches!(&self.stage, Stage::Pkex(p) if p.side() == Side::Responder)
    }
}
