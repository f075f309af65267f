//! What the host feeds the engine, what the engine asks the host to do,
//! and the outcomes it reports.

use std::fmt;
use std::time::Duration;

use dpp_core::bootstrap::format_mac;
use dpp_core::errors::StatusCode;
use dpp_core::frame::{DppFrame, FrameType};

use crate::capability::Role;
use crate::config::ConnStatus;
use crate::connector::NetRole;
use crate::errors::FailureReason;

/// Link-layer address of a peer. TCP hosts assign synthetic ones.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Peer(pub [u8; 6]);

impl Peer {
    pub const BROADCAST: Peer = Peer([0xff; 6]);

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_mac(&self.0))
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Peer({self})")
    }
}

/// Something that happened outside the engine.
#[derive(Debug, Clone)]
pub enum Input {
    /// A DPP public action frame arrived.
    Frame {
        peer: Peer,
        freq: u32,
        frame: DppFrame,
    },
    /// Transmit outcome of the last frame sent to `peer`.
    TxStatus { peer: Peer, ok: bool },
    /// A Config Request arrived over GAS.
    GasRequest {
        peer: Peer,
        freq: u32,
        token: u8,
        body: Vec<u8>,
    },
    /// Answer to our `Action::GasQuery`.
    GasResponse { peer: Peer, body: Vec<u8> },
    /// The GAS transport gave up on our query.
    GasTimeout { peer: Peer },
    /// Time passed; run due timers.
    Tick,
}

/// Something the host must do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    SendFrame {
        peer: Peer,
        freq: u32,
        frame: DppFrame,
    },
    /// Stay on `freq` for `duration` to receive.
    Listen { freq: u32, duration: Option<Duration> },
    StopListen,
    /// Send a Config Request and report the response.
    GasQuery {
        peer: Peer,
        freq: u32,
        body: Vec<u8>,
    },
    /// Answer a Config Request.
    GasReply { peer: Peer, token: u8, body: Vec<u8> },
    Event(Event),
}

/// Observable outcome. Every named failure has its own variant or reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Rx {
        peer: Peer,
        freq: u32,
        frame_type: FrameType,
    },
    AuthSuccess {
        peer: Peer,
        initiator: bool,
        role: Role,
        mutual: bool,
    },
    /// The Responder needs our bootstrap key before it can answer.
    ResponsePending { peer: Peer },
    /// We answered RESPONSE_PENDING; scan the peer's QR code.
    ScanPeerQrCode { peer: Peer },
    NotCompatible { peer: Peer, initiator: bool },
    AuthInitFailed { peer: Peer },
    Fail { peer: Peer, reason: FailureReason },
    ConfRequestReceived {
        peer: Peer,
        name: String,
        net_role: NetRole,
    },
    ConfSent { peer: Peer, status: StatusCode },
    /// The Enrollee stored new network profiles.
    ConfReceived { peer: Peer, profile_ids: Vec<u32> },
    ConfFailed { peer: Peer, reason: FailureReason },
    /// The Configurator wants a CSR.
    CsrRequested { peer: Peer },
    /// Configuration Result received by the Configurator.
    ConfResult { peer: Peer, status: StatusCode },
    ConnStatusResult { peer: Peer, status: ConnStatus },
    PkexDone { peer: Peer, bootstrap_id: u32 },
    /// A source used up its PKEX attempts.
    PkexTLimit { peer: Peer },
    /// Presence Announcement from a known peer bootstrap key.
    ChirpRx {
        peer: Peer,
        freq: u32,
        bootstrap_id: u32,
    },
    ChirpStopped,
    ReconfigAnnouncement {
        peer: Peer,
        freq: u32,
        configurator_id: u32,
    },
    ReconfigAuthSuccess { peer: Peer, initiator: bool },
    Introduction {
        peer: Peer,
        profile_id: u32,
        pmkid: [u8; 16],
    },
    IntroFailed { peer: Peer, status: StatusCode },
}
