//! Relay: carries DPP frames between the air and Controllers.
//!
//! The first frame from a radio peer picks the Controller by the
//! bootstrap or chirp hash it carries, or by the default route. After
//! that the peer's frames follow its connection, and whatever the
//! Controller sends comes back tagged with the peer and channel it
//! belongs to.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use dpp_core::attributes::AttrId;
use dpp_core::encoding::to_hex;
use dpp_core::frame::FrameType;
use dpp_protocol::Peer;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::ControllerError;
use crate::framing::{spawn_reader, write_message, Message};
use crate::settings::ControllerSettings;

/// A message for, or from, the radio side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioFrame {
    pub peer: Peer,
    pub freq: u32,
    pub message: Message,
}

/// Bootstrap key hash to Controller address.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<([u8; 32], SocketAddr)>,
    default: Option<SocketAddr>,
}

impl RouteTable {
    pub fn new(default: Option<SocketAddr>) -> Self {
        Self {
            routes: Vec::new(),
            default,
        }
    }

    pub fn from_settings(settings: &ControllerSettings) -> Result<Self, ControllerError> {
        let mut table = Self::new(settings.default_route);
        for route in &settings.routes {
            table.add(route.hash_bytes()?, route.addr);
        }
        Ok(table)
    }

    pub fn add(&mut self, hash: [u8; 32], addr: SocketAddr) {
        self.routes.retain(|(h, _)| *h != hash);
        self.routes.push((hash, addr));
    }

    /// Controller for the first message of a new peer.
    ///
    /// Authentication Requests are looked up by Responder bootstrap key
    /// hash and Presence Announcements by chirp hash. Misses and other
    /// frames take the default route.
    pub fn route(&self, message: &Message) -> Result<SocketAddr, ControllerError> {
        let Message::Action(frame) = message else {
            return Err(ControllerError::NoRoute("GAS before authentication".into()));
        };
        let hash = match frame.frame_type {
            FrameType::AuthReq | FrameType::PresenceAnnouncement => Some(
                frame
                    .attrs
                    .get(AttrId::RBootstrapKeyHash)
                    .ok_or_else(|| {
                        ControllerError::Malformed(format!("{:?} without hash", frame.frame_type))
                    })?,
            ),
            _ => None,
        };
        if let Some(hash) = hash {
            if let Some((_, addr)) = self.routes.iter().find(|(h, _)| h[..] == *hash) {
                return Ok(*addr);
            }
        }
        self.default.ok_or_else(|| match hash {
            Some(hash) => ControllerError::NoRoute(to_hex(hash)),
            None => ControllerError::NoRoute(format!("{:?}", frame.frame_type)),
        })
    }
}

/// One Relay instance. Owned by the task that reads the radio.
pub struct Relay {
    routes: RouteTable,
    conns: HashMap<Peer, mpsc::Sender<Message>>,
    to_radio: mpsc::Sender<RadioFrame>,
    idle: Duration,
}

impl Relay {
    pub fn new(routes: RouteTable, to_radio: mpsc::Sender<RadioFrame>, idle: Duration) -> Self {
        Self {
            routes,
            conns: HashMap::new(),
            to_radio,
            idle,
        }
    }

    pub fn connections(&self) -> usize {
        self.conns.values().filter(|tx| !tx.is_closed()).count()
    }

    /// Forward a message received over the air from `peer` on `freq`.
    pub async fn from_radio(&mut self, frame: RadioFrame) -> Result<(), ControllerError> {
        let RadioFrame { peer, freq, message } = frame;
        if let Some(tx) = self.conns.get(&peer) {
            match tx.send(message).await {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(message)) => {
                    debug!(%peer, "controller connection gone, rerouting");
                    self.conns.remove(&peer);
                    return self.open(peer, freq, message).await;
                }
            }
        }
        self.open(peer, freq, message).await
    }

    async fn open(
        &mut self,
        peer: Peer,
        freq: u32,
        message: Message,
    ) -> Result<(), ControllerError> {
        let addr = self.routes.route(&message)?;
        let stream = TcpStream::connect(addr).await?;
        info!(%peer, %addr, "relaying to controller");

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(pump(stream, peer, freq, rx, self.to_radio.clone(), self.idle));
        tx.send(message).await.map_err(|_| ControllerError::Closed)?;
        self.conns.insert(peer, tx);
        Ok(())
    }
}

async fn pump(
    stream: TcpStream,
    peer: Peer,
    freq: u32,
    mut outbound: mpsc::Receiver<Message>,
    to_radio: mpsc::Sender<RadioFrame>,
    idle: Duration,
) {
    let (rd, mut wr) = stream.into_split();
    let mut inbound = spawn_reader(rd, idle);
    loop {
        tokio::select! {
            msg = outbound.recv() => {
                let Some(msg) = msg else { break };
                if let Err(e) = write_message(&mut wr, &msg).await {
                    warn!(%peer, error = %e, "write to controller failed");
                    break;
                }
            }
            msg = inbound.recv() => match msg {
                Some(Ok(message)) => {
                    if to_radio.send(RadioFrame { peer, freq, message }).await.is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    debug!(%peer, error = %e, "controller connection ended");
                    break;
                }
                None => break,
            },
        }
    }
}
