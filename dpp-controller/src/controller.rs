//! The Controller: a Configurator reached over TCP.
//!
//! Each accepted connection gets its own engine built from the shared
//! [`Provisioning`]. Connections never share session state, so a peer
//! that breaks the framing takes down its own connection and nothing
//! else.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dpp_core::bootstrap::{BootstrapManager, BootstrapParams, BootstrapType};
use dpp_core::crypto::Curve;
use dpp_core::encoding::from_hex;
use dpp_protocol::config::{ConfParams, ConfiguratorStore};
use dpp_protocol::{Action, AuthRequest, Engine, EngineSettings, Event, Input, Peer};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::error::ControllerError;
use crate::framing::{spawn_reader, write_message, Message};
use crate::settings::ControllerSettings;

/// Frequency reported for frames that arrived over TCP.
pub const TCP_FREQ: u32 = 0;

/// Keys and configuration every connection starts from.
#[derive(Debug, Clone)]
pub struct Provisioning {
    pub bootstraps: BootstrapManager,
    pub configurators: ConfiguratorStore,
    pub conf: Option<ConfParams>,
    pub engine: EngineSettings,
    own_bootstrap: u32,
}

impl Provisioning {
    pub fn from_settings(settings: &ControllerSettings) -> Result<Self, ControllerError> {
        let curve = Curve::from_name(&settings.curve)?;
        let hex = |v: &Option<String>| -> Result<Option<Vec<u8>>, ControllerError> {
            Ok(v.as_deref().map(from_hex).transpose()?)
        };

        let mut scratch = Engine::new(settings.engine.clone());
        let own_bootstrap = scratch.bootstraps_mut().generate(BootstrapParams {
            kind: Some(BootstrapType::QrCode),
            curve,
            key: hex(&settings.bootstrap_key)?,
            ..BootstrapParams::default()
        })?;
        let csign = hex(&settings.configurator_key)?;
        let configurator = scratch.configurator_add(curve, csign.as_deref(), None)?;

        let conf = match &settings.conf {
            Some(cmd) => {
                let params: ConfParams = format!("{cmd} configurator={configurator}")
                    .parse()
                    .map_err(|e| ControllerError::Settings(format!("conf: {e}")))?;
                scratch.set_conf_params(Some(params.clone()))?;
                Some(params)
            }
            None => None,
        };

        Ok(Self {
            bootstraps: scratch.bootstraps().clone(),
            configurators: scratch.configurators().clone(),
            conf,
            engine: settings.engine.clone(),
            own_bootstrap,
        })
    }

    pub fn own_bootstrap(&self) -> u32 {
        self.own_bootstrap
    }

    /// The bootstrap URI Enrollees scan to reach this Controller.
    pub fn uri(&self) -> Result<String, ControllerError> {
        Ok(self.bootstraps.get_uri(self.own_bootstrap)?)
    }

    /// SHA-256 of the bootstrap key, the relay routing key.
    pub fn key_hash(&self) -> Option<[u8; 32]> {
        self.bootstraps.get(self.own_bootstrap).map(|b| *b.key_hash())
    }

    /// Fresh engine for one connection.
    pub fn engine(&self) -> Result<Engine, ControllerError> {
        let mut engine = Engine::new(self.engine.clone())
            .with_state(self.bootstraps.clone(), self.configurators.clone());
        engine.set_conf_params(self.conf.clone())?;
        Ok(engine)
    }
}

/// Run one exchange over `stream` until the engine's session with `peer`
/// ends.
///
/// `initial` holds actions already produced (an initiator's first
/// request). Returns every event the engine reported.
pub async fn drive<S>(
    engine: &mut Engine,
    peer: Peer,
    stream: S,
    idle: Duration,
    initial: Vec<Action>,
) -> Result<Vec<Event>, ControllerError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (rd, mut wr) = tokio::io::split(stream);
    let mut inbound = spawn_reader(rd, idle);
    let mut pending: VecDeque<Action> = initial.into();
    let mut events = Vec::new();
    let mut active = false;
    let mut token: u8 = 0;

    loop {
        while let Some(action) = pending.pop_front() {
            match action {
                Action::SendFrame { frame, .. } => {
                    write_message(&mut wr, &Message::Action(frame)).await?;
                }
                Action::GasQuery { body, .. } => {
                    token = token.wrapping_add(1);
                    write_message(&mut wr, &Message::GasRequest { token, body }).await?;
                }
                Action::GasReply { token, body, .. } => {
                    write_message(&mut wr, &Message::GasResponse { token, body }).await?;
                }
                Action::Event(event) => {
                    info!(%peer, ?event, "dpp event");
                    events.push(event);
                }
                Action::Listen { .. } | Action::StopListen => {}
            }
        }

        // Frames that never open a session leave the connection waiting.
        if engine.has_session(peer) {
            active = true;
        } else if active {
            debug!(%peer, "exchange finished");
            return Ok(events);
        }

        let deadline = engine.next_deadline().map(Instant::from_std);
        tokio::select! {
            msg = inbound.recv() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        abandon(engine, peer, &mut events);
                        return Err(e);
                    }
                    None => {
                        abandon(engine, peer, &mut events);
                        return Err(ControllerError::Closed);
                    }
                };
                let input = match msg {
                    Message::Action(frame) => Input::Frame { peer, freq: TCP_FREQ, frame },
                    Message::GasRequest { token, body } => Input::GasRequest {
                        peer,
                        freq: TCP_FREQ,
                        token,
                        body,
                    },
                    Message::GasResponse { body, .. } => Input::GasResponse { peer, body },
                };
                pending.extend(engine.handle(input, Instant::now().into_std()));
            }
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                pending.extend(engine.handle(Input::Tick, Instant::now().into_std()));
            }
        }
    }
}

fn abandon(engine: &mut Engine, peer: Peer, events: &mut Vec<Event>) {
    for action in engine.abort(peer) {
        if let Action::Event(event) = action {
            events.push(event);
        }
    }
}

/// Authenticate to the Controller at `addr` and run the exchange.
///
/// The engine must already hold the Controller's bootstrap URI under
/// `req.peer_bootstrap`.
pub async fn enroll(
    addr: SocketAddr,
    engine: &mut Engine,
    req: AuthRequest,
    idle: Duration,
) -> Result<Vec<Event>, ControllerError> {
    let stream = TcpStream::connect(addr).await?;
    let peer = req.peer.unwrap_or(synthetic_peer(1));
    let req = AuthRequest {
        peer: Some(peer),
        freq: Some(TCP_FREQ),
        ..req
    };
    let initial = engine.auth_init(req, Instant::now().into_std())?;
    drive(engine, peer, stream, idle, initial).await
}

/// Locally administered address standing in for a TCP peer.
pub fn synthetic_peer(n: u16) -> Peer {
    let [hi, lo] = n.to_be_bytes();
    Peer([0x02, 0x00, 0x00, 0x00, hi, lo])
}

/// Accepts Enrollee and Relay connections.
pub struct Controller {
    listener: TcpListener,
    provisioning: Arc<Provisioning>,
    idle: Duration,
    events: Option<mpsc::UnboundedSender<(Peer, Event)>>,
}

impl Controller {
    pub async fn bind(settings: &ControllerSettings) -> Result<Self, ControllerError> {
        let provisioning = Provisioning::from_settings(settings)?;
        Self::bind_with(settings.listen, provisioning, settings.idle_timeout()).await
    }

    pub async fn bind_with(
        listen: SocketAddr,
        provisioning: Provisioning,
        idle: Duration,
    ) -> Result<Self, ControllerError> {
        let listener = TcpListener::bind(listen).await?;
        info!(addr = %listener.local_addr()?, "controller listening");
        Ok(Self {
            listener,
            provisioning: Arc::new(provisioning),
            idle,
            events: None,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ControllerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn provisioning(&self) -> &Provisioning {
        &self.provisioning
    }

    /// Receive every event from every connection.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<(Peer, Event)> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    /// Accept connections until the listener fails.
    pub async fn run(self) -> Result<(), ControllerError> {
        let mut next: u16 = 0;
        loop {
            let (stream, addr) = self.listener.accept().await?;
            next = next.wrapping_add(1);
            let peer = synthetic_peer(next);
            debug!(%addr, %peer, "accepted");

            let provisioning = Arc::clone(&self.provisioning);
            let events = self.events.clone();
            let idle = self.idle;
            tokio::spawn(async move {
                match serve(&provisioning, peer, stream, idle).await {
                    Ok(seen) => {
                        if let Some(tx) = events {
                            for event in seen {
                                let _ = tx.send((peer, event));
                            }
                        }
                    }
                    Err(e) if e.is_protocol_violation() => {
                        warn!(%addr, error = %e, "connection dropped")
                    }
                    Err(e) => debug!(%addr, error = %e, "connection closed"),
                }
            });
        }
    }
}

async fn serve(
    provisioning: &Provisioning,
    peer: Peer,
    stream: TcpStream,
    idle: Duration,
) -> Result<Vec<Event>, ControllerError> {
    let mut engine = provisioning.engine()?;
    drive(&mut engine, peer, stream, idle, Vec::new()).await
}
