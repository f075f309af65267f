//! DPP Protocol: the handshakes and the engine that runs them.
//!
//! Every exchange is a pure state machine over decoded frames. The
//! [`Engine`] owns the sessions, one per peer, and drives retries and
//! timeouts from the `now` it is given. Nothing here touches a socket or
//! a radio: the host delivers [`Input`]s and performs [`Action`]s.
//!
//! # Module Map
//!
//! | Module | Concern |
//! |--------|---------|
//! | [`capability`] | Role capability and negotiation |
//! | [`errors`] | `ProtocolError`, `FailureReason`, `Dropped` |
//! | [`wrapped`] | AES-SIV Wrapped Data helpers |
//! | [`auth`] | Authentication Request/Response/Confirm |
//! | [`pkex`] | PKEX code-based bootstrapping |
//! | [`config`] | Configuration Objects and the Configuration exchange |
//! | [`connector`] | Connectors and Network Introduction |
//! | [`reconfig`] | Reconfiguration announcement and authentication |
//! | [`presence`] | Presence Announcement and the chirp schedule |
//! | [`timers`] | Generation-tagged cancellable timers |
//! | [`events`] | Engine inputs, actions and events |
//! | [`settings`] | Engine tunables |
//! | [`engine`] | Session table and dispatch |

pub mod auth;
pub mod capability;
pub mod config;
pub mod connector;
pub mod engine;
pub mod errors;
pub mod events;
pub mod pkex;
pub mod presence;
pub mod reconfig;
pub mod settings;
pub mod timers;
pub mod wrapped;

pub use capability::{Capability, Role};
pub use engine::{AuthRequest, Engine, PkexRequest};
pub use errors::{Dropped, FailureReason, ProtocolError};
pub use events::{Action, Event, Input, Peer};
pub use settings::EngineSettings;
