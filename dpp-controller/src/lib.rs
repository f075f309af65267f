//! DPP over TCP: a Controller that accepts Enrollee and Relay
//! connections, and a Relay that carries radio frames to it.
//!
//! # Module Map
//!
//! | Module | Concern |
//! |--------|---------|
//! | [`framing`] | Length-prefixed frames and the message classes |
//! | [`controller`] | Accept loop, per-connection engine, client side |
//! | [`relay`] | Routing table and per-peer controller connections |
//! | [`settings`] | JSON settings file |
//! | [`error`] | `ControllerError` |

pub mod controller;
pub mod error;
pub mod framing;
pub mod relay;
pub mod settings;

pub use controller::{drive, enroll, Controller, Provisioning};
pub use error::ControllerError;
pub use framing::Message;
pub use relay::{RadioFrame, Relay, RouteTable};
pub use settings::ControllerSettings;
