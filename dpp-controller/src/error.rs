//! Controller errors.
//!
//! Every variant ends one TCP connection. None of them stop the listener.

use std::io;

use dpp_core::errors::{CodecError, DppError};
use dpp_protocol::ProtocolError;

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Frame body too short or with an unknown class octet.
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Dpp(#[from] DppError),

    #[error("no frame for {0:?}")]
    IdleTimeout(std::time::Duration),

    /// No routing entry for the bootstrap hash in the first frame.
    #[error("no controller route for {0}")]
    NoRoute(String),

    #[error("invalid settings: {0}")]
    Settings(String),

    #[error("peer closed the connection")]
    Closed,
}

impl ControllerError {
    /// Whether the peer broke the framing, as opposed to going away.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            ControllerError::Malformed(_)
                | ControllerError::FrameTooLarge(_)
                | ControllerError::Codec(_)
        ) || matches!(self, ControllerError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}
