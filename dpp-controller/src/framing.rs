//! DPP over TCP.
//!
//! Wire format: 4-byte big-endian length prefix followed by payload.
//! The first payload octet is the public action field:
//!
//! ```text
//! 0x09  DPP action frame, starting at the OUI
//! 0x0a  GAS Initial Request:  dialog token | Config Request body
//! 0x0b  GAS Initial Response: dialog token | Config Response body
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use dpp_core::constants::{
    DPP_HDR_LEN, WLAN_PA_GAS_INITIAL_REQ, WLAN_PA_GAS_INITIAL_RESP, WLAN_PA_VENDOR_SPECIFIC,
};
use dpp_core::frame::DppFrame;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tracing::debug;

use crate::error::ControllerError;

/// Maximum frame size (1 MiB). Certificate bags fit comfortably.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// One message on a controller connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Action(DppFrame),
    GasRequest { token: u8, body: Vec<u8> },
    GasResponse { token: u8, body: Vec<u8> },
}

impl Message {
    pub fn encode(&self) -> Result<Bytes, ControllerError> {
        let mut out = BytesMut::new();
        match self {
            Message::Action(frame) => {
                out.put_u8(WLAN_PA_VENDOR_SPECIFIC);
                out.extend_from_slice(&frame.to_header_bytes()?);
            }
            Message::GasRequest { token, body } => {
                out.put_u8(WLAN_PA_GAS_INITIAL_REQ);
                out.put_u8(*token);
                out.extend_from_slice(body);
            }
            Message::GasResponse { token, body } => {
                out.put_u8(WLAN_PA_GAS_INITIAL_RESP);
                out.put_u8(*token);
                out.extend_from_slice(body);
            }
        }
        Ok(out.freeze())
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ControllerError> {
        let (&class, rest) = buf
            .split_first()
            .ok_or_else(|| ControllerError::Malformed("empty message".into()))?;
        match class {
            WLAN_PA_VENDOR_SPECIFIC => {
                if rest.len() < DPP_HDR_LEN {
                    return Err(ControllerError::Malformed(format!(
                        "{} byte action frame",
                        buf.len()
                    )));
                }
                Ok(Message::Action(DppFrame::from_header_bytes(rest)?))
            }
            WLAN_PA_GAS_INITIAL_REQ | WLAN_PA_GAS_INITIAL_RESP => {
                let (&token, body) = rest
                    .split_first()
                    .ok_or_else(|| ControllerError::Malformed("GAS without dialog token".into()))?;
                let body = body.to_vec();
                Ok(if class == WLAN_PA_GAS_INITIAL_REQ {
                    Message::GasRequest { token, body }
                } else {
                    Message::GasResponse { token, body }
                })
            }
            other => Err(ControllerError::Malformed(format!("class {other:#04x}"))),
        }
    }
}

/// Read a length-delimited frame from an async reader.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Bytes, ControllerError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_FRAME_SIZE {
        return Err(ControllerError::FrameTooLarge(len));
    }

    let mut buf = BytesMut::zeroed(len);
    reader.read_exact(&mut buf).await?;
    Ok(buf.freeze())
}

/// Write a length-delimited frame to an async writer.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    data: &[u8],
) -> Result<(), ControllerError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(ControllerError::FrameTooLarge(data.len()));
    }
    let len = data.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    msg: &Message,
) -> Result<(), ControllerError> {
    write_frame(writer, &msg.encode()?).await
}

/// Read messages on a task of their own so callers can `select!` on the
/// channel without losing a half-read frame.
///
/// The channel carries one final `Err` when the stream ends, breaks the
/// framing, or stays silent for `idle`.
pub fn spawn_reader<R>(
    mut reader: R,
    idle: Duration,
) -> mpsc::Receiver<Result<Message, ControllerError>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        loop {
            let item = match timeout(idle, read_frame(&mut reader)).await {
                Ok(Ok(bytes)) => Message::decode(&bytes),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(ControllerError::IdleTimeout(idle)),
            };
            let last = item.is_err();
            if tx.send(item).await.is_err() || last {
                debug!(last, "reader finished");
                break;
            }
        }
    });
    rx
}
