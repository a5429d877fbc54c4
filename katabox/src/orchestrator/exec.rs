//! Exec channel framing.
//!
//! The control plane carries exec sessions over a WebSocket upgrade using
//! the `v4.channel.k8s.io` subprotocol: binary frames whose first byte
//! selects the stream (0 stdin, 1 stdout, 2 stderr, 3 status). This
//! module implements the client side of that framing directly on the
//! upgraded byte stream — frames from the client are masked per RFC 6455,
//! pings are answered, and the status channel terminates the session.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::errors::KataboxError;

use super::{ExecChannel, ExecMessage};

/// Subprotocol requested during the upgrade handshake.
pub(crate) const SUBPROTOCOL: &str = "v4.channel.k8s.io";

const CHANNEL_STDIN: u8 = 0;
const CHANNEL_STDOUT: u8 = 1;
const CHANNEL_STDERR: u8 = 2;
const CHANNEL_STATUS: u8 = 3;

const OPCODE_CONTINUATION: u8 = 0x0;
const OPCODE_TEXT: u8 = 0x1;
const OPCODE_BINARY: u8 = 0x2;
const OPCODE_CLOSE: u8 = 0x8;
const OPCODE_PING: u8 = 0x9;
const OPCODE_PONG: u8 = 0xa;

/// Terminal status of an exec session, parsed from the status channel.
#[derive(Clone, Debug)]
pub struct ExecStatus {
    pub exit_code: i32,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusDoc {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    details: Option<StatusDetails>,
}

#[derive(Debug, Deserialize)]
struct StatusDetails {
    #[serde(default)]
    causes: Vec<StatusCause>,
}

#[derive(Debug, Deserialize)]
struct StatusCause {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ExecStatus {
    /// Parse the JSON status document the server sends on channel 3.
    fn parse(raw: &[u8]) -> Self {
        let Ok(doc) = serde_json::from_slice::<StatusDoc>(raw) else {
            return Self {
                exit_code: 1,
                message: Some(String::from_utf8_lossy(raw).into_owned()),
            };
        };
        if doc.status == "Success" {
            return Self {
                exit_code: 0,
                message: None,
            };
        }
        let exit_code = if doc.reason.as_deref() == Some("NonZeroExitCode") {
            doc.details
                .iter()
                .flat_map(|d| d.causes.iter())
                .find(|c| c.reason.as_deref() == Some("ExitCode"))
                .and_then(|c| c.message.as_deref())
                .and_then(|m| m.parse().ok())
                .unwrap_or(1)
        } else {
            1
        };
        Self {
            exit_code,
            message: doc.message,
        }
    }
}

/// Random key for the upgrade handshake.
pub(crate) fn websocket_key() -> String {
    let mut nonce = [0u8; 16];
    rand::rng().fill_bytes(&mut nonce);
    BASE64.encode(nonce)
}

/// Build an [`ExecChannel`] over an upgraded byte stream.
///
/// Generic over the transport so the framing is testable against an
/// in-memory duplex as well as a live upgrade.
pub(crate) fn channel_from_stream<S>(stream: S, wants_stdin: bool) -> ExecChannel
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut read_half, write_half) = tokio::io::split(stream);
    let write_half = Arc::new(Mutex::new(write_half));

    // Stdin side: a local duplex pumped into masked stdin frames.
    let (stdin_local, mut stdin_remote) = tokio::io::duplex(8 * 1024);
    if wants_stdin {
        let writer = Arc::clone(&write_half);
        tokio::spawn(async move {
            let mut buf = [0u8; 4 * 1024];
            loop {
                match stdin_remote.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let mut payload = Vec::with_capacity(n + 1);
                        payload.push(CHANNEL_STDIN);
                        payload.extend_from_slice(&buf[..n]);
                        let frame = encode_frame(OPCODE_BINARY, &payload);
                        if writer.lock().await.write_all(&frame).await.is_err() {
                            break;
                        }
                    }
                }
            }
            let close = encode_frame(OPCODE_CLOSE, &[]);
            let _ = writer.lock().await.write_all(&close).await;
        });
    }

    let output = async_stream::stream! {
        loop {
            let frame = match read_frame(&mut read_half).await {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    yield Err(KataboxError::Unavailable(format!(
                        "exec channel broken: {}",
                        e
                    )));
                    break;
                }
            };
            match frame.opcode {
                OPCODE_BINARY | OPCODE_TEXT => {
                    let Some((&channel, data)) = frame.payload.split_first() else {
                        continue;
                    };
                    match channel {
                        CHANNEL_STDOUT => yield Ok(ExecMessage::Stdout(data.to_vec())),
                        CHANNEL_STDERR => yield Ok(ExecMessage::Stderr(data.to_vec())),
                        CHANNEL_STATUS => {
                            yield Ok(ExecMessage::Exited(ExecStatus::parse(data)));
                            break;
                        }
                        _ => {}
                    }
                }
                OPCODE_PING => {
                    let pong = encode_frame(OPCODE_PONG, &frame.payload);
                    if write_half.lock().await.write_all(&pong).await.is_err() {
                        break;
                    }
                }
                OPCODE_CLOSE => break,
                _ => {}
            }
        }
    };

    ExecChannel::new(Box::pin(stdin_local), Box::pin(output))
}

struct Frame {
    opcode: u8,
    payload: Vec<u8>,
}

/// Encode a client frame. Client frames are always masked.
fn encode_frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
    let mut mask = [0u8; 4];
    rand::rng().fill_bytes(&mut mask);

    let mut frame = Vec::with_capacity(payload.len() + 14);
    frame.push(0x80 | opcode); // FIN set; no fragmentation on send
    match payload.len() {
        len if len < 126 => frame.push(0x80 | len as u8),
        len if len <= u16::MAX as usize => {
            frame.push(0x80 | 126);
            frame.extend_from_slice(&(len as u16).to_be_bytes());
        }
        len => {
            frame.push(0x80 | 127);
            frame.extend_from_slice(&(len as u64).to_be_bytes());
        }
    }
    frame.extend_from_slice(&mask);
    frame.extend(
        payload
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ mask[i % 4]),
    );
    frame
}

/// Read one frame. `Ok(None)` on clean EOF at a frame boundary.
async fn read_frame<R>(reader: &mut R) -> std::io::Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 2];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let opcode = header[0] & 0x0f;
    if opcode == OPCODE_CONTINUATION {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "fragmented exec frames are not supported",
        ));
    }
    let masked = header[1] & 0x80 != 0;
    let len = match header[1] & 0x7f {
        126 => {
            let mut ext = [0u8; 2];
            reader.read_exact(&mut ext).await?;
            u16::from_be_bytes(ext) as usize
        }
        127 => {
            let mut ext = [0u8; 8];
            reader.read_exact(&mut ext).await?;
            u64::from_be_bytes(ext) as usize
        }
        len => len as usize,
    };

    let mask = if masked {
        let mut mask = [0u8; 4];
        reader.read_exact(&mut mask).await?;
        Some(mask)
    } else {
        None
    };

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    if let Some(mask) = mask {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }
    }

    Ok(Some(Frame { opcode, payload }))
}
