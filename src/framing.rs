//! TCP frame codec (spec §4.1).
//!
//! Wire layout of a single frame:
//!
//! ```text
//! byte 0     : 0x4A ('J') for JSON, 0x42 ('B') for binary
//! bytes 1..4 : payload length, signed 32-bit, big-endian
//! bytes 5..  : exactly <length> payload bytes
//! ```
//!
//! This mirrors [`crate`]'s teacher's length-prefixed framing (a 4-byte
//! big-endian length ahead of a JSON payload), generalized with an
//! explicit kind byte so binary chunk bodies don't need to be base64'd
//! into JSON.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{NetShareError, Result};

/// Upper bound on a single frame's payload, independent of the wire
/// format's `i32` range. The reference accepts up to `i32::MAX` bytes;
/// callers needing a tighter cap for untrusted peers can wrap
/// [`read_frame`] themselves.
pub const MAX_FRAME_LEN: i32 = i32::MAX;

const KIND_JSON: u8 = b'J';
const KIND_BINARY: u8 = b'B';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Json,
    Binary,
}

impl FrameKind {
    fn to_byte(self) -> u8 {
        match self {
            FrameKind::Json => KIND_JSON,
            FrameKind::Binary => KIND_BINARY,
        }
    }

    fn from_byte(b: u8) -> Result<Self> {
        match b {
            KIND_JSON => Ok(FrameKind::Json),
            KIND_BINARY => Ok(FrameKind::Binary),
            other => Err(NetShareError::BadRequest(format!(
                "unknown frame kind byte: 0x{other:02x}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub kind: FrameKind,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn json(payload: Vec<u8>) -> Self {
        Frame {
            kind: FrameKind::Json,
            payload,
        }
    }

    pub fn binary(payload: Vec<u8>) -> Self {
        Frame {
            kind: FrameKind::Binary,
            payload,
        }
    }
}

/// Write a single frame. Flushes afterward so interactive control
/// messages aren't held up behind the socket's internal buffering.
///
/// Callers MUST NOT interleave writers on the same stream (spec §4.1:
/// "atomic per frame").
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if frame.payload.len() as u64 > MAX_FRAME_LEN as u64 {
        return Err(NetShareError::BadRequest(format!(
            "frame payload too large: {} bytes",
            frame.payload.len()
        )));
    }
    let len = frame.payload.len() as i32;
    let mut header = [0u8; 5];
    header[0] = frame.kind.to_byte();
    header[1..5].copy_from_slice(&len.to_be_bytes());

    writer.write_all(&header).await?;
    writer.write_all(&frame.payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a single frame. Returns `Ok(None)` at a clean end-of-stream
/// (byte 0 unavailable); returns an error for anything else, including a
/// truncated frame.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut kind_byte = [0u8; 1];
    match reader.read(&mut kind_byte).await {
        Ok(0) => return Ok(None),
        Ok(_) => {}
        Err(e) => return Err(NetShareError::Io(e.to_string())),
    }

    let kind = FrameKind::from_byte(kind_byte[0])?;

    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| NetShareError::Transport(format!("unexpected end of stream: {e}")))?;
    let len = i32::from_be_bytes(len_buf);

    if len < 0 || len > MAX_FRAME_LEN {
        return Err(NetShareError::BadRequest(format!(
            "invalid frame length: {len}"
        )));
    }

    let mut payload = vec![0u8; len as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| NetShareError::Transport(format!("unexpected end of stream: {e}")))?;

    Ok(Some(Frame { kind, payload }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn round_trip_json_and_binary() {
        for payload in [Vec::new(), b"hello world".to_vec(), vec![0u8; 70_000]] {
            for kind in [FrameKind::Json, FrameKind::Binary] {
                let frame = Frame {
                    kind,
                    payload: payload.clone(),
                };
                let mut buf = Vec::new();
                write_frame(&mut buf, &frame).await.unwrap();

                let mut cursor = Cursor::new(buf);
                let read_back = read_frame(&mut cursor).await.unwrap().unwrap();
                assert_eq!(read_back.kind, kind);
                assert_eq!(read_back.payload, payload);
            }
        }
    }

    #[tokio::test]
    async fn bad_kind_byte_is_bad_request() {
        let mut buf = vec![b'X', 0, 0, 0, 0];
        let mut cursor = Cursor::new(&mut buf);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::BadRequest);
    }

    #[tokio::test]
    async fn negative_length_is_bad_request() {
        let mut buf = Vec::new();
        buf.push(b'J');
        buf.extend_from_slice(&(-1i32).to_be_bytes());
        let mut cursor = Cursor::new(&mut buf);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::BadRequest);
    }

    #[tokio::test]
    async fn truncated_frame_is_transport_error() {
        let mut buf = Vec::new();
        buf.push(b'J');
        buf.extend_from_slice(&10i32.to_be_bytes());
        buf.extend_from_slice(b"short");
        let mut cursor = Cursor::new(&mut buf);
        assert!(read_frame(&mut cursor).await.is_err());
    }

    #[tokio::test]
    async fn empty_stream_is_clean_eof() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        assert!(read_frame(&mut cursor).await.unwrap().is_none());
    }
}
