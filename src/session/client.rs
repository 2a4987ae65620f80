//! Session client (C9, spec §4.9): opens a TCP session to a peer, drives
//! the handshake, issues catalog requests, and streams transfers.
//!
//! Grounded on `lan/peer.rs::client_session`/`run_tcp_client` for the
//! connect-then-handshake shape (this crate omits the teacher's
//! reconnect-with-backoff loop here since NetShare opens a fresh
//! connection per operation; SPEC_FULL.md §11 applies that backoff at
//! the connect call site in `main.rs` instead, around the initial
//! `TcpStream::connect`, not inside this module).

use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

use crate::auth;
use crate::error::{NetShareError, Result};
use crate::events::{EventBus, TransferDirection, TransferProgress, TransferState};
use crate::framing::{read_frame, write_frame, Frame, FrameKind};
use crate::protocol::{
    AuthOk, ClientRequest, DirEntry, DownloadAck, FileMeta, HelloAck, ListDirResp, ListSharesResp, Pong,
    ShareSummary, StatInfo, StatResp, UploadAck, PROTOCOL_VERSION,
};
use crate::transfer::{self, FileEnd, UploadDone};

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone)]
pub struct Handshake {
    pub server_id: String,
    pub server_nonce: Vec<u8>,
    pub auth_required: bool,
    pub selected_auth: String,
}

async fn write_json<S, T>(stream: &mut S, value: &T) -> Result<()>
where
    S: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let payload =
        serde_json::to_vec(value).map_err(|e| NetShareError::Internal(format!("encode request: {e}")))?;
    write_frame(stream, &Frame::json(payload)).await
}

async fn read_json<S, T>(stream: &mut S) -> Result<T>
where
    S: AsyncRead + Unpin,
    T: serde::de::DeserializeOwned,
{
    let frame = read_frame(stream)
        .await?
        .ok_or_else(|| NetShareError::Transport("connection closed".to_string()))?;
    if frame.kind != FrameKind::Json {
        return Err(NetShareError::BadRequest("expected JSON response frame".to_string()));
    }
    serde_json::from_slice(&frame.payload).map_err(|e| NetShareError::BadRequest(format!("malformed response: {e}")))
}

fn as_error(error: Option<crate::protocol::ErrorObject>) -> NetShareError {
    match error {
        Some(e) => match e.code {
            crate::error::ErrorCode::BadRequest => NetShareError::BadRequest(e.message),
            crate::error::ErrorCode::UnsupportedVersion => NetShareError::UnsupportedVersion(e.message),
            crate::error::ErrorCode::AuthRequired => NetShareError::AuthRequired,
            crate::error::ErrorCode::AuthFailed => NetShareError::AuthFailed,
            crate::error::ErrorCode::NotFound => NetShareError::NotFound(e.message),
            crate::error::ErrorCode::ReadOnly => NetShareError::ReadOnly,
            crate::error::ErrorCode::PathTraversal => NetShareError::PathTraversal(e.message),
            crate::error::ErrorCode::IoError => NetShareError::Io(e.message),
            crate::error::ErrorCode::IntegrityFailed => NetShareError::IntegrityFailed(e.message),
            crate::error::ErrorCode::InternalError => NetShareError::Internal(e.message),
            crate::error::ErrorCode::InvalidRange => NetShareError::InvalidRange(e.message),
        },
        None => NetShareError::Internal("failure response without an error object".to_string()),
    }
}

/// Send `HELLO`, and `AUTH` if the server's advertised policy (not the
/// local config) requires it. Per spec §4.9 this MUST prefer the
/// server's `authRequired`/`selectedAuth` over local configuration.
pub async fn handshake<S>(
    stream: &mut S,
    device_id: &str,
    device_name: &str,
    requested_auth: &str,
    local_key: Option<&[u8]>,
) -> Result<Handshake>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_json(
        stream,
        &ClientRequest::Hello {
            req_id: new_id(),
            proto: PROTOCOL_VERSION.to_string(),
            device_id: device_id.to_string(),
            device_name: device_name.to_string(),
            auth: requested_auth.to_string(),
        },
    )
    .await?;

    let ack: HelloAck = read_json(stream).await?;
    if !ack.ok {
        return Err(as_error(ack.error));
    }
    let server_id = ack.server_id.ok_or_else(|| NetShareError::BadRequest("HELLO_ACK missing serverId".into()))?;
    let nonce_b64 = ack.nonce.ok_or_else(|| NetShareError::BadRequest("HELLO_ACK missing nonce".into()))?;
    let server_nonce = auth::decode_nonce(&nonce_b64)?;
    let auth_required = ack.auth_required.unwrap_or(false);
    let selected_auth = ack.selected_auth.unwrap_or_else(|| "open".to_string());

    if auth_required || selected_auth == "psk-hmac-sha256" {
        let key = local_key.ok_or(NetShareError::AuthRequired)?;
        let client_nonce = auth::generate_nonce();
        let mac = auth::compute_mac(key, &server_nonce, &client_nonce, &server_id, device_id)?;
        write_json(
            stream,
            &ClientRequest::Auth {
                req_id: new_id(),
                client_nonce: auth::encode_nonce(&client_nonce),
                mac,
            },
        )
        .await?;
        let auth_ok: AuthOk = read_json(stream).await?;
        if !auth_ok.ok {
            return Err(as_error(auth_ok.error));
        }
    }

    Ok(Handshake {
        server_id,
        server_nonce,
        auth_required,
        selected_auth,
    })
}

pub async fn ping<S>(stream: &mut S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_json(stream, &ClientRequest::Ping { req_id: new_id() }).await?;
    let pong: Pong = read_json(stream).await?;
    if pong.ok {
        Ok(())
    } else {
        Err(as_error(pong.error))
    }
}

pub async fn list_shares<S>(stream: &mut S) -> Result<Vec<ShareSummary>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_json(stream, &ClientRequest::ListShares { req_id: new_id() }).await?;
    let resp: ListSharesResp = read_json(stream).await?;
    if resp.ok {
        Ok(resp.shares.unwrap_or_default())
    } else {
        Err(as_error(resp.error))
    }
}

pub async fn list_dir<S>(stream: &mut S, share_id: &str, path: &str) -> Result<Vec<DirEntry>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_json(
        stream,
        &ClientRequest::ListDir { req_id: new_id(), share_id: share_id.to_string(), path: path.to_string() },
    )
    .await?;
    let resp: ListDirResp = read_json(stream).await?;
    if resp.ok {
        Ok(resp.entries.unwrap_or_default())
    } else {
        Err(as_error(resp.error))
    }
}

pub async fn stat<S>(stream: &mut S, share_id: &str, path: &str) -> Result<StatInfo>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_json(
        stream,
        &ClientRequest::Stat { req_id: new_id(), share_id: share_id.to_string(), path: path.to_string() },
    )
    .await?;
    let resp: StatResp = read_json(stream).await?;
    match (resp.ok, resp.stat) {
        (true, Some(stat)) => Ok(stat),
        _ => Err(as_error(resp.error)),
    }
}

/// Download `path` from `share_id` into `dest`, resuming from whatever
/// `dest` already contains (spec §4.10.1).
pub async fn download<S>(
    stream: &mut S,
    events: &EventBus,
    share_id: &str,
    path: &str,
    dest: &mut tokio::fs::File,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    use tokio::io::AsyncSeekExt;

    let transfer_id = new_id();
    let local_len = dest.metadata().await?.len();

    write_json(
        stream,
        &ClientRequest::DownloadReq {
            req_id: new_id(),
            transfer_id: transfer_id.clone(),
            share_id: share_id.to_string(),
            path: path.to_string(),
            offset: local_len,
        },
    )
    .await?;

    let ack: DownloadAck = read_json(stream).await?;
    if !ack.ok {
        return Err(as_error(ack.error));
    }
    let file_meta = ack.file.ok_or_else(|| NetShareError::BadRequest("DOWNLOAD_ACK missing file".into()))?;
    let clamped = ack.offset.unwrap_or(0);

    if local_len > clamped {
        dest.set_len(clamped).await?;
    }
    dest.seek(std::io::SeekFrom::Start(clamped)).await?;

    events.transfer(TransferProgress {
        transfer_id: transfer_id.clone(),
        direction: TransferDirection::Download,
        done: clamped,
        total: file_meta.size,
        state: TransferState::Running,
    });

    let running_hash = match transfer::receive_chunks(stream, dest, &transfer_id, clamped, file_meta.size).await {
        Ok(h) => h,
        Err(e) => {
            events.transfer(TransferProgress {
                transfer_id: transfer_id.clone(),
                direction: TransferDirection::Download,
                done: clamped,
                total: file_meta.size,
                state: TransferState::Failed,
            });
            return Err(e);
        }
    };

    let end: FileEnd = read_json(stream).await?;
    let end_hash = end.file.map(|f| f.sha256).unwrap_or_default();
    if running_hash != file_meta.sha256 || running_hash != end_hash {
        events.transfer(TransferProgress {
            transfer_id: transfer_id.clone(),
            direction: TransferDirection::Download,
            done: file_meta.size,
            total: file_meta.size,
            state: TransferState::Failed,
        });
        return Err(NetShareError::IntegrityFailed("downloaded content hash mismatch".to_string()));
    }
    events.transfer(TransferProgress {
        transfer_id,
        direction: TransferDirection::Download,
        done: file_meta.size,
        total: file_meta.size,
        state: TransferState::Completed,
    });
    Ok(())
}

/// Upload `src` to `path` within `share_id` (spec §4.10.2).
pub async fn upload<S>(
    stream: &mut S,
    events: &EventBus,
    share_id: &str,
    path: &str,
    src: &mut tokio::fs::File,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let transfer_id = new_id();
    let (size, sha256) = transfer::hash_whole_file(src).await?;

    write_json(
        stream,
        &ClientRequest::UploadReq {
            req_id: new_id(),
            transfer_id: transfer_id.clone(),
            share_id: share_id.to_string(),
            path: path.to_string(),
            file: FileMeta { size, sha256: sha256.clone() },
        },
    )
    .await?;

    let ack: UploadAck = read_json(stream).await?;
    if !ack.ok {
        return Err(as_error(ack.error));
    }
    let resume_offset = ack.offset.unwrap_or(0);

    events.transfer(TransferProgress {
        transfer_id: transfer_id.clone(),
        direction: TransferDirection::Upload,
        done: resume_offset,
        total: size,
        state: TransferState::Running,
    });

    let running_hash = match transfer::send_chunks(stream, src, &transfer_id, resume_offset, size).await {
        Ok(h) => h,
        Err(e) => {
            events.transfer(TransferProgress {
                transfer_id: transfer_id.clone(),
                direction: TransferDirection::Upload,
                done: resume_offset,
                total: size,
                state: TransferState::Failed,
            });
            return Err(e);
        }
    };
    write_json(stream, &FileEnd::success(&transfer_id, size, running_hash)).await?;

    let done: UploadDone = read_json(stream).await?;
    if done.ok {
        events.transfer(TransferProgress {
            transfer_id,
            direction: TransferDirection::Upload,
            done: size,
            total: size,
            state: TransferState::Completed,
        });
        Ok(())
    } else {
        events.transfer(TransferProgress {
            transfer_id,
            direction: TransferDirection::Upload,
            done: size,
            total: size,
            state: TransferState::Failed,
        });
        Err(as_error(done.error))
    }
}

