//! Session server (C8, spec §4.8): accepts TCP clients and drives the
//! per-connection state machine.
//!
//! Grounded on `lan/peer.rs::run_tcp_host`/`host_session`/
//! `run_peer_session` for the accept-loop/per-connection-task split,
//! adapted from the teacher's single always-on heartbeat loop to this
//! protocol's strict request/response control phase followed by at most
//! one transfer phase per connection (spec §4.8, §9 "one transfer per
//! connection").

use std::time::SystemTime;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::auth;
use crate::error::{ErrorCode, NetShareError, Result};
use crate::events::{EventBus, TransferDirection, TransferProgress, TransferState};
use crate::framing::{read_frame, write_frame, Frame, FrameKind};
use crate::path_safety;
use crate::protocol::{
    AuthOk, ClientRequest, DirEntry, DownloadAck, ErrorObject, FileMeta, GenericFailureResp, HelloAck,
    ListDirResp, ListSharesResp, Pong, ShareSummary, StatInfo, StatResp, UploadAck, PROTOCOL_VERSION,
};
use crate::session::{ServerPolicy, SessionState, CONTROL_TIMEOUT};
use crate::share_registry::ShareRegistry;
use crate::transfer::{self, FileEnd, UploadDone};

pub async fn run_accept_loop(
    listener: TcpListener,
    policy: ServerPolicy,
    shares: ShareRegistry,
    cancel: CancellationToken,
    events: EventBus,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        let policy = policy.clone();
                        let shares = shares.clone();
                        let events = events.clone();
                        tokio::spawn(async move {
                            let mut stream = stream;
                            if let Err(e) = handle_connection(&mut stream, &policy, &shares, &events).await {
                                let msg = format!("session with {addr} ended: {e}");
                                log::warn!("{msg}");
                                events.log(log::Level::Warn, msg);
                            }
                        });
                    }
                    Err(e) => log::warn!("accept failed: {e}"),
                }
            }
        }
    }
}

struct Decoded {
    req_type: String,
    req_id: String,
    request: Option<ClientRequest>,
}

fn decode(payload: &[u8]) -> Decoded {
    let value: serde_json::Value = serde_json::from_slice(payload).unwrap_or(serde_json::Value::Null);
    let req_type = value
        .get("type")
        .and_then(|v| v.as_str())
        .unwrap_or("UNKNOWN")
        .to_string();
    let req_id = value.get("reqId").and_then(|v| v.as_str()).unwrap_or("").to_string();
    let request = serde_json::from_value::<ClientRequest>(value).ok();
    Decoded {
        req_type,
        req_id,
        request,
    }
}

async fn write_json<S, T>(stream: &mut S, value: &T) -> Result<()>
where
    S: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let payload =
        serde_json::to_vec(value).map_err(|e| NetShareError::Internal(format!("encode response: {e}")))?;
    write_frame(stream, &Frame::json(payload)).await
}

/// Drive one accepted connection end to end.
pub async fn handle_connection<S>(
    stream: &mut S,
    policy: &ServerPolicy,
    shares: &ShareRegistry,
    events: &EventBus,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut state = SessionState::AwaitHello;
    let mut peer_device_id = String::new();
    let mut server_nonce = [0u8; auth::NONCE_LEN];
    let mut client_nonce: Vec<u8> = Vec::new();

    loop {
        let frame = match timeout(CONTROL_TIMEOUT, read_frame(stream)).await {
            Ok(Ok(Some(f))) => f,
            Ok(Ok(None)) => return Ok(()),
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(NetShareError::Transport("control read timed out".to_string())),
        };
        if frame.kind != FrameKind::Json {
            return Err(NetShareError::BadRequest("expected JSON control frame".to_string()));
        }

        let decoded = decode(&frame.payload);
        let Some(request) = decoded.request else {
            let resp = GenericFailureResp::new(
                crate::protocol::response_type_for(&decoded.req_type),
                decoded.req_id,
                ErrorObject::new(ErrorCode::BadRequest, "undecodable request"),
            );
            write_json(stream, &resp).await?;
            return Ok(());
        };

        match (state, request) {
            (SessionState::AwaitHello, ClientRequest::Hello { req_id, proto, device_id, auth, .. }) => {
                if proto != PROTOCOL_VERSION {
                    let resp = HelloAck {
                        msg_type: "HELLO_ACK".into(),
                        req_id,
                        ok: false,
                        server_id: None,
                        nonce: None,
                        auth: None,
                        auth_required: None,
                        selected_auth: None,
                        error: Some(ErrorObject::new(ErrorCode::UnsupportedVersion, format!("unsupported proto {proto}"))),
                    };
                    write_json(stream, &resp).await?;
                    return Ok(());
                }
                if auth != "open" && auth != "psk-hmac-sha256" {
                    let resp = HelloAck {
                        msg_type: "HELLO_ACK".into(),
                        req_id,
                        ok: false,
                        server_id: None,
                        nonce: None,
                        auth: None,
                        auth_required: None,
                        selected_auth: None,
                        error: Some(ErrorObject::new(ErrorCode::BadRequest, format!("unknown auth mode {auth}"))),
                    };
                    write_json(stream, &resp).await?;
                    return Ok(());
                }

                server_nonce = auth::generate_nonce();
                peer_device_id = device_id;
                let resp = HelloAck {
                    msg_type: "HELLO_ACK".into(),
                    req_id,
                    ok: true,
                    server_id: Some(policy.server_id.clone()),
                    nonce: Some(auth::encode_nonce(&server_nonce)),
                    auth: Some(policy.auth_modes.clone()),
                    auth_required: Some(policy.auth_required()),
                    selected_auth: Some(policy.selected_auth().to_string()),
                    error: None,
                };
                write_json(stream, &resp).await?;
                state = if policy.open_mode {
                    SessionState::Ready
                } else {
                    SessionState::AwaitAuth
                };
            }
            (SessionState::AwaitAuth, ClientRequest::Auth { req_id, client_nonce: cn_b64, mac }) => {
                if policy.open_mode {
                    write_json(stream, &AuthOk { msg_type: "AUTH_OK".into(), req_id, ok: true, error: None }).await?;
                    state = SessionState::Ready;
                    continue;
                }
                let Some(key) = policy.shared_key.as_ref() else {
                    write_json(
                        stream,
                        &AuthOk {
                            msg_type: "AUTH_OK".into(),
                            req_id,
                            ok: false,
                            error: Some(ErrorObject::new(ErrorCode::AuthRequired, "server has no key configured")),
                        },
                    )
                    .await?;
                    return Ok(());
                };
                client_nonce = match auth::decode_nonce(&cn_b64) {
                    Ok(n) => n,
                    Err(_) => {
                        write_json(
                            stream,
                            &AuthOk {
                                msg_type: "AUTH_OK".into(),
                                req_id,
                                ok: false,
                                error: Some(ErrorObject::new(ErrorCode::AuthFailed, "malformed client nonce")),
                            },
                        )
                        .await?;
                        return Ok(());
                    }
                };
                match auth::verify_mac(key, &server_nonce, &client_nonce, &policy.server_id, &peer_device_id, &mac) {
                    Ok(()) => {
                        write_json(stream, &AuthOk { msg_type: "AUTH_OK".into(), req_id, ok: true, error: None }).await?;
                        state = SessionState::Ready;
                    }
                    Err(_) => {
                        write_json(
                            stream,
                            &AuthOk {
                                msg_type: "AUTH_OK".into(),
                                req_id,
                                ok: false,
                                error: Some(ErrorObject::new(ErrorCode::AuthFailed, "mac mismatch")),
                            },
                        )
                        .await?;
                        return Ok(());
                    }
                }
            }
            (SessionState::Ready, ClientRequest::Ping { req_id }) => {
                write_json(stream, &Pong { msg_type: "PONG".into(), req_id, ok: true, error: None }).await?;
            }
            (SessionState::Ready, ClientRequest::ListShares { req_id }) => {
                let summaries = shares
                    .list()
                    .into_iter()
                    .map(|s| ShareSummary { share_id: s.share_id, name: s.name, read_only: s.read_only })
                    .collect();
                write_json(
                    stream,
                    &ListSharesResp { msg_type: "LIST_SHARES_RESP".into(), req_id, ok: true, shares: Some(summaries), error: None },
                )
                .await?;
            }
            (SessionState::Ready, ClientRequest::ListDir { req_id, share_id, path }) => {
                let resp = list_dir(shares, &share_id, &path).await;
                write_json(stream, &resp.into_response(req_id)).await?;
            }
            (SessionState::Ready, ClientRequest::Stat { req_id, share_id, path }) => {
                let resp = stat(shares, &share_id, &path).await;
                write_json(stream, &resp.into_response(req_id)).await?;
            }
            (SessionState::Ready, ClientRequest::DownloadReq { req_id, transfer_id, share_id, path, offset }) => {
                run_download(stream, shares, events, req_id, transfer_id, &share_id, &path, offset).await?;
                return Ok(());
            }
            (SessionState::Ready, ClientRequest::UploadReq { req_id, transfer_id, share_id, path, file }) => {
                run_upload(stream, shares, events, req_id, transfer_id, &share_id, &path, file).await?;
                return Ok(());
            }
            (_, other) => {
                let resp = GenericFailureResp::new(
                    crate::protocol::response_type_for(other.type_name()),
                    other.req_id().to_string(),
                    ErrorObject::new(ErrorCode::BadRequest, "request not valid in current session state"),
                );
                write_json(stream, &resp).await?;
                return Ok(());
            }
        }
    }
}

enum LookupOutcome<T> {
    Ok(T),
    Err(ErrorCode, String),
}

impl LookupOutcome<Vec<DirEntry>> {
    fn into_response(self, req_id: String) -> ListDirResp {
        match self {
            LookupOutcome::Ok(entries) => ListDirResp { msg_type: "LIST_DIR_RESP".into(), req_id, ok: true, entries: Some(entries), error: None },
            LookupOutcome::Err(code, msg) => ListDirResp { msg_type: "LIST_DIR_RESP".into(), req_id, ok: false, entries: None, error: Some(ErrorObject::new(code, msg)) },
        }
    }
}

impl LookupOutcome<StatInfo> {
    fn into_response(self, req_id: String) -> StatResp {
        match self {
            LookupOutcome::Ok(stat) => StatResp { msg_type: "STAT_RESP".into(), req_id, ok: true, stat: Some(stat), error: None },
            LookupOutcome::Err(code, msg) => StatResp { msg_type: "STAT_RESP".into(), req_id, ok: false, stat: None, error: Some(ErrorObject::new(code, msg)) },
        }
    }
}

fn resolve_share_and_path(shares: &ShareRegistry, share_id: &str, path: &str) -> std::result::Result<std::path::PathBuf, (ErrorCode, String)> {
    let share = shares.get(share_id).ok_or_else(|| (ErrorCode::NotFound, format!("no such share: {share_id}")))?;
    path_safety::resolve(&share.local_path, path).map_err(|e| (e.code(), e.to_string()))
}

async fn list_dir(shares: &ShareRegistry, share_id: &str, path: &str) -> LookupOutcome<Vec<DirEntry>> {
    let resolved = match resolve_share_and_path(shares, share_id, path) {
        Ok(p) => p,
        Err((code, msg)) => return LookupOutcome::Err(code, msg),
    };
    let metadata = match tokio::fs::metadata(&resolved).await {
        Ok(m) => m,
        Err(_) => return LookupOutcome::Err(ErrorCode::NotFound, "path does not exist".to_string()),
    };
    if !metadata.is_dir() {
        return LookupOutcome::Err(ErrorCode::NotFound, "not a directory".to_string());
    }
    let mut entries = Vec::new();
    let mut read_dir = match tokio::fs::read_dir(&resolved).await {
        Ok(r) => r,
        Err(e) => return LookupOutcome::Err(ErrorCode::IoError, e.to_string()),
    };
    loop {
        match read_dir.next_entry().await {
            Ok(Some(entry)) => {
                let meta = match entry.metadata().await {
                    Ok(m) => m,
                    Err(e) => return LookupOutcome::Err(ErrorCode::IoError, e.to_string()),
                };
                let name = entry.file_name().to_string_lossy().into_owned();
                if meta.is_dir() {
                    entries.push(DirEntry { name, is_dir: true, size: None, mtime_utc: None });
                } else {
                    let mtime = meta.modified().ok().map(format_system_time);
                    entries.push(DirEntry { name, is_dir: false, size: Some(meta.len()), mtime_utc: mtime });
                }
            }
            Ok(None) => break,
            Err(e) => return LookupOutcome::Err(ErrorCode::IoError, e.to_string()),
        }
    }
    LookupOutcome::Ok(entries)
}

async fn stat(shares: &ShareRegistry, share_id: &str, path: &str) -> LookupOutcome<StatInfo> {
    let resolved = match resolve_share_and_path(shares, share_id, path) {
        Ok(p) => p,
        Err((code, msg)) => return LookupOutcome::Err(code, msg),
    };
    let metadata = match tokio::fs::metadata(&resolved).await {
        Ok(m) if m.is_file() => m,
        _ => return LookupOutcome::Err(ErrorCode::NotFound, "not a regular file".to_string()),
    };
    let mut file = match tokio::fs::File::open(&resolved).await {
        Ok(f) => f,
        Err(e) => return LookupOutcome::Err(ErrorCode::IoError, e.to_string()),
    };
    let (size, sha256) = match transfer::hash_whole_file(&mut file).await {
        Ok(v) => v,
        Err(e) => return LookupOutcome::Err(e.code(), e.to_string()),
    };
    let mtime_utc = metadata.modified().ok().map(format_system_time).unwrap_or_default();
    LookupOutcome::Ok(StatInfo { size, mtime_utc, sha256 })
}

fn format_system_time(t: SystemTime) -> String {
    let secs = t.duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default().as_secs();
    crate::discovery::format_unix_timestamp(secs)
}

async fn run_download<S>(
    stream: &mut S,
    shares: &ShareRegistry,
    events: &EventBus,
    req_id: String,
    transfer_id: String,
    share_id: &str,
    path: &str,
    offset: u64,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let resolved = match resolve_share_and_path(shares, share_id, path) {
        Ok(p) => p,
        Err((code, msg)) => {
            let resp = DownloadAck { msg_type: "DOWNLOAD_ACK".into(), req_id, ok: false, file: None, offset: None, error: Some(ErrorObject::new(code, msg)) };
            return write_json(stream, &resp).await;
        }
    };
    let mut file = match tokio::fs::File::open(&resolved).await {
        Ok(f) if f.metadata().await.map(|m| m.is_file()).unwrap_or(false) => f,
        _ => {
            let resp = DownloadAck { msg_type: "DOWNLOAD_ACK".into(), req_id, ok: false, file: None, offset: None, error: Some(ErrorObject::new(ErrorCode::NotFound, "not a regular file")) };
            return write_json(stream, &resp).await;
        }
    };
    let (full_size, full_sha) = transfer::hash_whole_file(&mut file).await?;
    let clamped = offset.min(full_size);

    write_json(
        stream,
        &DownloadAck { msg_type: "DOWNLOAD_ACK".into(), req_id, ok: true, file: Some(FileMeta { size: full_size, sha256: full_sha }), offset: Some(clamped), error: None },
    )
    .await?;

    events.transfer(TransferProgress {
        transfer_id: transfer_id.clone(),
        direction: TransferDirection::Download,
        done: clamped,
        total: full_size,
        state: TransferState::Running,
    });

    let result = transfer::send_chunks(stream, &mut file, &transfer_id, clamped, full_size).await;
    let running_hash = match result {
        Ok(h) => h,
        Err(e) => {
            events.transfer(TransferProgress {
                transfer_id: transfer_id.clone(),
                direction: TransferDirection::Download,
                done: clamped,
                total: full_size,
                state: TransferState::Failed,
            });
            return Err(e);
        }
    };
    events.transfer(TransferProgress {
        transfer_id: transfer_id.clone(),
        direction: TransferDirection::Download,
        done: full_size,
        total: full_size,
        state: TransferState::Completed,
    });
    write_json(stream, &FileEnd::success(&transfer_id, full_size, running_hash)).await
}

async fn run_upload<S>(
    stream: &mut S,
    shares: &ShareRegistry,
    events: &EventBus,
    req_id: String,
    transfer_id: String,
    share_id: &str,
    path: &str,
    declared: FileMeta,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let Some(share) = shares.get(share_id) else {
        let resp = UploadAck { msg_type: "UPLOAD_ACK".into(), req_id, ok: false, offset: None, error: Some(ErrorObject::new(ErrorCode::NotFound, "no such share")) };
        return write_json(stream, &resp).await;
    };
    if share.read_only {
        let resp = UploadAck { msg_type: "UPLOAD_ACK".into(), req_id, ok: false, offset: None, error: Some(ErrorObject::new(ErrorCode::ReadOnly, "share is read-only")) };
        return write_json(stream, &resp).await;
    }

    let resolved = match path_safety::resolve(&share.local_path, path) {
        Ok(p) => p,
        Err(e) => {
            let resp = UploadAck { msg_type: "UPLOAD_ACK".into(), req_id, ok: false, offset: None, error: Some(ErrorObject::new(e.code(), e.to_string())) };
            return write_json(stream, &resp).await;
        }
    };
    if let Some(parent) = resolved.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let existing_len = tokio::fs::metadata(&resolved).await.map(|m| m.len()).unwrap_or(0);
    let resume_offset = if existing_len <= declared.size { existing_len } else { 0 };

    let mut file = tokio::fs::OpenOptions::new().create(true).read(true).write(true).open(&resolved).await?;
    if resume_offset == 0 && existing_len > 0 {
        file.set_len(0).await?;
    }

    write_json(stream, &UploadAck { msg_type: "UPLOAD_ACK".into(), req_id, ok: true, offset: Some(resume_offset), error: None }).await?;

    events.transfer(TransferProgress {
        transfer_id: transfer_id.clone(),
        direction: TransferDirection::Upload,
        done: resume_offset,
        total: declared.size,
        state: TransferState::Running,
    });

    let running_hash = match transfer::receive_chunks(stream, &mut file, &transfer_id, resume_offset, declared.size).await {
        Ok(h) => h,
        Err(e) => {
            events.transfer(TransferProgress {
                transfer_id: transfer_id.clone(),
                direction: TransferDirection::Upload,
                done: resume_offset,
                total: declared.size,
                state: TransferState::Failed,
            });
            return write_json(stream, &UploadDone::failure(ErrorObject::new(e.code(), e.to_string()))).await;
        }
    };

    let end_frame = read_frame(stream).await?.ok_or_else(|| NetShareError::Transport("closed before FILE_END".to_string()))?;
    if end_frame.kind != FrameKind::Json {
        return write_json(stream, &UploadDone::failure(ErrorObject::new(ErrorCode::BadRequest, "expected FILE_END frame"))).await;
    }
    let end: FileEnd = serde_json::from_slice(&end_frame.payload)
        .map_err(|e| NetShareError::BadRequest(format!("malformed FILE_END: {e}")))?;
    let end_hash = end.file.map(|f| f.sha256).unwrap_or_default();

    if running_hash != declared.sha256 || running_hash != end_hash {
        events.transfer(TransferProgress {
            transfer_id: transfer_id.clone(),
            direction: TransferDirection::Upload,
            done: declared.size,
            total: declared.size,
            state: TransferState::Failed,
        });
        return write_json(stream, &UploadDone::failure(ErrorObject::new(ErrorCode::IntegrityFailed, "hash mismatch at upload completion"))).await;
    }

    events.transfer(TransferProgress {
        transfer_id: transfer_id.clone(),
        direction: TransferDirection::Upload,
        done: declared.size,
        total: declared.size,
        state: TransferState::Completed,
    });
    write_json(stream, &UploadDone::success()).await
}
