//! JSON control envelope and request/response catalog (spec §4.2).
//!
//! Every message that crosses a session's `FrameKind::Json` frames is one
//! of the variants below. We decode into explicit per-message
//! tagged-union cases (spec.md §9's preferred approach) rather than a
//! generic JSON tree, the same shape the teacher uses for `PeerMessage`
//! in `lan/protocol.rs` — just with one struct per request/response
//! instead of one per connection-lifecycle event.

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

/// Protocol version carried verbatim in every ANNOUNCE and HELLO.
pub const PROTOCOL_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMode {
    #[serde(rename = "open")]
    Open,
    #[serde(rename = "psk-hmac-sha256")]
    PskHmacSha256,
}

impl AuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::Open => "open",
            AuthMode::PskHmacSha256 => "psk-hmac-sha256",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorObject {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        ErrorObject {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMeta {
    pub size: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareSummary {
    #[serde(rename = "shareId")]
    pub share_id: String,
    pub name: String,
    #[serde(rename = "readOnly")]
    pub read_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    #[serde(rename = "isDir")]
    pub is_dir: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(rename = "mtimeUtc", skip_serializing_if = "Option::is_none")]
    pub mtime_utc: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatInfo {
    pub size: u64,
    #[serde(rename = "mtimeUtc")]
    pub mtime_utc: String,
    pub sha256: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Requests
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientRequest {
    #[serde(rename = "HELLO", rename_all = "camelCase")]
    Hello {
        req_id: String,
        proto: String,
        device_id: String,
        device_name: String,
        auth: String,
    },
    #[serde(rename = "AUTH", rename_all = "camelCase")]
    Auth {
        req_id: String,
        client_nonce: String,
        mac: String,
    },
    #[serde(rename = "PING", rename_all = "camelCase")]
    Ping { req_id: String },
    #[serde(rename = "LIST_SHARES", rename_all = "camelCase")]
    ListShares { req_id: String },
    #[serde(rename = "LIST_DIR", rename_all = "camelCase")]
    ListDir {
        req_id: String,
        share_id: String,
        path: String,
    },
    #[serde(rename = "STAT", rename_all = "camelCase")]
    Stat {
        req_id: String,
        share_id: String,
        path: String,
    },
    #[serde(rename = "DOWNLOAD_REQ", rename_all = "camelCase")]
    DownloadReq {
        req_id: String,
        transfer_id: String,
        share_id: String,
        path: String,
        offset: u64,
    },
    #[serde(rename = "UPLOAD_REQ", rename_all = "camelCase")]
    UploadReq {
        req_id: String,
        transfer_id: String,
        share_id: String,
        path: String,
        file: FileMeta,
    },
    /// Reserved, unregistered range-hash operation (spec §9 open
    /// question): decodable off the wire and invokable directly against
    /// `transfer::hash_range` in tests, but the session server has no
    /// dispatch arm for it, so a peer that sends it gets the generic
    /// `BAD_REQUEST` unknown-in-state response.
    #[serde(rename = "HASH_REQ", rename_all = "camelCase")]
    HashReq {
        req_id: String,
        share_id: String,
        path: String,
        offset: u64,
        length: u64,
    },
}

impl ClientRequest {
    pub fn req_id(&self) -> &str {
        match self {
            ClientRequest::Hello { req_id, .. }
            | ClientRequest::Auth { req_id, .. }
            | ClientRequest::Ping { req_id }
            | ClientRequest::ListShares { req_id }
            | ClientRequest::ListDir { req_id, .. }
            | ClientRequest::Stat { req_id, .. }
            | ClientRequest::DownloadReq { req_id, .. }
            | ClientRequest::UploadReq { req_id, .. }
            | ClientRequest::HashReq { req_id, .. } => req_id,
        }
    }

    /// The `type` of this request, used to derive `${type}_RESP` for
    /// unknown/undecodable message handling.
    pub fn type_name(&self) -> &'static str {
        match self {
            ClientRequest::Hello { .. } => "HELLO",
            ClientRequest::Auth { .. } => "AUTH",
            ClientRequest::Ping { .. } => "PING",
            ClientRequest::ListShares { .. } => "LIST_SHARES",
            ClientRequest::ListDir { .. } => "LIST_DIR",
            ClientRequest::Stat { .. } => "STAT",
            ClientRequest::DownloadReq { .. } => "DOWNLOAD_REQ",
            ClientRequest::UploadReq { .. } => "UPLOAD_REQ",
            ClientRequest::HashReq { .. } => "HASH_REQ",
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Responses
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloAck {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub req_id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_required: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_auth: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthOk {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub req_id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pong {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub req_id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSharesResp {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub req_id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shares: Option<Vec<ShareSummary>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDirResp {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub req_id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<DirEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatResp {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub req_id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stat: Option<StatInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadAck {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub req_id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<FileMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadAck {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub req_id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

/// Response shape for the reserved `HASH_REQ` operation (spec §9). Never
/// produced by the session server today — `HashReq` always falls through
/// to `GenericFailureResp` there — but kept alongside it so a future
/// dispatch arm has a wire shape to return.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashResp {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub req_id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

/// Generic failure response used for unknown request types and decode
/// errors: `${type}_RESP{ok=false, error}` (spec §4.2 table, last row).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericFailureResp {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub req_id: String,
    pub ok: bool,
    pub error: ErrorObject,
}

impl GenericFailureResp {
    pub fn new(response_type: impl Into<String>, req_id: impl Into<String>, error: ErrorObject) -> Self {
        GenericFailureResp {
            msg_type: response_type.into(),
            req_id: req_id.into(),
            ok: false,
            error,
        }
    }
}

/// Mechanical `request type -> response type` mapping (spec §4.2 table).
pub fn response_type_for(request_type: &str) -> String {
    match request_type {
        "HELLO" => "HELLO_ACK".to_string(),
        "AUTH" => "AUTH_OK".to_string(),
        "PING" => "PONG".to_string(),
        "LIST_SHARES" => "LIST_SHARES_RESP".to_string(),
        "LIST_DIR" => "LIST_DIR_RESP".to_string(),
        "STAT" => "STAT_RESP".to_string(),
        "DOWNLOAD_REQ" => "DOWNLOAD_ACK".to_string(),
        "UPLOAD_REQ" => "UPLOAD_ACK".to_string(),
        "HASH_REQ" => "HASH_RESP".to_string(),
        other => format!("{other}_RESP"),
    }
}
