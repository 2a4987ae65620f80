//! Session state machine shared vocabulary (spec §4.8/§4.9, design note
//! in spec §9: "a small tagged enum is clearer than a boolean `authed`
//! flag").

pub mod client;
pub mod server;

use std::time::Duration;

/// Control-path read/write timeout (spec §5). Transfer-path reads
/// inherit the same bound.
pub const CONTROL_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitHello,
    AwaitAuth,
    Ready,
    Transfer,
    Closed,
}

#[derive(Debug, Clone)]
pub struct ServerPolicy {
    pub server_id: String,
    pub open_mode: bool,
    pub shared_key: Option<Vec<u8>>,
    pub auth_modes: Vec<String>,
}

impl ServerPolicy {
    pub fn selected_auth(&self) -> &'static str {
        if self.open_mode {
            "open"
        } else {
            "psk-hmac-sha256"
        }
    }

    pub fn auth_required(&self) -> bool {
        !self.open_mode
    }
}
