//! UDP discovery service (spec §4.7): announce/query/response loop over
//! one broadcast-enabled socket.
//!
//! Grounded almost directly on `lan/discovery.rs`'s
//! `run_beacon_broadcaster` / `run_beacon_listener` / `bind_reusable_udp`
//! trio: same `socket2`-based `SO_REUSEADDR`/`SO_REUSEPORT`/
//! `SO_BROADCAST` socket setup converted into a `tokio::net::UdpSocket`,
//! same `tokio::select!`-driven cancellable loop shape. The 30-second
//! error-log throttle is new (spec §4.7) but follows the teacher's
//! "log and keep going" posture for transient socket errors.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use socket2::{Domain, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::events::EventBus;
use crate::peer_directory::{now_ms, PeerDirectory};
use crate::protocol::PROTOCOL_VERSION;

pub const DEFAULT_DISCOVERY_PORT: u16 = 40123;
pub const ANNOUNCE_INTERVAL: Duration = Duration::from_millis(2000);
const ERROR_LOG_THROTTLE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    pub auth: Vec<String>,
    pub resume: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DiscoveryMessage {
    #[serde(rename = "DISCOVERY_ANNOUNCE", rename_all = "camelCase")]
    Announce {
        proto: String,
        device_id: String,
        device_name: String,
        tcp_port: u16,
        discovery_port: u16,
        timestamp: String,
        capabilities: Capabilities,
    },
    #[serde(rename = "DISCOVERY_QUERY", rename_all = "camelCase")]
    Query { proto: String, timestamp: String },
    #[serde(rename = "DISCOVERY_RESPONSE", rename_all = "camelCase")]
    Response {
        proto: String,
        device_id: String,
        device_name: String,
        tcp_port: u16,
        discovery_port: u16,
        timestamp: String,
        capabilities: Capabilities,
    },
}

impl DiscoveryMessage {
    pub fn device_id(&self) -> Option<&str> {
        match self {
            DiscoveryMessage::Announce { device_id, .. } | DiscoveryMessage::Response { device_id, .. } => {
                Some(device_id)
            }
            DiscoveryMessage::Query { .. } => None,
        }
    }

    pub fn proto(&self) -> &str {
        match self {
            DiscoveryMessage::Announce { proto, .. }
            | DiscoveryMessage::Query { proto, .. }
            | DiscoveryMessage::Response { proto, .. } => proto,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub bind_addr: IpAddr,
    pub port: u16,
    pub broadcast_addr: IpAddr,
    pub device_id: String,
    pub device_name: String,
    pub tcp_port: u16,
    pub auth_modes: Vec<String>,
    /// spec.md §9 open-question resolution: an explicit capability flag
    /// instead of the reference's implicit "announce factory configured"
    /// behavior.
    pub respond_to_queries: bool,
    pub query_on_startup: bool,
}

/// Public for reuse wherever a filesystem timestamp needs the same
/// UTC rendering as discovery messages (e.g. `STAT_RESP.mtimeUtc`).
pub fn format_unix_timestamp(unix_secs: u64) -> String {
    format!("{}Z", chrono_free_format(unix_secs))
}

fn now_iso8601() -> String {
    let since_epoch = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = since_epoch.as_secs();
    let millis = since_epoch.subsec_millis();
    let datetime = chrono_free_format(secs);
    format!("{datetime}.{millis:03}Z")
}

/// Minimal UTC `YYYY-MM-DDTHH:MM:SS` formatter over a Unix timestamp,
/// avoiding a chrono dependency the teacher doesn't carry.
fn chrono_free_format(unix_secs: u64) -> String {
    const DAYS_PER_400Y: i64 = 146097;

    let days = unix_secs / 86400;
    let secs_of_day = unix_secs % 86400;
    let (h, m, s) = (secs_of_day / 3600, (secs_of_day % 3600) / 60, secs_of_day % 60);

    let z = days as i64 + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / DAYS_PER_400Y;
    let doe = (z - era * DAYS_PER_400Y) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let mth = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if mth <= 2 { y + 1 } else { y };

    format!("{y:04}-{mth:02}-{d:02}T{h:02}:{m:02}:{s:02}")
}

fn announce_message(config: &DiscoveryConfig) -> DiscoveryMessage {
    DiscoveryMessage::Announce {
        proto: PROTOCOL_VERSION.to_string(),
        device_id: config.device_id.clone(),
        device_name: config.device_name.clone(),
        tcp_port: config.tcp_port,
        discovery_port: config.port,
        timestamp: now_iso8601(),
        capabilities: Capabilities {
            auth: config.auth_modes.clone(),
            resume: true,
        },
    }
}

/// Bind a UDP socket with address/port reuse and broadcast enabled,
/// mirroring `lan/discovery.rs::bind_reusable_udp`.
fn bind_reusable_udp(addr: SocketAddr) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, None)?;
    socket.set_reuse_address(true)?;
    #[cfg(not(target_os = "windows"))]
    socket.set_reuse_port(true)?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}

pub struct DiscoveryHandle {
    cancel: CancellationToken,
    announce_task: tokio::task::JoinHandle<()>,
    listen_task: tokio::task::JoinHandle<()>,
}

impl DiscoveryHandle {
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.announce_task.await;
        let _ = self.listen_task.await;
    }
}

/// Start the announce and listen tasks sharing one UDP socket and one
/// cancellation token. `events` receives a `PeersChanged` snapshot on
/// every discovered/refreshed peer and a `Log` entry on throttled
/// transport errors (spec §6).
pub async fn start(config: DiscoveryConfig, peers: PeerDirectory, events: EventBus) -> std::io::Result<DiscoveryHandle> {
    let bind_addr = SocketAddr::new(config.bind_addr, config.port);
    let socket = Arc::new(bind_reusable_udp(bind_addr)?);
    let config = Arc::new(config);
    let cancel = CancellationToken::new();

    if config.query_on_startup {
        if let Ok(payload) = serde_json::to_vec(&DiscoveryMessage::Query {
            proto: PROTOCOL_VERSION.to_string(),
            timestamp: now_iso8601(),
        }) {
            let target = SocketAddr::new(config.broadcast_addr, config.port);
            let _ = socket.send_to(&payload, target).await;
        }
    }

    let announce_task = tokio::spawn(run_announce_loop(
        socket.clone(),
        config.clone(),
        cancel.clone(),
        events.clone(),
    ));
    let listen_task = tokio::spawn(run_listen_loop(socket, config, peers, events, cancel.clone()));

    Ok(DiscoveryHandle {
        cancel,
        announce_task,
        listen_task,
    })
}

async fn run_announce_loop(
    socket: Arc<UdpSocket>,
    config: Arc<DiscoveryConfig>,
    cancel: CancellationToken,
    events: EventBus,
) {
    let target = SocketAddr::new(config.broadcast_addr, config.port);
    let mut ticker = interval(ANNOUNCE_INTERVAL);
    let mut last_error_logged: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let message = announce_message(&config);
                match serde_json::to_vec(&message) {
                    Ok(payload) => {
                        if let Err(e) = socket.send_to(&payload, target).await {
                            let msg = format!("discovery announce send failed: {e}");
                            throttled_log(&mut last_error_logged, || log::warn!("{msg}"));
                            events.log(log::Level::Warn, msg);
                        }
                    }
                    Err(e) => {
                        let msg = format!("discovery announce encode failed: {e}");
                        throttled_log(&mut last_error_logged, || log::warn!("{msg}"));
                        events.log(log::Level::Warn, msg);
                    }
                }
            }
        }
    }
}

async fn run_listen_loop(
    socket: Arc<UdpSocket>,
    config: Arc<DiscoveryConfig>,
    peers: PeerDirectory,
    events: EventBus,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; 64 * 1024];
    let mut last_error_logged: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, from)) => handle_datagram(&socket, &config, &peers, &events, &buf[..len], from).await,
                    Err(e) => {
                        let msg = format!("discovery recv failed: {e}");
                        throttled_log(&mut last_error_logged, || log::warn!("{msg}"));
                        events.log(log::Level::Warn, msg);
                    }
                }
            }
        }
    }
}

async fn handle_datagram(
    socket: &UdpSocket,
    config: &DiscoveryConfig,
    peers: &PeerDirectory,
    events: &EventBus,
    bytes: &[u8],
    from: SocketAddr,
) {
    let message: DiscoveryMessage = match serde_json::from_slice(bytes) {
        Ok(m) => m,
        Err(_) => return,
    };

    if message.proto() != PROTOCOL_VERSION {
        return;
    }
    if let Some(device_id) = message.device_id() {
        if device_id == config.device_id {
            return;
        }
    }

    match message {
        DiscoveryMessage::Announce {
            device_id,
            device_name,
            tcp_port,
            discovery_port,
            ..
        }
        | DiscoveryMessage::Response {
            device_id,
            device_name,
            tcp_port,
            discovery_port,
            ..
        } => {
            peers.upsert(device_id, device_name, from.ip(), tcp_port, discovery_port, now_ms());
            events.peers_changed(peers.snapshot());
        }
        DiscoveryMessage::Query { .. } => {
            if !config.respond_to_queries {
                return;
            }
            let response = match announce_message(config) {
                DiscoveryMessage::Announce {
                    proto,
                    device_id,
                    device_name,
                    tcp_port,
                    discovery_port,
                    timestamp,
                    capabilities,
                } => DiscoveryMessage::Response {
                    proto,
                    device_id,
                    device_name,
                    tcp_port,
                    discovery_port,
                    timestamp,
                    capabilities,
                },
                other => other,
            };
            if let Ok(payload) = serde_json::to_vec(&response) {
                let _ = socket.send_to(&payload, from).await;
            }
        }
    }
}

fn throttled_log(last: &mut Option<Instant>, emit: impl FnOnce()) {
    let now = Instant::now();
    if last.map(|t| now.duration_since(t) >= ERROR_LOG_THROTTLE).unwrap_or(true) {
        emit();
        *last = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announce_round_trips_through_json() {
        let config = DiscoveryConfig {
            bind_addr: "0.0.0.0".parse().unwrap(),
            port: DEFAULT_DISCOVERY_PORT,
            broadcast_addr: "255.255.255.255".parse().unwrap(),
            device_id: "dev-1".into(),
            device_name: "laptop".into(),
            tcp_port: 40124,
            auth_modes: vec!["open".into(), "psk-hmac-sha256".into()],
            respond_to_queries: true,
            query_on_startup: false,
        };
        let message = announce_message(&config);
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "DISCOVERY_ANNOUNCE");
        assert_eq!(json["deviceId"], "dev-1");

        let decoded: DiscoveryMessage = serde_json::from_value(json).unwrap();
        assert_eq!(decoded.device_id(), Some("dev-1"));
        assert_eq!(decoded.proto(), PROTOCOL_VERSION);
    }

    #[test]
    fn query_has_no_device_id() {
        let query = DiscoveryMessage::Query {
            proto: PROTOCOL_VERSION.to_string(),
            timestamp: now_iso8601(),
        };
        assert_eq!(query.device_id(), None);
        let json = serde_json::to_value(&query).unwrap();
        assert!(json.get("deviceId").is_none());
    }

    #[test]
    fn timestamp_has_iso8601_shape() {
        let ts = now_iso8601();
        assert!(ts.contains('T'));
        assert!(ts.ends_with('Z'));
    }
}
