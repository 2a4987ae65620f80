//! Node configuration (spec §6 "Settings source" + SPEC_FULL.md §10.3).
//!
//! Grounded on the teacher's `Config::load` pattern (`CLI/src/config.rs`):
//! read `config.toml` from the working directory, and on first run write
//! a default template and return an error telling the operator to edit
//! and rerun, rather than silently guessing at a shared key or share
//! list.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::AuthMode;
use crate::share_registry::Share;

fn default_discovery_port() -> u16 {
    crate::discovery::DEFAULT_DISCOVERY_PORT
}

fn default_tcp_port() -> u16 {
    40124
}

fn default_device_name() -> String {
    hostname_or_fallback()
}

fn hostname_or_fallback() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "netshare-node".to_string())
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedShare {
    pub share_id: String,
    pub name: String,
    pub local_path: PathBuf,
    pub read_only: bool,
}

impl From<&Share> for PersistedShare {
    fn from(s: &Share) -> Self {
        PersistedShare {
            share_id: s.share_id.clone(),
            name: s.name.clone(),
            local_path: s.local_path.clone(),
            read_only: s.read_only,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Opaque stable identifier, generated once and persisted (spec §6).
    #[serde(default = "generate_device_id")]
    pub device_id: String,
    #[serde(default = "default_device_name")]
    pub device_name: String,
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
    /// `true` runs in open mode (no auth step required).
    #[serde(default = "default_true")]
    pub open_mode: bool,
    /// Required when `open_mode = false`.
    #[serde(default)]
    pub shared_key: Option<String>,
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
    #[serde(default)]
    pub preferred_adapter: Option<String>,
    #[serde(default)]
    pub shares: Vec<PersistedShare>,
}

fn generate_device_id() -> String {
    Uuid::new_v4().to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            device_id: generate_device_id(),
            device_name: default_device_name(),
            discovery_port: default_discovery_port(),
            tcp_port: default_tcp_port(),
            open_mode: true,
            shared_key: None,
            download_dir: None,
            preferred_adapter: None,
            shares: Vec::new(),
        }
    }
}

impl NodeConfig {
    pub fn auth_modes(&self) -> Vec<String> {
        vec![AuthMode::Open.as_str().to_string(), AuthMode::PskHmacSha256.as_str().to_string()]
    }

    /// Path to `config.toml` in the current working directory, the one
    /// `load()` reads from and `save()` writes back to.
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(std::env::current_dir()?.join("config.toml"))
    }

    /// Load `config.toml` from the current working directory. If it
    /// doesn't exist yet, write a default template there and return an
    /// error asking the operator to edit it and rerun.
    pub fn load() -> anyhow::Result<Self> {
        let config_file = Self::config_path()?;
        if !config_file.exists() {
            let template = NodeConfig::default();
            let rendered = toml::to_string_pretty(&template)?;
            fs::write(&config_file, rendered)?;
            anyhow::bail!(
                "default config created at {}; edit it (device name, ports, shares) and rerun",
                config_file.display()
            );
        }
        let content = fs::read_to_string(&config_file)?;
        let cfg: NodeConfig = toml::from_str(&content)?;
        Ok(cfg)
    }

    /// Round-trip the share registry back into `config.toml` so a share
    /// added/removed/toggled at runtime survives a process restart
    /// (spec §6). Call after every `ShareRegistry` mutation exposed to
    /// the CLI.
    pub fn save(&self) -> anyhow::Result<()> {
        let config_file = Self::config_path()?;
        let rendered = toml::to_string_pretty(self)?;
        fs::write(config_file, rendered)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let cfg = NodeConfig::default();
        let rendered = toml::to_string_pretty(&cfg).unwrap();
        let parsed: NodeConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.device_id, cfg.device_id);
        assert_eq!(parsed.tcp_port, cfg.tcp_port);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let parsed: NodeConfig = toml::from_str("device_name = \"box\"\n").unwrap();
        assert_eq!(parsed.device_name, "box");
        assert_eq!(parsed.tcp_port, default_tcp_port());
        assert!(parsed.open_mode);
        assert!(parsed.shares.is_empty());
    }

    #[test]
    fn auth_modes_lists_both_supported_modes() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.auth_modes(), vec!["open", "psk-hmac-sha256"]);
    }
}
