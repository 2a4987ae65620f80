//! NetShare CLI binary (SPEC_FULL.md §10.4).
//!
//! Argument parsing follows the teacher's manual `std::env::args` style
//! (`CLI/src/main.rs`'s `--insecure` flag check) rather than pulling in
//! `clap`: a handful of positional subcommands don't need a parser
//! crate. Logging setup is grounded on `src-tauri/src/log.rs`'s
//! `simplelog::TermLogger`, trimmed of the frontend/file-log-writer
//! pieces (external collaborators, spec §1).

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use simplelog::{ColorChoice, ConfigBuilder, LevelFilter, TermLogger, TerminalMode};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use netshare::config::NodeConfig;
use netshare::discovery::{self, DiscoveryConfig};
use netshare::events::{EventBus, RuntimeEvent};
use netshare::peer_directory::PeerDirectory;
use netshare::session::{client, server, ServerPolicy};
use netshare::share_registry::ShareRegistry;

fn setup_logger() {
    let config = ConfigBuilder::new().build();
    let _ = TermLogger::init(LevelFilter::Info, config, TerminalMode::Mixed, ColorChoice::Auto);
}

/// Build an `EventBus` and spawn a task that drains it onto `log`, so
/// every command has a live subscriber rather than a constructed-and-
/// dropped receiver (spec §6, §10.2).
fn spawn_event_logger() -> EventBus {
    let (events, mut rx) = EventBus::new();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                RuntimeEvent::Log { level, message } => log::log!(level, "{message}"),
                RuntimeEvent::Error(message) => log::error!("{message}"),
                RuntimeEvent::PeersChanged(peers) => log::debug!("peers changed: {} known", peers.len()),
                RuntimeEvent::SharesChanged(shares) => log::debug!("shares changed: {} shares", shares.len()),
                RuntimeEvent::Transfer(progress) => log::debug!(
                    "transfer {} {:?} {}/{} {:?}",
                    progress.transfer_id,
                    progress.direction,
                    progress.done,
                    progress.total,
                    progress.state
                ),
            }
        }
    });
    events
}

fn usage() -> ! {
    eprintln!(
        "usage: netshare <command> [args]\n\
         commands:\n\
         \x20 serve\n\
         \x20 peers\n\
         \x20 shares\n\
         \x20 shares add <path> [ro|rw]\n\
         \x20 shares remove <shareId>\n\
         \x20 shares toggle <shareId>\n\
         \x20 ping <host:port>\n\
         \x20 ls <host:port> <shareId> <path>\n\
         \x20 stat <host:port> <shareId> <path>\n\
         \x20 get <host:port> <shareId> <remotePath> <localFile>\n\
         \x20 put <host:port> <shareId> <remotePath> <localFile>"
    );
    std::process::exit(2);
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logger();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or_else(|| usage());

    match command {
        "serve" => run_serve().await,
        "peers" => run_peers().await,
        "shares" => run_shares(&args[2..]),
        "ping" => run_ping(&args[2..]).await,
        "ls" => run_list_dir(&args[2..]).await,
        "stat" => run_stat(&args[2..]).await,
        "get" => run_download(&args[2..]).await,
        "put" => run_upload(&args[2..]).await,
        _ => usage(),
    }
}

fn load_config() -> Result<NodeConfig> {
    NodeConfig::load().context("loading config.toml")
}

async fn run_serve() -> Result<()> {
    let config = load_config()?;
    let shares = ShareRegistry::from_shares(
        config
            .shares
            .iter()
            .map(|s| netshare::share_registry::Share {
                share_id: s.share_id.clone(),
                name: s.name.clone(),
                local_path: s.local_path.clone(),
                read_only: s.read_only,
            })
            .collect(),
    );
    let peers = PeerDirectory::new();

    let discovery_config = DiscoveryConfig {
        bind_addr: "0.0.0.0".parse().unwrap(),
        port: config.discovery_port,
        broadcast_addr: "255.255.255.255".parse().unwrap(),
        device_id: config.device_id.clone(),
        device_name: config.device_name.clone(),
        tcp_port: config.tcp_port,
        auth_modes: config.auth_modes(),
        respond_to_queries: true,
        query_on_startup: true,
    };
    let events = spawn_event_logger();
    let discovery_handle = discovery::start(discovery_config, peers, events.clone())
        .await
        .context("starting discovery")?;

    let listen_addr = SocketAddr::new("0.0.0.0".parse::<IpAddr>().unwrap(), config.tcp_port);
    let listener = TcpListener::bind(listen_addr).await.context("binding TCP listener")?;
    log::info!("netshare listening on {listen_addr} (device {})", config.device_id);

    let policy = ServerPolicy {
        server_id: config.device_id.clone(),
        open_mode: config.open_mode,
        shared_key: config.shared_key.as_ref().map(|k| k.as_bytes().to_vec()),
        auth_modes: config.auth_modes(),
    };

    let cancel = CancellationToken::new();
    let accept_cancel = cancel.clone();
    let accept_task = tokio::spawn(server::run_accept_loop(listener, policy, shares, accept_cancel, events));

    tokio::signal::ctrl_c().await.ok();
    log::info!("shutting down");
    cancel.cancel();
    discovery_handle.shutdown().await;
    let _ = accept_task.await;
    Ok(())
}

async fn run_peers() -> Result<()> {
    let config = load_config()?;
    let peers = PeerDirectory::new();
    let discovery_config = DiscoveryConfig {
        bind_addr: "0.0.0.0".parse().unwrap(),
        port: config.discovery_port,
        broadcast_addr: "255.255.255.255".parse().unwrap(),
        device_id: config.device_id.clone(),
        device_name: config.device_name.clone(),
        tcp_port: config.tcp_port,
        auth_modes: config.auth_modes(),
        respond_to_queries: false,
        query_on_startup: true,
    };
    let events = spawn_event_logger();
    let handle = discovery::start(discovery_config, peers.clone(), events)
        .await
        .context("starting discovery")?;
    tokio::time::sleep(Duration::from_secs(5)).await;
    handle.shutdown().await;

    let now = netshare::peer_directory::now_ms();
    for peer in peers.snapshot() {
        println!(
            "{}\t{}\t{}:{}\t{}",
            peer.device_id,
            peer.device_name,
            peer.address,
            peer.tcp_port,
            if peer.is_online_at(now) { "online" } else { "offline" }
        );
    }
    Ok(())
}

fn run_shares(args: &[String]) -> Result<()> {
    match args.first().map(String::as_str) {
        None => {
            let config = load_config()?;
            for share in &config.shares {
                println!(
                    "{}\t{}\t{}\t{}",
                    share.share_id,
                    share.name,
                    share.local_path.display(),
                    if share.read_only { "ro" } else { "rw" }
                );
            }
            Ok(())
        }
        Some("add") => {
            let [path] = require_args(&args[1..], &["path"])?;
            let read_only = matches!(args.get(2).map(String::as_str), Some("ro"));
            let mut config = load_config()?;
            let registry = ShareRegistry::from_shares(
                config.shares.iter().map(|s| netshare::share_registry::Share {
                    share_id: s.share_id.clone(),
                    name: s.name.clone(),
                    local_path: s.local_path.clone(),
                    read_only: s.read_only,
                }).collect(),
            );
            let share_id = registry.add(std::path::Path::new(path), read_only, None, None)?;
            config.shares = registry.list().iter().map(netshare::config::PersistedShare::from).collect();
            config.save().context("saving config.toml")?;
            println!("{share_id}");
            Ok(())
        }
        Some("remove") => {
            let [share_id] = require_args(&args[1..], &["shareId"])?;
            let mut config = load_config()?;
            let registry = ShareRegistry::from_shares(
                config.shares.iter().map(|s| netshare::share_registry::Share {
                    share_id: s.share_id.clone(),
                    name: s.name.clone(),
                    local_path: s.local_path.clone(),
                    read_only: s.read_only,
                }).collect(),
            );
            if !registry.remove(share_id) {
                bail!("no such share: {share_id}");
            }
            config.shares = registry.list().iter().map(netshare::config::PersistedShare::from).collect();
            config.save().context("saving config.toml")?;
            Ok(())
        }
        Some("toggle") => {
            let [share_id] = require_args(&args[1..], &["shareId"])?;
            let mut config = load_config()?;
            let registry = ShareRegistry::from_shares(
                config.shares.iter().map(|s| netshare::share_registry::Share {
                    share_id: s.share_id.clone(),
                    name: s.name.clone(),
                    local_path: s.local_path.clone(),
                    read_only: s.read_only,
                }).collect(),
            );
            if !registry.toggle_read_only(share_id) {
                bail!("no such share: {share_id}");
            }
            config.shares = registry.list().iter().map(netshare::config::PersistedShare::from).collect();
            config.save().context("saving config.toml")?;
            Ok(())
        }
        Some(other) => bail!("unknown shares subcommand: {other}"),
    }
}

/// Dial `host_port` with retry: 250ms, 500ms, then a 1s ceiling between
/// attempts (SPEC_FULL.md §11), giving up after the fourth attempt.
async fn connect(host_port: &str) -> Result<TcpStream> {
    const BACKOFFS: [Duration; 3] = [Duration::from_millis(250), Duration::from_millis(500), Duration::from_secs(1)];
    let mut last_err = None;
    for (attempt, backoff) in std::iter::once(None).chain(BACKOFFS.into_iter().map(Some)).enumerate() {
        if let Some(delay) = backoff {
            tokio::time::sleep(delay).await;
        }
        match TcpStream::connect(host_port).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                log::warn!("connect attempt {} to {host_port} failed: {e}", attempt + 1);
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap()).with_context(|| format!("connecting to {host_port}"))
}

async fn client_handshake(stream: &mut TcpStream, config: &NodeConfig) -> Result<()> {
    let requested_auth = if config.shared_key.is_some() { "psk-hmac-sha256" } else { "open" };
    let key = config.shared_key.as_deref().map(str::as_bytes);
    client::handshake(stream, &config.device_id, &config.device_name, requested_auth, key)
        .await
        .context("handshake")?;
    Ok(())
}

async fn run_ping(args: &[String]) -> Result<()> {
    let [host] = require_args(args, &["host:port"])?;
    let config = load_config()?;
    let mut stream = connect(host).await?;
    client_handshake(&mut stream, &config).await?;
    client::ping(&mut stream).await.context("ping")?;
    println!("pong");
    Ok(())
}

async fn run_list_dir(args: &[String]) -> Result<()> {
    let [host, share_id, path] = require_args(args, &["host:port", "shareId", "path"])?;
    let config = load_config()?;
    let mut stream = connect(host).await?;
    client_handshake(&mut stream, &config).await?;
    let entries = client::list_dir(&mut stream, share_id, path).await.context("list_dir")?;
    for entry in entries {
        if entry.is_dir {
            println!("{}/", entry.name);
        } else {
            println!("{}\t{}", entry.name, entry.size.unwrap_or(0));
        }
    }
    Ok(())
}

async fn run_stat(args: &[String]) -> Result<()> {
    let [host, share_id, path] = require_args(args, &["host:port", "shareId", "path"])?;
    let config = load_config()?;
    let mut stream = connect(host).await?;
    client_handshake(&mut stream, &config).await?;
    let info = client::stat(&mut stream, share_id, path).await.context("stat")?;
    println!("size={} mtime={} sha256={}", info.size, info.mtime_utc, info.sha256);
    Ok(())
}

async fn run_download(args: &[String]) -> Result<()> {
    let [host, share_id, remote_path, local_path] =
        require_args(args, &["host:port", "shareId", "remotePath", "localFile"])?;
    let config = load_config()?;
    let mut stream = connect(host).await?;
    client_handshake(&mut stream, &config).await?;
    let mut dest = tokio::fs::OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(local_path)
        .await
        .with_context(|| format!("opening {local_path}"))?;
    let events = spawn_event_logger();
    client::download(&mut stream, &events, share_id, remote_path, &mut dest)
        .await
        .context("download")?;
    println!("downloaded {remote_path} -> {local_path}");
    Ok(())
}

async fn run_upload(args: &[String]) -> Result<()> {
    let [host, share_id, remote_path, local_path] =
        require_args(args, &["host:port", "shareId", "remotePath", "localFile"])?;
    let config = load_config()?;
    let mut stream = connect(host).await?;
    client_handshake(&mut stream, &config).await?;
    let mut src = tokio::fs::OpenOptions::new()
        .read(true)
        .open(local_path)
        .await
        .with_context(|| format!("opening {local_path}"))?;
    let events = spawn_event_logger();
    client::upload(&mut stream, &events, share_id, remote_path, &mut src).await.context("upload")?;
    println!("uploaded {local_path} -> {remote_path}");
    Ok(())
}

fn require_args<'a, const N: usize>(args: &'a [String], names: &[&str; N]) -> Result<[&'a str; N]> {
    if args.len() < N {
        bail!("missing arguments: expected {:?}, got {:?}", names, args);
    }
    Ok(std::array::from_fn(|i| args[i].as_str()))
}
