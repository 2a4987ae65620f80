//! Two-node integration tests: `session::client` driven directly against
//! `session::server::handle_connection` over a `tokio::io::duplex` pipe,
//! standing in for a real TCP connection.

use netshare::error::ErrorCode;
use netshare::events::EventBus;
use netshare::framing::{read_frame, write_frame, Frame};
use netshare::protocol::{DownloadAck, FileMeta, HelloAck};
use netshare::session::client::{download, handshake, ping, upload};
use netshare::session::server;
use netshare::session::ServerPolicy;
use netshare::share_registry::ShareRegistry;
use netshare::transfer::{self, FileEnd};
use tokio::io::duplex;

fn open_policy() -> ServerPolicy {
    ServerPolicy {
        server_id: "S".to_string(),
        open_mode: true,
        shared_key: None,
        auth_modes: vec!["open".to_string(), "psk-hmac-sha256".to_string()],
    }
}

#[tokio::test]
async fn open_mode_handshake_and_ping_round_trip() {
    let (mut client_end, mut server_end) = duplex(64 * 1024);
    let shares = ShareRegistry::new();
    let policy = open_policy();

    let (events, _rx) = EventBus::new();
    let server_task =
        tokio::spawn(async move { server::handle_connection(&mut server_end, &policy, &shares, &events).await });

    let hs = handshake(&mut client_end, "C", "cli", "open", None).await.unwrap();
    assert_eq!(hs.server_id, "S");
    assert!(!hs.auth_required);

    ping(&mut client_end).await.unwrap();
    drop(client_end);
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn psk_auth_failure_closes_session() {
    let (mut client_end, mut server_end) = duplex(64 * 1024);
    let shares = ShareRegistry::new();
    let policy = ServerPolicy {
        server_id: "S".to_string(),
        open_mode: false,
        shared_key: Some(b"secret".to_vec()),
        auth_modes: vec!["psk-hmac-sha256".to_string()],
    };

    let (events, _rx) = EventBus::new();
    let server_task =
        tokio::spawn(async move { server::handle_connection(&mut server_end, &policy, &shares, &events).await });

    let err = handshake(&mut client_end, "C", "cli", "psk-hmac-sha256", Some(b"wrong-key")).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::AuthFailed);
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn download_full_file_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let share_dir = dir.path().join("share");
    std::fs::create_dir(&share_dir).unwrap();
    std::fs::write(share_dir.join("hello.txt"), b"hello world").unwrap();

    let shares = ShareRegistry::new();
    let share_id = shares.add(&share_dir, false, None, None).unwrap();
    let policy = open_policy();

    let (mut client_end, mut server_end) = duplex(64 * 1024);
    let (events, _rx) = EventBus::new();
    let server_task =
        tokio::spawn(async move { server::handle_connection(&mut server_end, &policy, &shares, &events).await });

    handshake(&mut client_end, "C", "cli", "open", None).await.unwrap();

    let dest_path = dir.path().join("dest.txt");
    let mut dest = tokio::fs::OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&dest_path)
        .await
        .unwrap();

    let (client_events, _client_rx) = EventBus::new();
    download(&mut client_end, &client_events, &share_id, "hello.txt", &mut dest).await.unwrap();
    drop(client_end);

    let contents = tokio::fs::read(&dest_path).await.unwrap();
    assert_eq!(contents, b"hello world");
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn upload_to_read_only_share_is_rejected_without_creating_file() {
    let dir = tempfile::tempdir().unwrap();
    let share_dir = dir.path().join("share");
    std::fs::create_dir(&share_dir).unwrap();

    let shares = ShareRegistry::new();
    let share_id = shares.add(&share_dir, true, None, None).unwrap();
    let policy = open_policy();

    let (mut client_end, mut server_end) = duplex(64 * 1024);
    let (events, _rx) = EventBus::new();
    let server_task =
        tokio::spawn(async move { server::handle_connection(&mut server_end, &policy, &shares, &events).await });

    handshake(&mut client_end, "C", "cli", "open", None).await.unwrap();

    let src_path = dir.path().join("src.txt");
    std::fs::write(&src_path, b"payload").unwrap();
    let mut src = tokio::fs::OpenOptions::new().read(true).open(&src_path).await.unwrap();

    let (client_events, _client_rx) = EventBus::new();
    let err = upload(&mut client_end, &client_events, &share_id, "new.txt", &mut src).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ReadOnly);
    assert!(!share_dir.join("new.txt").exists());

    drop(client_end);
    server_task.await.unwrap().unwrap();
}

/// A flipped byte in the transferred bytes must surface as
/// `IntegrityFailed` only once the whole stream plus the terminal
/// `FILE_END` frame have been read, never mid-stream: chunk headers
/// carry no per-chunk checksum, so there is nothing to fail on earlier.
#[tokio::test]
async fn corrupted_chunk_is_caught_at_file_end_not_mid_stream() {
    let dir = tempfile::tempdir().unwrap();
    let original: Vec<u8> = (0..5000u32).map(|i| (i % 253) as u8).collect();
    let original_path = dir.path().join("original.bin");
    tokio::fs::write(&original_path, &original).await.unwrap();
    let mut original_file = tokio::fs::OpenOptions::new().read(true).open(&original_path).await.unwrap();
    let (size, true_hash) = transfer::hash_whole_file(&mut original_file).await.unwrap();

    let mut corrupted = original.clone();
    corrupted[1234] ^= 0xFF;
    let corrupted_path = dir.path().join("corrupted.bin");
    tokio::fs::write(&corrupted_path, &corrupted).await.unwrap();
    let mut corrupted_file = tokio::fs::OpenOptions::new().read(true).open(&corrupted_path).await.unwrap();

    let (mut client_end, mut server_end) = duplex(64 * 1024);

    let fake_server = tokio::spawn(async move {
        // HELLO
        let hello_frame = read_frame(&mut server_end).await.unwrap().unwrap();
        let hello: serde_json::Value = serde_json::from_slice(&hello_frame.payload).unwrap();
        let hello_ack = HelloAck {
            msg_type: "HELLO_ACK".into(),
            req_id: hello["reqId"].as_str().unwrap().to_string(),
            ok: true,
            server_id: Some("S".into()),
            nonce: Some(netshare::auth::encode_nonce(&netshare::auth::generate_nonce())),
            auth: Some(vec!["open".into()]),
            auth_required: Some(false),
            selected_auth: Some("open".into()),
            error: None,
        };
        write_frame(&mut server_end, &Frame::json(serde_json::to_vec(&hello_ack).unwrap())).await.unwrap();

        // DOWNLOAD_REQ
        let req_frame = read_frame(&mut server_end).await.unwrap().unwrap();
        let req: serde_json::Value = serde_json::from_slice(&req_frame.payload).unwrap();
        let transfer_id = req["transferId"].as_str().unwrap().to_string();

        let ack = DownloadAck {
            msg_type: "DOWNLOAD_ACK".into(),
            req_id: req["reqId"].as_str().unwrap().to_string(),
            ok: true,
            file: Some(FileMeta { size, sha256: true_hash.clone() }),
            offset: Some(0),
            error: None,
        };
        write_frame(&mut server_end, &Frame::json(serde_json::to_vec(&ack).unwrap())).await.unwrap();

        // Stream the corrupted bytes, then dishonestly claim the true hash
        // in FILE_END — this is the only way a receiver could observe a
        // flipped bit: both ends already compared against the honest
        // pre-transfer digest, so the dishonesty has to live in the
        // stream itself.
        transfer::send_chunks(&mut server_end, &mut corrupted_file, &transfer_id, 0, size).await.unwrap();
        write_frame(&mut server_end, &Frame::json(serde_json::to_vec(&FileEnd::success(&transfer_id, size, true_hash)).unwrap()))
            .await
            .unwrap();
    });

    handshake(&mut client_end, "C", "cli", "open", None).await.unwrap();

    let dest_path = dir.path().join("dest.bin");
    let mut dest = tokio::fs::OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&dest_path)
        .await
        .unwrap();

    let (client_events, _client_rx) = EventBus::new();
    let err = download(&mut client_end, &client_events, "share-id", "original.bin", &mut dest)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::IntegrityFailed);

    // The full (corrupted) stream must have been written to disk before
    // the error surfaces: the mismatch is only detectable after
    // FILE_END, not while chunks were still arriving.
    let on_disk = tokio::fs::read(&dest_path).await.unwrap();
    assert_eq!(on_disk, corrupted);

    fake_server.await.unwrap();
}
