//! Chunked transfer engine integration tests: full transfer, resume from
//! a nonzero offset, and malformed-chunk rejection, all driven over
//! `tokio::io::duplex` in-memory pipes.

use netshare::error::ErrorCode;
use netshare::framing::{write_frame, Frame};
use netshare::transfer::{hash_range, hash_whole_file, receive_chunks, send_chunks, FileChunkHeader};
use tokio::fs::File;
use tokio::io::duplex;

async fn open_rw(path: &std::path::Path) -> File {
    tokio::fs::OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
        .await
        .unwrap()
}

#[tokio::test]
async fn full_transfer_round_trips_and_hashes_match() {
    let dir = tempfile::tempdir().unwrap();
    let src_path = dir.path().join("src.bin");
    let data: Vec<u8> = (0..500_000u32).map(|i| (i % 251) as u8).collect();
    tokio::fs::write(&src_path, &data).await.unwrap();

    let dst_path = dir.path().join("dst.bin");
    tokio::fs::write(&dst_path, b"").await.unwrap();

    let mut src = open_rw(&src_path).await;
    let mut dst = open_rw(&dst_path).await;

    let (mut client_end, mut server_end) = duplex(64 * 1024);

    let total = data.len() as u64;
    let send = tokio::spawn(async move { send_chunks(&mut server_end, &mut src, "t1", 0, total).await });
    let recv_hash = receive_chunks(&mut client_end, &mut dst, "t1", 0, total).await.unwrap();
    let send_hash = send.await.unwrap().unwrap();

    assert_eq!(send_hash, recv_hash);
    let on_disk = tokio::fs::read(&dst_path).await.unwrap();
    assert_eq!(on_disk, data);
}

#[tokio::test]
async fn resume_from_nonzero_offset_matches_full_hash() {
    let dir = tempfile::tempdir().unwrap();
    let data = b"hello world".to_vec();
    let src_path = dir.path().join("src.bin");
    tokio::fs::write(&src_path, &data).await.unwrap();

    let dst_path = dir.path().join("dst.bin");
    tokio::fs::write(&dst_path, b"hello ").await.unwrap();

    let mut src = open_rw(&src_path).await;
    let mut dst = open_rw(&dst_path).await;

    let (mut client_end, mut server_end) = duplex(4096);
    let total = data.len() as u64;
    let send = tokio::spawn(async move { send_chunks(&mut server_end, &mut src, "t2", 6, total).await });
    let recv_hash = receive_chunks(&mut client_end, &mut dst, "t2", 6, total).await.unwrap();
    let send_hash = send.await.unwrap().unwrap();

    assert_eq!(send_hash, recv_hash);
    let on_disk = tokio::fs::read(&dst_path).await.unwrap();
    assert_eq!(on_disk, data);

    let mut whole = open_rw(&dst_path).await;
    let (_, full_hash) = hash_whole_file(&mut whole).await.unwrap();
    assert_eq!(full_hash, send_hash);
}

#[tokio::test]
async fn overshoot_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let dst_path = dir.path().join("dst.bin");
    tokio::fs::write(&dst_path, b"").await.unwrap();
    let mut dst = open_rw(&dst_path).await;

    let (mut client_end, mut server_end) = duplex(4096);
    let bad_header = FileChunkHeader::new("t3", 0, 20);
    let task = tokio::spawn(async move {
        write_frame(&mut server_end, &Frame::json(serde_json::to_vec(&bad_header).unwrap()))
            .await
            .unwrap();
        write_frame(&mut server_end, &Frame::binary(vec![0u8; 20])).await.unwrap();
    });

    let err = receive_chunks(&mut client_end, &mut dst, "t3", 0, 10).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadRequest);
    task.await.unwrap();
}

#[tokio::test]
async fn wrong_transfer_id_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let dst_path = dir.path().join("dst.bin");
    tokio::fs::write(&dst_path, b"").await.unwrap();
    let mut dst = open_rw(&dst_path).await;

    let (mut client_end, mut server_end) = duplex(4096);
    let header = FileChunkHeader::new("other-id", 0, 3);
    let task = tokio::spawn(async move {
        write_frame(&mut server_end, &Frame::json(serde_json::to_vec(&header).unwrap()))
            .await
            .unwrap();
        write_frame(&mut server_end, &Frame::binary(b"abc".to_vec())).await.unwrap();
    });

    let err = receive_chunks(&mut client_end, &mut dst, "expected-id", 0, 3).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadRequest);
    task.await.unwrap();
}

#[tokio::test]
async fn hash_range_matches_whole_file_hash_over_the_full_span() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ranged.bin");
    let data: Vec<u8> = (0..10_000u32).map(|i| (i % 199) as u8).collect();
    tokio::fs::write(&path, &data).await.unwrap();

    let mut file = open_rw(&path).await;
    let (_, whole_hash) = hash_whole_file(&mut file).await.unwrap();
    let ranged_hash = hash_range(&mut file, 0, data.len() as u64).await.unwrap();
    assert_eq!(whole_hash, ranged_hash);

    let mid_hash = hash_range(&mut file, 100, 50).await.unwrap();
    let expected = {
        use sha2::{Digest, Sha256};
        hex::encode(Sha256::digest(&data[100..150]))
    };
    assert_eq!(mid_hash, expected);
}
