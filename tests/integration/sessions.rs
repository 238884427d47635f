//! Session lifecycle over a real socket: idle reaping and what a late
//! joiner learns.

use std::time::Duration;

use tokio::io::AsyncReadExt;

use crate::*;
use wallaby_core::wire::{Status, STATUS_SOLVED};

#[tokio::test]
async fn an_idle_session_is_reaped_without_disturbing_the_table() {
    let ctx = toy_ctx();
    let (server, addr) = start_server(ctx.clone(), quick_server_cfg(1)).await;

    let mut idler = handshake(addr, &ctx).await;
    assert_eq!(server.sessions().len(), 1);

    // silence for longer than the 1 s timeout → the reaper closes us
    let mut probe = [0u8; 64];
    let read = tokio::time::timeout(Duration::from_secs(5), idler.read(&mut probe)).await;
    assert_eq!(read.expect("reaper never closed the session").unwrap(), 0);

    // session gone, server otherwise unbothered
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.sessions().len(), 0);
    assert!(server.solution().is_none());
}

#[tokio::test]
async fn keepalives_hold_an_otherwise_quiet_session_open() {
    let ctx = toy_ctx();
    let (server, addr) = start_server(ctx.clone(), quick_server_cfg(2)).await;

    let mut stream = handshake(addr, &ctx).await;
    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(700)).await;
        stream
            .write_all(&encode_frame(FrameKind::Keepalive, &[]).unwrap())
            .await
            .unwrap();
    }
    // 3.5 s of wall time against a 2 s timeout: alive only thanks to the
    // keepalives
    assert_eq!(server.sessions().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_late_joiner_is_told_the_search_is_already_solved() {
    let ctx = toy_ctx();
    // long drain grace: the server must still be accepting when the late
    // joiner shows up
    let cfg = ServerConfig {
        drain_grace_secs: 3_600,
        ..quick_server_cfg(3_600)
    };
    let (server, addr) = start_server(ctx.clone(), cfg).await;

    let tame = spawn_worker(&ctx, addr, TAME_HERD, 2);
    let wild = spawn_worker(&ctx, addr, WILD_HERD, 3);
    tokio::time::timeout(Duration::from_secs(10), tame.finish())
        .await
        .unwrap()
        .unwrap();
    tokio::time::timeout(Duration::from_secs(10), wild.finish())
        .await
        .unwrap()
        .unwrap();
    assert!(server.solution().is_some());

    // fresh connection: handshake still accepted, and the very first
    // status frame carries the solution
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let hello = Hello {
        search_digest: ctx.digest(),
        dp_bits: ctx.dp_bits,
        reserved: [0; 3],
        max_batch: 64,
    };
    stream
        .write_all(&encode_frame(FrameKind::Hello, hello.as_bytes()).unwrap())
        .await
        .unwrap();
    let (kind, payload) = read_frame(&mut stream).await.unwrap();
    assert_eq!(kind, FrameKind::HelloAck);
    assert_eq!(HelloAck::read_from(payload.as_slice()).unwrap().accepted, 1);

    let (kind, payload) = read_frame(&mut stream).await.unwrap();
    assert_eq!(kind, FrameKind::Status);
    let status = Status::read_from(payload.as_slice()).unwrap();
    assert_eq!(status.state, STATUS_SOLVED);
    assert_eq!(ctx.group.decode_scalar(&status.scalar), Some(7));
}
