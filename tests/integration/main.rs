//! Wallaby integration test harness.
//!
//! Everything runs in-process over loopback TCP: a real merge server, real
//! walker threads, real merge clients — on the order-11 group, where every
//! point is distinguished and a tame/wild meeting is moments away.
//!
//! Each test binds its own ephemeral port and builds its own search
//! context, so tests are independent and need no privileges.

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use zerocopy::{AsBytes, FromBytes};

use wallaby_core::config::{BufferConfig, ClientConfig, ServerConfig};
use wallaby_core::dp::DpMask;
use wallaby_core::group::{Group, ScalarBytes};
use wallaby_core::jump::JumpSet;
use wallaby_core::modgroup::ModGroup;
use wallaby_core::search::{Herd, HerdPlan, SearchContext};
use wallaby_core::wire::{
    encode_frame, FrameHeader, FrameKind, Hello, HelloAck, Kind, FRAME_HEADER_SIZE,
};
use wallaby_engine::{seed_herd, spawn_walker, ClientError, CpuWalkEngine, DpBuffer, MergeClient};
use wallaby_merge::MergeServer;

mod failures;
mod sessions;
mod solve_flow;

// ── Search fixture ───────────────────────────────────────────────────────────

/// Herd id of the tame population in [`toy_ctx`].
pub const TAME_HERD: u16 = 0;
/// Herd id of the wild population in [`toy_ctx`].
pub const WILD_HERD: u16 = 1;

/// The bring-up search: order-11 group, k = 7, tame herd at offset 3,
/// wild distances measured straight from P. Every point is distinguished.
pub fn toy_ctx() -> SearchContext<ModGroup> {
    let group = ModGroup::new(11);
    let target = group.mul(&7);
    let plan = HerdPlan::from_herds(vec![
        Herd {
            id: TAME_HERD,
            kind: Kind::Tame,
            offset: 3,
        },
        Herd {
            id: WILD_HERD,
            kind: Kind::Wild,
            offset: 0,
        },
    ]);
    SearchContext::new(group, target, plan, 0)
}

pub fn quick_server_cfg(client_timeout_secs: u64) -> ServerConfig {
    ServerConfig {
        listen: "127.0.0.1:0".to_string(),
        shard_count: 16,
        client_timeout_secs,
        reap_interval_secs: 1,
        heartbeat_secs: 60,
        max_batch: 1_024,
        drain_grace_secs: 1,
    }
}

pub async fn start_server(
    ctx: SearchContext<ModGroup>,
    cfg: ServerConfig,
) -> (Arc<MergeServer<ModGroup>>, SocketAddr) {
    let server = MergeServer::new(ctx, cfg);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.clone().run_on(listener));
    (server, addr)
}

// ── Worker fixture ───────────────────────────────────────────────────────────

/// A full worker: one walker thread pinned to one herd, one merge client.
pub struct Worker {
    pub driver: tokio::task::JoinHandle<Result<Option<ScalarBytes>, ClientError>>,
    pub stop: Arc<AtomicBool>,
    walker: wallaby_engine::WalkerHandle,
}

impl Worker {
    /// Wait for the client to finish and the walker to wind down;
    /// returns the solution the worker heard, if any.
    pub async fn finish(self) -> Result<Option<ScalarBytes>, ClientError> {
        let outcome = self.driver.await.expect("worker task panicked");
        self.stop.store(true, std::sync::atomic::Ordering::Relaxed);
        tokio::task::spawn_blocking(move || self.walker.join())
            .await
            .expect("walker join panicked");
        outcome
    }
}

pub fn spawn_worker(
    ctx: &SearchContext<ModGroup>,
    addr: SocketAddr,
    herd: u16,
    seed: u64,
) -> Worker {
    let group = ctx.group;
    let jumps = JumpSet::derive(&group, seed, 3);
    let engine = CpuWalkEngine::new(group, jumps, DpMask::new(ctx.dp_bits));
    let roos = seed_herd(ctx, herd, 4, seed.wrapping_mul(31));

    let buffer = Arc::new(DpBuffer::new(4_096));
    let flush_hint = Arc::new(Notify::new());
    let stop = Arc::new(AtomicBool::new(false));
    let walker = spawn_walker(
        0,
        group,
        engine,
        roos,
        buffer.clone(),
        flush_hint.clone(),
        stop.clone(),
    );

    let client = MergeClient::new(
        ctx.clone(),
        ClientConfig {
            server: addr.to_string(),
            max_batch: 512,
            reconnect_backoff_ms: 10,
            reconnect_backoff_max_ms: 100,
            ..ClientConfig::default()
        },
        &BufferConfig {
            capacity: 4_096,
            flush_period_ms: 25,
        },
        vec![buffer],
        flush_hint,
        stop.clone(),
    );
    let driver = tokio::spawn(async move { client.run().await });

    Worker {
        driver,
        stop,
        walker,
    }
}

// ── Raw protocol helpers ─────────────────────────────────────────────────────

pub async fn read_frame(stream: &mut TcpStream) -> std::io::Result<(FrameKind, Vec<u8>)> {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    stream.read_exact(&mut header).await?;
    let (kind, length) = FrameHeader::parse(&header)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let mut payload = vec![0u8; length];
    if length > 0 {
        stream.read_exact(&mut payload).await?;
    }
    Ok((kind, payload))
}

/// Open a connection, complete the handshake, and consume the initial
/// status frame. Panics on rejection — use for known-good parameters.
pub async fn handshake(addr: SocketAddr, ctx: &SearchContext<ModGroup>) -> TcpStream {
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
    let ack = HelloAck::read_from(payload.as_slice()).unwrap();
    assert_eq!(ack.accepted, 1, "handshake unexpectedly rejected");
    let (kind, _) = read_frame(&mut stream).await.unwrap();
    assert_eq!(kind, FrameKind::Status);
    stream
}
