//! The merge server — accepts worker connections, ingests their
//! distinguished points, and broadcasts the solution when two walks meet.
//!
//! Per connection: handshake (parameter check), then a read loop feeding
//! the collision table record by record. Cancellation mid-batch loses
//! only the unread tail — those points are rediscoverable, so nothing is
//! ever rolled back. A writer task per connection forwards status
//! broadcasts so a slow reader never blocks merge work.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use zerocopy::{AsBytes, FromBytes};

use wallaby_core::config::ServerConfig;
use wallaby_core::dp::ClientId;
use wallaby_core::group::{Group, ScalarBytes};
use wallaby_core::solve::{solve, SolveError};
use wallaby_core::wire::{
    encode_frame, FrameHeader, FrameKind, Hello, HelloAck, Status, WireError, WireRecord,
    FRAME_HEADER_SIZE, STATUS_SEARCHING, STATUS_SOLVED, WIRE_RECORD_SIZE,
};
use wallaby_core::SearchContext;

use crate::session::SessionTable;
use crate::table::{CollisionTable, Ingest};

/// Global lifecycle. `Solved` keeps connections open so every worker
/// hears the broadcast; `Draining` closes up shop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Searching,
    Solved,
    Draining,
}

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const STATS_PERIOD: Duration = Duration::from_secs(10);

pub struct MergeServer<G: Group> {
    ctx: SearchContext<G>,
    cfg: ServerConfig,
    digest: [u8; 32],
    table: Arc<CollisionTable>,
    sessions: Arc<SessionTable>,
    phase_tx: watch::Sender<Phase>,
    status_tx: broadcast::Sender<Status>,
    solution: Mutex<Option<ScalarBytes>>,
}

impl<G: Group> MergeServer<G> {
    pub fn new(ctx: SearchContext<G>, cfg: ServerConfig) -> Arc<Self> {
        let digest = ctx.digest();
        let table = Arc::new(CollisionTable::new(cfg.shard_count));
        let (phase_tx, _) = watch::channel(Phase::Searching);
        let (status_tx, _) = broadcast::channel(16);
        Arc::new(MergeServer {
            ctx,
            cfg,
            digest,
            table,
            sessions: Arc::new(SessionTable::new()),
            phase_tx,
            status_tx,
            solution: Mutex::new(None),
        })
    }

    pub fn table(&self) -> &CollisionTable {
        &self.table
    }

    /// The digest every accepted worker matched at handshake.
    pub fn search_digest(&self) -> [u8; 32] {
        self.digest
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn phase(&self) -> watch::Receiver<Phase> {
        self.phase_tx.subscribe()
    }

    pub fn solution(&self) -> Option<ScalarBytes> {
        *self.solution.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Bind the configured address and serve until drained.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(&self.cfg.listen)
            .await
            .with_context(|| format!("failed to bind {}", self.cfg.listen))?;
        self.run_on(listener).await
    }

    /// Serve on an already-bound listener (tests bind port 0 themselves).
    pub async fn run_on(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        tracing::info!(
            addr = %listener.local_addr()?,
            shards = self.table.shard_count(),
            dp_bits = self.ctx.dp_bits,
            "merge server listening"
        );

        let reaper = tokio::spawn(crate::session::reaper_loop(
            self.sessions.clone(),
            Duration::from_secs(self.cfg.client_timeout_secs.max(1)),
            Duration::from_secs(self.cfg.reap_interval_secs.max(1)),
        ));
        let heartbeat = tokio::spawn(self.clone().heartbeat_loop());
        let stats = tokio::spawn(self.clone().stats_loop());

        let mut phase_rx = self.phase_tx.subscribe();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let server = self.clone();
                        tokio::spawn(async move {
                            if let Err(err) = server.handle_connection(stream, addr).await {
                                tracing::debug!(peer = %addr, error = %err, "connection ended");
                            }
                        });
                    }
                    Err(err) => tracing::warn!(error = %err, "accept failed"),
                },
                _ = phase_rx.changed() => {
                    if *phase_rx.borrow() == Phase::Draining {
                        break;
                    }
                }
            }
        }

        tracing::info!("draining — no further connections accepted");
        reaper.abort();
        heartbeat.abort();
        stats.abort();
        Ok(())
    }

    // ── Per-connection ───────────────────────────────────────────────────────

    async fn handle_connection(
        self: Arc<Self>,
        mut stream: TcpStream,
        addr: std::net::SocketAddr,
    ) -> Result<()> {
        let hello = match tokio::time::timeout(HANDSHAKE_TIMEOUT, read_frame(&mut stream)).await {
            Ok(Ok((FrameKind::Hello, payload))) => {
                Hello::read_from(payload.as_slice()).ok_or(WireError::Truncated)?
            }
            Ok(Ok((kind, _))) => {
                tracing::warn!(peer = %addr, ?kind, "expected Hello, closing");
                return Ok(());
            }
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                tracing::warn!(peer = %addr, "handshake timed out");
                return Ok(());
            }
        };

        if hello.search_digest != self.digest || hello.dp_bits != self.ctx.dp_bits {
            // Parameter mismatch is fatal for this connection: merging
            // records from a different search silently corrupts distances.
            tracing::warn!(peer = %addr, "rejecting worker with mismatched search parameters");
            let nack = HelloAck {
                accepted: 0,
                reserved: [0; 3],
                max_batch: 0,
            };
            let _ = stream
                .write_all(&encode_frame(FrameKind::HelloAck, nack.as_bytes())?)
                .await;
            return Ok(());
        }

        let proposed = hello.max_batch;
        let max_batch = proposed.max(1).min(self.cfg.max_batch.max(1));
        let ack = HelloAck {
            accepted: 1,
            reserved: [0; 3],
            max_batch,
        };
        stream
            .write_all(&encode_frame(FrameKind::HelloAck, ack.as_bytes())?)
            .await?;

        let (id, handle) = self.sessions.register(addr, max_batch);
        tracing::info!(client = %id, peer = %addr, max_batch, "worker session established");

        let (mut rd, wr) = stream.into_split();
        let writer = tokio::spawn(write_loop(
            wr,
            self.status_tx.subscribe(),
            self.current_status(),
        ));

        let mut phase_rx = self.phase_tx.subscribe();
        loop {
            tokio::select! {
                frame = read_frame(&mut rd) => match frame {
                    Ok((FrameKind::DpBatch, payload)) => {
                        self.sessions.touch(id);
                        if let Err(err) = self.apply_batch(id, &payload, max_batch) {
                            // one client's garbage never takes the server
                            // down — just that client
                            tracing::warn!(client = %id, error = %err, "malformed batch, closing session");
                            break;
                        }
                    }
                    Ok((FrameKind::Keepalive, _)) => self.sessions.touch(id),
                    Ok((kind, _)) => {
                        tracing::warn!(client = %id, ?kind, "unexpected frame, closing session");
                        break;
                    }
                    Err(err) => {
                        tracing::debug!(client = %id, error = %err, "worker disconnected");
                        break;
                    }
                },
                _ = handle.closer.notified() => {
                    tracing::info!(client = %id, "closing idle session");
                    break;
                }
                _ = phase_rx.changed() => {
                    if *phase_rx.borrow() == Phase::Draining {
                        break;
                    }
                }
            }
        }

        writer.abort();
        self.sessions.remove(id);
        Ok(())
    }

    /// Merge a batch record by record. Any structural defect rejects the
    /// whole batch and closes the session; records already merged stay —
    /// they were valid, and re-walking would only rediscover them.
    fn apply_batch(&self, origin: ClientId, payload: &[u8], max_batch: u32) -> Result<(), WireError> {
        if payload.len() % WIRE_RECORD_SIZE != 0 {
            return Err(WireError::RaggedBatch(payload.len()));
        }
        let count = payload.len() / WIRE_RECORD_SIZE;
        if count > max_batch as usize {
            return Err(WireError::BatchTooLarge {
                got: count,
                limit: max_batch,
            });
        }

        for chunk in payload.chunks_exact(WIRE_RECORD_SIZE) {
            let wire = WireRecord::read_from(chunk).ok_or(WireError::Truncated)?;
            let record = wire.to_record(origin)?;
            if self.ctx.group.decode_point(&record.point).is_none() {
                return Err(WireError::BadPoint);
            }
            if let Ingest::Collision { existing, incoming } = self.table.ingest(record) {
                self.resolve(&existing, &incoming);
            }
        }
        Ok(())
    }

    /// A tame/wild pair met. Solve, verify, and either end the search or
    /// write the pair off as a false positive and keep going.
    fn resolve(&self, existing: &wallaby_core::DpRecord, incoming: &wallaby_core::DpRecord) {
        if self.solution().is_some() {
            return;
        }
        match solve(&self.ctx, existing, incoming) {
            Ok(k) => {
                let scalar = self.ctx.group.encode_scalar(&k);
                *self.solution.lock().unwrap_or_else(|p| p.into_inner()) = Some(scalar);
                self.table.mark_solved();

                tracing::info!(
                    scalar = %hex::encode(scalar),
                    point = %hex::encode(existing.point),
                    "collision verified — search solved"
                );
                let _ = self.phase_tx.send(Phase::Solved);
                let _ = self.status_tx.send(Status {
                    state: STATUS_SOLVED,
                    scalar,
                });

                let phase_tx = self.phase_tx.clone();
                let grace = Duration::from_secs(self.cfg.drain_grace_secs);
                tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    let _ = phase_tx.send(Phase::Draining);
                });
            }
            Err(SolveError::VerificationFailed) => {
                tracing::warn!(
                    point = %hex::encode(existing.point),
                    tame_origin = %existing.origin,
                    wild_origin = %incoming.origin,
                    "false-positive collision, search continues"
                );
            }
            Err(err) => {
                tracing::warn!(error = %err, "collision pair did not solve");
            }
        }
    }

    // ── Background loops ─────────────────────────────────────────────────────

    fn current_status(&self) -> Status {
        match self.solution() {
            Some(scalar) => Status {
                state: STATUS_SOLVED,
                scalar,
            },
            None => Status {
                state: STATUS_SEARCHING,
                scalar: [0; 32],
            },
        }
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.cfg.heartbeat_secs.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if *self.phase_tx.borrow() != Phase::Searching {
                return;
            }
            let _ = self.status_tx.send(Status {
                state: STATUS_SEARCHING,
                scalar: [0; 32],
            });
        }
    }

    async fn stats_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(STATS_PERIOD);
        loop {
            interval.tick().await;
            let stats = self.table.stats();
            tracing::info!(
                points = self.table.len(),
                sessions = self.sessions.len(),
                received = stats.received,
                duplicates = stats.duplicates,
                collisions = stats.collisions,
                "merge status"
            );
        }
    }
}

// ── Frame plumbing ───────────────────────────────────────────────────────────

async fn read_frame<R: AsyncRead + Unpin>(rd: &mut R) -> Result<(FrameKind, Vec<u8>)> {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    rd.read_exact(&mut header).await?;
    let (kind, length) = FrameHeader::parse(&header)?;
    let mut payload = vec![0u8; length];
    if length > 0 {
        rd.read_exact(&mut payload).await?;
    }
    Ok((kind, payload))
}

/// Owns the write half: forwards status broadcasts without ever letting
/// a slow peer block the read/merge path.
async fn write_loop(mut wr: OwnedWriteHalf, mut status_rx: broadcast::Receiver<Status>, initial: Status) {
    let send = |status: Status| encode_frame(FrameKind::Status, status.as_bytes());
    match send(initial) {
        Ok(frame) => {
            if wr.write_all(&frame).await.is_err() {
                return;
            }
        }
        Err(_) => return,
    }
    loop {
        match status_rx.recv().await {
            Ok(status) => match send(status) {
                Ok(frame) => {
                    if wr.write_all(&frame).await.is_err() {
                        return;
                    }
                }
                Err(_) => return,
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "status broadcasts lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
