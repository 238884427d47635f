//! Merge client — ships buffered distinguished points to the server.
//!
//! One long-lived connection. Batches go up on a fixed flush period (or
//! early, when a lane overflows); status broadcasts come down. The walk
//! keeps running across reconnects — lane buffers hold DPs, bounded by
//! their capacity, so a transient outage costs nothing but latency.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use zerocopy::{AsBytes, FromBytes};

use wallaby_core::config::{BufferConfig, ClientConfig};
use wallaby_core::dp::DpRecord;
use wallaby_core::group::{Group, ScalarBytes};
use wallaby_core::wire::{
    encode_frame, FrameHeader, FrameKind, Hello, HelloAck, Status, WireError, WireRecord,
    FRAME_HEADER_SIZE, STATUS_SEARCHING, STATUS_SOLVED, WIRE_RECORD_SIZE,
};
use wallaby_core::SearchContext;

use crate::buffer::DpBuffer;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The server refused the handshake: this worker's search parameters
    /// do not match the server's. Fatal — retrying cannot help.
    #[error("server rejected handshake: search parameters do not match")]
    Rejected,

    #[error("connection lost: {0}")]
    ConnectionLost(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Wire(#[from] WireError),

    #[error("protocol violation: unexpected {0:?} frame")]
    UnexpectedFrame(FrameKind),
}

/// What the reader task observed on the downstream side.
enum Event {
    Searching,
    Solved(ScalarBytes),
    /// Remote closed the stream cleanly.
    Closed,
    Fatal(ClientError),
}

pub struct MergeClient<G: Group> {
    ctx: SearchContext<G>,
    cfg: ClientConfig,
    flush_period: Duration,
    buffers: Vec<Arc<DpBuffer>>,
    flush_hint: Arc<Notify>,
    stop: Arc<AtomicBool>,
}

impl<G: Group> MergeClient<G> {
    pub fn new(
        ctx: SearchContext<G>,
        cfg: ClientConfig,
        buffer_cfg: &BufferConfig,
        buffers: Vec<Arc<DpBuffer>>,
        flush_hint: Arc<Notify>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        MergeClient {
            ctx,
            cfg,
            flush_period: Duration::from_millis(buffer_cfg.flush_period_ms.max(1)),
            buffers,
            flush_hint,
            stop,
        }
    }

    /// The flag walker threads watch; flipped when a solution arrives.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Run until the server broadcasts a solution (`Ok(Some(scalar))`),
    /// the stop flag is flipped externally (`Ok(None)`), or the handshake
    /// is rejected. Connection loss is retried with capped exponential
    /// backoff; buffered DPs ride out the gap.
    pub async fn run(&self) -> Result<Option<ScalarBytes>, ClientError> {
        let mut backoff = Duration::from_millis(self.cfg.reconnect_backoff_ms.max(1));
        let backoff_max = Duration::from_millis(self.cfg.reconnect_backoff_max_ms.max(1));

        loop {
            if self.stop.load(Ordering::Relaxed) {
                return Ok(None);
            }
            match self.session().await {
                Ok(Some(scalar)) => {
                    self.stop.store(true, Ordering::Relaxed);
                    tracing::info!(scalar = %hex::encode(scalar), "solution received, stopping walk");
                    return Ok(Some(scalar));
                }
                Ok(None) => {
                    if self.stop.load(Ordering::Relaxed) {
                        return Ok(None);
                    }
                    // server went away after a good session — retry fresh
                    backoff = Duration::from_millis(self.cfg.reconnect_backoff_ms.max(1));
                    tracing::warn!("server closed the connection, reconnecting");
                }
                Err(ClientError::Rejected) => return Err(ClientError::Rejected),
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        backoff_ms = backoff.as_millis() as u64,
                        "session failed, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(backoff_max);
                }
            }
        }
    }

    /// One connection lifetime: handshake, then pump batches up and
    /// statuses down until something ends it.
    async fn session(&self) -> Result<Option<ScalarBytes>, ClientError> {
        let mut stream = TcpStream::connect(&self.cfg.server).await?;
        let max_batch = self.handshake(&mut stream).await?;
        tracing::info!(server = %self.cfg.server, max_batch, "merge session established");

        let (rd, mut wr) = stream.into_split();
        let (events_tx, mut events) = mpsc::channel::<Event>(8);
        let reader = tokio::spawn(read_loop(rd, events_tx));

        let mut flush_timer = tokio::time::interval(self.flush_period);
        flush_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let outcome = loop {
            tokio::select! {
                _ = flush_timer.tick() => {
                    if self.stop.load(Ordering::Relaxed) {
                        // best-effort goodbye flush; we are leaving either way
                        let _ = self.flush(&mut wr, max_batch).await;
                        break Ok(None);
                    }
                    if let Err(err) = self.flush(&mut wr, max_batch).await {
                        break Err(err);
                    }
                }
                _ = self.flush_hint.notified() => {
                    if let Err(err) = self.flush(&mut wr, max_batch).await {
                        break Err(err);
                    }
                }
                event = events.recv() => match event {
                    Some(Event::Searching) => {}
                    Some(Event::Solved(scalar)) => break Ok(Some(scalar)),
                    Some(Event::Closed) | None => break Ok(None),
                    Some(Event::Fatal(err)) => break Err(err),
                },
            }
        };
        reader.abort();
        outcome
    }

    async fn handshake(&self, stream: &mut TcpStream) -> Result<usize, ClientError> {
        let hello = Hello {
            search_digest: self.ctx.digest(),
            dp_bits: self.ctx.dp_bits,
            reserved: [0; 3],
            max_batch: self.cfg.max_batch,
        };
        stream
            .write_all(&encode_frame(FrameKind::Hello, hello.as_bytes())?)
            .await?;

        let (kind, payload) = read_frame(stream).await?;
        if kind != FrameKind::HelloAck {
            return Err(ClientError::UnexpectedFrame(kind));
        }
        let ack = HelloAck::read_from(payload.as_slice()).ok_or(WireError::Truncated)?;
        if ack.accepted != 1 {
            return Err(ClientError::Rejected);
        }
        Ok(ack.max_batch.max(1) as usize)
    }

    /// Drain every lane and send the lot, split at the negotiated batch
    /// size. An empty drain becomes a keepalive so the server's idle
    /// reaper knows this worker is alive, just unlucky. On a write error
    /// the unsent tail is re-queued — DPs are only ever lost to sustained
    /// overflow, never to a flaky socket.
    async fn flush(&self, wr: &mut OwnedWriteHalf, max_batch: usize) -> Result<(), ClientError> {
        let mut pending = Vec::new();
        for buffer in &self.buffers {
            pending.append(&mut buffer.drain());
        }

        if pending.is_empty() {
            wr.write_all(&encode_frame(FrameKind::Keepalive, &[])?).await?;
            return Ok(());
        }

        let mut sent = 0;
        while sent < pending.len() {
            let chunk = &pending[sent..(sent + max_batch).min(pending.len())];
            let mut payload = BytesMut::with_capacity(chunk.len() * WIRE_RECORD_SIZE);
            for record in chunk {
                payload.extend_from_slice(WireRecord::from_record(record).as_bytes());
            }
            let frame = encode_frame(FrameKind::DpBatch, &payload)?;
            if let Err(err) = wr.write_all(&frame).await {
                self.requeue(&pending[sent..]);
                return Err(err.into());
            }
            sent += chunk.len();
        }
        tracing::debug!(records = pending.len(), "flushed batch");
        Ok(())
    }

    fn requeue(&self, records: &[DpRecord]) {
        let buffer = &self.buffers[0];
        for record in records {
            if buffer.push(record.clone()).is_err() {
                // counted by the buffer; sustained overflow is the one
                // sanctioned way to lose a DP
                break;
            }
        }
    }
}

// ── Frame plumbing ───────────────────────────────────────────────────────────

async fn read_frame<R: AsyncRead + Unpin>(rd: &mut R) -> Result<(FrameKind, Vec<u8>), ClientError> {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    rd.read_exact(&mut header).await?;
    let (kind, length) = FrameHeader::parse(&header)?;
    let mut payload = vec![0u8; length];
    if length > 0 {
        rd.read_exact(&mut payload).await?;
    }
    Ok((kind, payload))
}

/// Owns the read half so frame reads are never torn by `select!`
/// cancellation in the main loop.
async fn read_loop(mut rd: OwnedReadHalf, events: mpsc::Sender<Event>) {
    loop {
        let event = match read_frame(&mut rd).await {
            Ok((FrameKind::Status, payload)) => match Status::read_from(payload.as_slice()) {
                Some(status) if status.state == STATUS_SOLVED => Event::Solved(status.scalar),
                Some(status) if status.state == STATUS_SEARCHING => Event::Searching,
                _ => Event::Fatal(ClientError::Wire(WireError::Truncated)),
            },
            Ok((kind, _)) => Event::Fatal(ClientError::UnexpectedFrame(kind)),
            Err(ClientError::ConnectionLost(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                Event::Closed
            }
            Err(err) => Event::Fatal(err),
        };
        let last = matches!(event, Event::Solved(_) | Event::Closed | Event::Fatal(_));
        if events.send(event).await.is_err() || last {
            return;
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    use wallaby_core::dp::ClientId;
    use wallaby_core::modgroup::ModGroup;
    use wallaby_core::search::HerdPlan;
    use wallaby_core::wire::Kind;

    fn toy_ctx() -> SearchContext<ModGroup> {
        let group = ModGroup::new(11);
        let target = group.mul(&7);
        SearchContext::new(group, target, HerdPlan::build(&group, &0, 3, 1, 1), 0)
    }

    fn toy_record(ctx: &SearchContext<ModGroup>, point: u64, distance: u64) -> DpRecord {
        DpRecord {
            point: ctx.group.encode_point(&point),
            distance: ctx.group.encode_scalar(&distance),
            kind: Kind::Tame,
            herd: 0,
            origin: ClientId::UNSTAMPED,
        }
    }

    fn make_client(
        ctx: SearchContext<ModGroup>,
        server: String,
        flush_ms: u64,
    ) -> (MergeClient<ModGroup>, Arc<DpBuffer>) {
        let buffer = Arc::new(DpBuffer::new(1024));
        let cfg = ClientConfig {
            server,
            reconnect_backoff_ms: 10,
            reconnect_backoff_max_ms: 50,
            ..ClientConfig::default()
        };
        let buffer_cfg = BufferConfig {
            capacity: 1024,
            flush_period_ms: flush_ms,
        };
        let client = MergeClient::new(
            ctx,
            cfg,
            &buffer_cfg,
            vec![buffer.clone()],
            Arc::new(Notify::new()),
            Arc::new(AtomicBool::new(false)),
        );
        (client, buffer)
    }

    async fn accept_and_handshake(listener: &TcpListener) -> TcpStream {
        let (mut stream, _) = listener.accept().await.unwrap();
        let (kind, _) = read_frame(&mut stream).await.unwrap();
        assert_eq!(kind, FrameKind::Hello);
        let ack = HelloAck {
            accepted: 1,
            reserved: [0; 3],
            max_batch: 4,
        };
        stream
            .write_all(&encode_frame(FrameKind::HelloAck, ack.as_bytes()).unwrap())
            .await
            .unwrap();
        stream
    }

    async fn send_solved(stream: &mut TcpStream, scalar: [u8; 32]) {
        let status = Status {
            state: STATUS_SOLVED,
            scalar,
        };
        stream
            .write_all(&encode_frame(FrameKind::Status, status.as_bytes()).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn buffered_records_reach_the_server_within_the_flush_period() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let ctx = toy_ctx();
        let (client, buffer) = make_client(ctx.clone(), addr.to_string(), 50);

        // 9 records with a negotiated max_batch of 4 → 3 frames
        for i in 0..9u64 {
            buffer.push(toy_record(&ctx, i % 11, i)).unwrap();
        }

        let server = tokio::spawn(async move {
            let mut stream = accept_and_handshake(&listener).await;
            let mut records = 0usize;
            while records < 9 {
                let (kind, payload) = read_frame(&mut stream).await.unwrap();
                match kind {
                    FrameKind::DpBatch => {
                        assert_eq!(payload.len() % WIRE_RECORD_SIZE, 0);
                        let count = payload.len() / WIRE_RECORD_SIZE;
                        assert!(count <= 4, "batch exceeds negotiated limit");
                        records += count;
                    }
                    FrameKind::Keepalive => {}
                    other => panic!("unexpected frame {other:?}"),
                }
            }
            // all records in hand — release the worker
            send_solved(&mut stream, [7; 32]).await;
            records
        });

        let solved = client.run().await.unwrap();
        assert_eq!(solved, Some([7; 32]));
        assert!(client.stop_flag().load(Ordering::Relaxed));
        assert_eq!(server.await.unwrap(), 9);
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn handshake_rejection_is_fatal_not_retried() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, _buffer) = make_client(toy_ctx(), addr.to_string(), 50);

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = read_frame(&mut stream).await.unwrap();
            let ack = HelloAck {
                accepted: 0,
                reserved: [0; 3],
                max_batch: 0,
            };
            stream
                .write_all(&encode_frame(FrameKind::HelloAck, ack.as_bytes()).unwrap())
                .await
                .unwrap();
        });

        assert!(matches!(client.run().await, Err(ClientError::Rejected)));
    }

    #[tokio::test]
    async fn records_pushed_during_an_outage_arrive_after_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let ctx = toy_ctx();
        let (client, buffer) = make_client(ctx.clone(), addr.to_string(), 20);
        let (reconnected_tx, reconnected_rx) = oneshot::channel::<()>();

        let server = tokio::spawn(async move {
            // first connection dies immediately after the handshake
            drop(accept_and_handshake(&listener).await);

            let mut stream = accept_and_handshake(&listener).await;
            reconnected_tx.send(()).unwrap();
            loop {
                let (kind, payload) = read_frame(&mut stream).await.unwrap();
                if kind == FrameKind::DpBatch && !payload.is_empty() {
                    send_solved(&mut stream, [1; 32]).await;
                    return payload.len() / WIRE_RECORD_SIZE;
                }
            }
        });

        let driver = tokio::spawn(async move { client.run().await });

        // the walk "discovers" a DP while the second session settles in
        reconnected_rx.await.unwrap();
        buffer.push(toy_record(&ctx, 3, 4)).unwrap();

        assert_eq!(driver.await.unwrap().unwrap(), Some([1; 32]));
        assert_eq!(server.await.unwrap(), 1);
    }
}
