//! Walker threads — the producer side of the pipeline.
//!
//! One plain thread per lane: walking is compute-bound and never yields,
//! so it stays off the async runtime. The lane buffer is the only
//! synchronization surface; the stop flag is checked between dispatches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::Notify;

use wallaby_core::dp::{ClientId, DpRecord};
use wallaby_core::group::Group;

use crate::buffer::DpBuffer;
use crate::walk::{Kangaroo, WalkEngine};

pub struct WalkerHandle {
    pub lane: usize,
    thread: JoinHandle<u64>,
}

impl WalkerHandle {
    /// Join the thread; returns the number of jumps dispatched.
    pub fn join(self) -> u64 {
        self.thread.join().unwrap_or(0)
    }
}

/// Spawn the walk loop for one lane. The thread runs until `stop` flips,
/// pushing every distinguished landing into `buffer`. Overflow is counted
/// by the buffer and nudges the client via `flush_hint` — a dropped point
/// is rediscoverable, a stalled flush is not.
pub fn spawn_walker<G, E>(
    lane: usize,
    group: G,
    mut engine: E,
    mut roos: Vec<Kangaroo<G>>,
    buffer: Arc<DpBuffer>,
    flush_hint: Arc<Notify>,
    stop: Arc<AtomicBool>,
) -> WalkerHandle
where
    G: Group,
    E: WalkEngine<G> + 'static,
{
    let thread = std::thread::spawn(move || {
        let mut steps: u64 = 0;
        while !stop.load(Ordering::Relaxed) {
            let flags = engine.advance(&mut roos);
            steps += roos.len() as u64;

            for (roo, distinguished) in roos.iter().zip(flags) {
                if !distinguished {
                    continue;
                }
                let record = DpRecord {
                    point: group.encode_point(&roo.point),
                    distance: group.encode_scalar(&roo.distance),
                    kind: roo.kind,
                    herd: roo.herd,
                    origin: ClientId::UNSTAMPED,
                };
                if buffer.push(record).is_err() {
                    flush_hint.notify_one();
                }
            }
        }
        tracing::debug!(lane, steps, dropped = buffer.dropped(), "walker stopped");
        steps
    });

    WalkerHandle { lane, thread }
}
