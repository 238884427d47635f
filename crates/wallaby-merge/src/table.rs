//! The collision table — the authority on who landed where first.
//!
//! Maps a point encoding to the first record that reached it. Every
//! producer hashes points identically, so two walks that meet on a point
//! are routed to the same shard by construction; sharding can never hide
//! a collision.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use wallaby_core::dp::{ClientId, DpRecord};
use wallaby_core::group::PointBytes;
use wallaby_core::wire::Kind;

use crate::shard::ShardedMap;

/// The value side of a table entry. The point is the key; everything
/// else about the first arrival lives here. Never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed {
    pub distance: [u8; 32],
    pub kind: Kind,
    pub herd: u16,
    pub origin: ClientId,
}

/// Outcome of one ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingest {
    /// First record for this point.
    Inserted,
    /// Same point, same kind: two walks of one population met — wasted
    /// effort, not an error. Counted and dropped.
    Duplicate,
    /// Same point, differing kind. The pair goes to the solver; the
    /// existing entry stays exactly as committed.
    Collision {
        existing: DpRecord,
        incoming: DpRecord,
    },
    /// The search is already solved; record accepted but not merged.
    Suppressed,
}

pub struct CollisionTable {
    map: ShardedMap<PointBytes, Committed>,
    solved: AtomicBool,
    received: AtomicU64,
    inserted: AtomicU64,
    duplicates: AtomicU64,
    collisions: AtomicU64,
}

/// Counter snapshot for logs and status output.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableStats {
    pub received: u64,
    pub inserted: u64,
    pub duplicates: u64,
    pub collisions: u64,
}

impl CollisionTable {
    pub fn new(shard_count: usize) -> Self {
        CollisionTable {
            map: ShardedMap::new(shard_count),
            solved: AtomicBool::new(false),
            received: AtomicU64::new(0),
            inserted: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            collisions: AtomicU64::new(0),
        }
    }

    /// Merge one record. Exactly one `Collision` is reported per
    /// tame/wild pair on a point, whichever order the pair arrives in:
    /// the first record inserts, the second observes it.
    pub fn ingest(&self, record: DpRecord) -> Ingest {
        self.received.fetch_add(1, Ordering::Relaxed);
        if self.solved.load(Ordering::Relaxed) {
            return Ingest::Suppressed;
        }

        let committed = Committed {
            distance: record.distance,
            kind: record.kind,
            herd: record.herd,
            origin: record.origin,
        };
        match self.map.insert_or_get(record.point, committed) {
            None => {
                self.inserted.fetch_add(1, Ordering::Relaxed);
                Ingest::Inserted
            }
            Some(existing) if existing.kind == record.kind => {
                self.duplicates.fetch_add(1, Ordering::Relaxed);
                Ingest::Duplicate
            }
            Some(existing) => {
                self.collisions.fetch_add(1, Ordering::Relaxed);
                Ingest::Collision {
                    existing: DpRecord {
                        point: record.point,
                        distance: existing.distance,
                        kind: existing.kind,
                        herd: existing.herd,
                        origin: existing.origin,
                    },
                    incoming: record,
                }
            }
        }
    }

    /// Stop merging; later records are accepted and dropped. Committed
    /// entries stay valid — suppression bounds shutdown, it does not
    /// invalidate the table.
    pub fn mark_solved(&self) {
        self.solved.store(true, Ordering::Relaxed);
    }

    pub fn is_solved(&self) -> bool {
        self.solved.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn shard_count(&self) -> usize {
        self.map.shard_count()
    }

    /// Every committed record, for checkpointing.
    pub fn snapshot(&self) -> Vec<DpRecord> {
        self.map
            .snapshot()
            .into_iter()
            .map(|(point, committed)| DpRecord {
                point,
                distance: committed.distance,
                kind: committed.kind,
                herd: committed.herd,
                origin: committed.origin,
            })
            .collect()
    }

    pub fn stats(&self) -> TableStats {
        TableStats {
            received: self.received.load(Ordering::Relaxed),
            inserted: self.inserted.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            collisions: self.collisions.load(Ordering::Relaxed),
        }
    }
}
