//! wallaby-engine — the producer side of a search: walk state, the
//! engine boundary, bounded DP buffering, and the merge client.

pub mod buffer;
pub mod client;
pub mod walk;
pub mod worker;

pub use buffer::{DpBuffer, Overflow};
pub use client::{ClientError, MergeClient};
pub use walk::{seed_herd, seed_lane, CpuWalkEngine, Kangaroo, WalkEngine};
pub use worker::{spawn_walker, WalkerHandle};
