//! Checkpoint files — dump the collision table, load it after a restart.
//!
//! Layout: one fixed header, then the committed records back to back.
//! Writes are atomic (temp file, then rename), so a crash mid-checkpoint
//! leaves the previous file intact. The header pins the search digest:
//! a checkpoint from a different search refuses to load rather than
//! silently poisoning the table.

use std::fs;
use std::io::Write;
use std::path::Path;

use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use wallaby_core::dp::{ClientId, DpRecord};
use wallaby_core::wire::Kind;

const MAGIC: [u8; 8] = *b"WLBYCKP1";

/// File header. Wire size: 56 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
struct CheckpointHeader {
    magic: [u8; 8],
    version: u8,
    dp_bits: u8,
    reserved: [u8; 6],
    search_digest: [u8; 32],
    count: u64,
}

assert_eq_size!(CheckpointHeader, [u8; 56]);

const CHECKPOINT_VERSION: u8 = 1;

/// One stored record. Unlike the wire form this keeps the origin — a
/// resumed table should still know who found what. Wire size: 76 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
struct StoredRecord {
    point: [u8; 32],
    distance: [u8; 32],
    kind: u8,
    flags: u8,
    herd: u16,
    origin: u64,
}

assert_eq_size!(StoredRecord, [u8; 76]);

const STORED_RECORD_SIZE: usize = core::mem::size_of::<StoredRecord>();

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a checkpoint file")]
    BadMagic,

    #[error("unknown checkpoint version {0}")]
    UnknownVersion(u8),

    #[error("checkpoint belongs to a different search")]
    ConfigMismatch,

    #[error("checkpoint truncated: expected {expected} records, file holds {got}")]
    Truncated { expected: u64, got: u64 },

    #[error("record {0} is corrupt")]
    BadRecord(u64),
}

/// Write a checkpoint. `records` is typically `CollisionTable::snapshot()`.
pub fn save(
    path: &Path,
    search_digest: &[u8; 32],
    dp_bits: u8,
    records: &[DpRecord],
) -> Result<(), CheckpointError> {
    let header = CheckpointHeader {
        magic: MAGIC,
        version: CHECKPOINT_VERSION,
        dp_bits,
        reserved: [0; 6],
        search_digest: *search_digest,
        count: records.len() as u64,
    };

    let tmp_path = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(header.as_bytes())?;
        for record in records {
            let stored = StoredRecord {
                point: record.point,
                distance: record.distance,
                kind: record.kind as u8,
                flags: 0,
                herd: record.herd,
                origin: record.origin.0,
            };
            file.write_all(stored.as_bytes())?;
        }
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;

    tracing::info!(path = %path.display(), records = records.len(), "checkpoint written");
    Ok(())
}

/// Load a checkpoint written for the same search. The records come back
/// ready to re-ingest into a fresh table.
pub fn load(
    path: &Path,
    search_digest: &[u8; 32],
    dp_bits: u8,
) -> Result<Vec<DpRecord>, CheckpointError> {
    let data = fs::read(path)?;
    let header_size = core::mem::size_of::<CheckpointHeader>();
    let header = CheckpointHeader::read_from_prefix(&data).ok_or(CheckpointError::BadMagic)?;

    if header.magic != MAGIC {
        return Err(CheckpointError::BadMagic);
    }
    if header.version != CHECKPOINT_VERSION {
        return Err(CheckpointError::UnknownVersion(header.version));
    }
    if header.search_digest != *search_digest || header.dp_bits != dp_bits {
        return Err(CheckpointError::ConfigMismatch);
    }

    let expected = header.count;
    let body = &data[header_size..];
    let got = (body.len() / STORED_RECORD_SIZE) as u64;
    if got < expected || body.len() % STORED_RECORD_SIZE != 0 {
        return Err(CheckpointError::Truncated { expected, got });
    }

    let mut records = Vec::with_capacity(expected as usize);
    for (index, chunk) in body.chunks_exact(STORED_RECORD_SIZE).take(expected as usize).enumerate() {
        let stored =
            StoredRecord::read_from(chunk).ok_or(CheckpointError::BadRecord(index as u64))?;
        let kind =
            Kind::try_from(stored.kind).map_err(|_| CheckpointError::BadRecord(index as u64))?;
        records.push(DpRecord {
            point: stored.point,
            distance: stored.distance,
            kind,
            herd: stored.herd,
            origin: ClientId(stored.origin),
        });
    }
    Ok(records)
}
