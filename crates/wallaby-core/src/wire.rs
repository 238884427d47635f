//! Wallaby wire format — on-wire types for the merge protocol.
//!
//! These types ARE the protocol. Every field, every size, every reserved
//! byte is part of the wire format; changing anything here breaks every
//! deployed worker. The exchange pattern is deliberately narrow: workers
//! stream distinguished-point batches upward, the server broadcasts its
//! status downward. There is no request/response machinery.
//!
//! All types are #[repr(C, packed)] for deterministic layout and use
//! zerocopy derives for safe, allocation-free serialization. There is no
//! unsafe code in this module.

use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::dp::{ClientId, DpRecord};

// ── Frame header ─────────────────────────────────────────────────────────────

/// Precedes every frame in both directions.
///
/// The receiver can classify and size a frame before reading a single
/// payload byte. `length` counts payload bytes following the header.
///
/// Wire size: 8 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct FrameHeader {
    /// Frame kind byte — see [`FrameKind`].
    pub kind: u8,
    /// Wire format version. Currently 0x01. A receiver seeing an unknown
    /// version rejects the frame and closes the connection.
    pub version: u8,
    /// Reserved, must be zero.
    pub flags: u8,
    /// Reserved, must be zero.
    pub reserved: u8,
    /// Payload length in bytes, not including this header.
    pub length: u32,
}

assert_eq_size!(FrameHeader, [u8; 8]);

pub const FRAME_HEADER_SIZE: usize = core::mem::size_of::<FrameHeader>();

/// Current wire format version.
pub const WIRE_VERSION: u8 = 0x01;

/// Upper bound on a single frame payload. A batch of the default
/// negotiated size (65 536 records × 68 bytes) fits with room to spare.
pub const MAX_FRAME_PAYLOAD: usize = 1 << 24;

/// Frame kinds carried in [`FrameHeader::kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Worker → server. Opens the exchange; carries the search identity.
    Hello = 0x01,
    /// Server → worker. Accepts or rejects the Hello.
    HelloAck = 0x02,
    /// Worker → server. Payload is N × [`WireRecord`].
    DpBatch = 0x03,
    /// Worker → server. Empty payload; liveness signal on quiet links.
    Keepalive = 0x04,
    /// Server → worker broadcast. Payload is one [`Status`].
    Status = 0x05,
}

impl TryFrom<u8> for FrameKind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(FrameKind::Hello),
            0x02 => Ok(FrameKind::HelloAck),
            0x03 => Ok(FrameKind::DpBatch),
            0x04 => Ok(FrameKind::Keepalive),
            0x05 => Ok(FrameKind::Status),
            other => Err(WireError::UnknownFrameKind(other)),
        }
    }
}

impl FrameHeader {
    /// Validate a raw header and return its kind and payload length.
    pub fn parse(bytes: &[u8; FRAME_HEADER_SIZE]) -> Result<(FrameKind, usize), WireError> {
        let header = FrameHeader::read_from(&bytes[..]).ok_or(WireError::Truncated)?;
        if header.version != WIRE_VERSION {
            return Err(WireError::UnknownVersion(header.version));
        }
        if header.flags != 0 || header.reserved != 0 {
            return Err(WireError::ReservedFlagsSet(header.flags | header.reserved));
        }
        let length = header.length as usize;
        if length > MAX_FRAME_PAYLOAD {
            return Err(WireError::PayloadTooLarge(length));
        }
        let kind = FrameKind::try_from(header.kind)?;
        Ok((kind, length))
    }
}

/// Assemble a complete frame (header + payload) ready for the socket.
pub fn encode_frame(kind: FrameKind, payload: &[u8]) -> Result<Vec<u8>, WireError> {
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(WireError::PayloadTooLarge(payload.len()));
    }
    let header = FrameHeader {
        kind: kind as u8,
        version: WIRE_VERSION,
        flags: 0,
        reserved: 0,
        length: payload.len() as u32,
    };
    let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

// ── Kangaroo kind ────────────────────────────────────────────────────────────

/// Which population a walk belongs to. The byte values are load-bearing:
/// they appear in records on the wire and in checkpoint files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Kind {
    /// Known relationship to the generator G.
    Tame = 0,
    /// Known relationship to the target point P.
    Wild = 1,
}

impl TryFrom<u8> for Kind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Kind::Tame),
            1 => Ok(Kind::Wild),
            other => Err(WireError::UnknownKind(other)),
        }
    }
}

// ── Handshake ────────────────────────────────────────────────────────────────

/// First frame on a new connection, worker → server.
///
/// `search_digest` commits to the group parameters, the search interval,
/// the herd plan, and the target point. Two processes whose digests differ
/// are hunting different problems; merging their points would silently
/// produce garbage distances, so the server rejects at handshake instead.
///
/// Wire size: 40 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct Hello {
    /// BLAKE3 digest of the search parameters — see `SearchContext::digest`.
    pub search_digest: [u8; 32],
    /// Distinguished-point mask width the worker applies.
    pub dp_bits: u8,
    /// Reserved, must be zero.
    pub reserved: [u8; 3],
    /// Largest batch (record count) the worker intends to send per frame.
    pub max_batch: u32,
}

assert_eq_size!(Hello, [u8; 40]);

/// Server's answer to a Hello. Wire size: 8 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct HelloAck {
    /// 1 = accepted; 0 = rejected (parameter mismatch), connection closes.
    pub accepted: u8,
    /// Reserved, must be zero.
    pub reserved: [u8; 3],
    /// Negotiated per-frame record limit: min(worker proposal, server cap).
    pub max_batch: u32,
}

assert_eq_size!(HelloAck, [u8; 8]);

// ── Distinguished-point records ──────────────────────────────────────────────

/// One distinguished point on the wire.
///
/// The origin client id never travels in a record — the server stamps
/// ingested records with the session that delivered them.
///
/// Wire size: 68 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct WireRecord {
    /// Canonical point encoding.
    pub point: [u8; 32],
    /// Canonical scalar encoding of the accumulated walk distance.
    pub distance: [u8; 32],
    /// [`Kind`] byte.
    pub kind: u8,
    /// Reserved, must be zero.
    pub flags: u8,
    /// Herd the walk belongs to.
    pub herd: u16,
}

assert_eq_size!(WireRecord, [u8; 68]);

pub const WIRE_RECORD_SIZE: usize = core::mem::size_of::<WireRecord>();

impl WireRecord {
    pub fn from_record(rec: &DpRecord) -> Self {
        WireRecord {
            point: rec.point,
            distance: rec.distance,
            kind: rec.kind as u8,
            flags: 0,
            herd: rec.herd,
        }
    }

    /// Validate and lift into a [`DpRecord`], stamping the delivering session.
    pub fn to_record(&self, origin: ClientId) -> Result<DpRecord, WireError> {
        if self.flags != 0 {
            return Err(WireError::ReservedFlagsSet(self.flags));
        }
        Ok(DpRecord {
            point: self.point,
            distance: self.distance,
            kind: Kind::try_from(self.kind)?,
            herd: self.herd,
            origin,
        })
    }
}

// ── Status broadcast ─────────────────────────────────────────────────────────

/// Search still running; also the server-side heartbeat.
pub const STATUS_SEARCHING: u8 = 1;
/// Collision found and verified; `scalar` carries the answer. Stop walking.
pub const STATUS_SOLVED: u8 = 2;

/// Server → worker broadcast. Wire size: 33 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct Status {
    /// [`STATUS_SEARCHING`] or [`STATUS_SOLVED`].
    pub state: u8,
    /// The recovered scalar when solved; zero otherwise.
    pub scalar: [u8; 32],
}

assert_eq_size!(Status, [u8; 33]);

// ── Errors ───────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unknown frame kind: 0x{0:02x}")]
    UnknownFrameKind(u8),

    #[error("unknown wire version: 0x{0:02x}")]
    UnknownVersion(u8),

    #[error("unknown kangaroo kind byte: 0x{0:02x}")]
    UnknownKind(u8),

    #[error("payload length {0} exceeds maximum {}", MAX_FRAME_PAYLOAD)]
    PayloadTooLarge(usize),

    #[error("reserved flags are non-zero: 0x{0:02x}")]
    ReservedFlagsSet(u8),

    #[error("batch payload of {0} bytes is not a whole number of records")]
    RaggedBatch(usize),

    #[error("batch of {got} records exceeds the negotiated limit {limit}")]
    BatchTooLarge { got: usize, limit: u32 },

    #[error("point encoding does not decode on the configured group")]
    BadPoint,

    #[error("frame truncated")]
    Truncated,
}

// ── Tests ────────────────────────────────────────────────────────────────────
