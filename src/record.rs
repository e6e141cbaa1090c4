//! Record types and the binary wire codec.
//!
//! Two encodings live here: the fixed 24-byte `RawRecord` that producers
//! write into slot buffers, and the variable-length `TraceRecord` entry
//! that the consumer persists. Both are little-endian and word-oriented;
//! the exact bit layout is an internal contract between this writer and
//! `TraceReader`. No compatibility with any external format is implied.

use std::io::{self, Write};

use thiserror::Error;

/// Number of lanes that execute in lock-step. This bounds both the largest
/// collective slot write and the address-group count of a wire record.
pub const WARP_WIDTH: usize = 32;

/// Maximum number of address groups a single wire record may carry.
pub const MAX_ADDR_GROUPS: usize = WARP_WIDTH;

/// Size in bytes of one raw producer record inside a slot.
pub const RAW_RECORD_SIZE: usize = 24;

/// Classification of a traced event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AccessKind {
    Load = 0,
    Store = 1,
    Atomic = 2,
    /// Kernel-entry marker; the address payload is zero.
    Execute = 3,
    /// Kernel-exit marker; the address payload carries the lane id.
    Return = 4,
}

impl TryFrom<u8> for AccessKind {
    type Error = WireError;

    fn try_from(v: u8) -> Result<Self, WireError> {
        match v {
            0 => Ok(AccessKind::Load),
            1 => Ok(AccessKind::Store),
            2 => Ok(AccessKind::Atomic),
            3 => Ok(AccessKind::Execute),
            4 => Ok(AccessKind::Return),
            other => Err(WireError::InvalidKind(other)),
        }
    }
}

/// Spatial coordinate of a producer cohort. Carried as opaque data; this
/// crate never interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cta {
    pub x: u32,
    pub y: u16,
    pub z: u16,
}

impl Cta {
    /// Packs into the compact 32-bit raw-record form (x:16, y:8, z:8).
    pub fn pack(&self) -> u32 {
        ((self.x & 0xFFFF) << 16) | ((self.y as u32 & 0xFF) << 8) | (self.z as u32 & 0xFF)
    }

    pub fn unpack(v: u32) -> Self {
        Cta {
            x: (v >> 16) & 0xFFFF,
            y: ((v >> 8) & 0xFF) as u16,
            z: (v & 0xFF) as u16,
        }
    }
}

/// Fixed-size binary unit emitted per traced event.
///
/// Producers pack one of these into the slot region for every traced
/// operation. The consumer is the only reader, and only after the region
/// has been committed.
///
/// Packed layout (three LE u64 words):
///
/// ```text
/// word0: [kind:8 | size:8 | smid:8 | warp:8 | instr_id:16 | reserved:16]
/// word1: address payload (lane id for Return, zero for Execute)
/// word2: [cta packed:32 | clock:32]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawRecord {
    pub kind: AccessKind,
    /// Operand size in bytes.
    pub size: u8,
    /// Physical execution unit the producer ran on.
    pub smid: u8,
    /// Lock-step sub-group id.
    pub warp: u8,
    /// Static per-kernel instruction id.
    pub instr_id: u16,
    /// 32-bit monotonic cycle counter sample.
    pub clock: u32,
    /// Address payload.
    pub addr: u64,
    pub cta: Cta,
}

impl RawRecord {
    /// Packs this record into exactly [`RAW_RECORD_SIZE`] bytes.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is shorter than [`RAW_RECORD_SIZE`].
    pub fn pack_into(&self, buf: &mut [u8]) {
        let w0 = ((self.kind as u64) << 56)
            | ((self.size as u64) << 48)
            | ((self.smid as u64) << 40)
            | ((self.warp as u64) << 32)
            | ((self.instr_id as u64) << 16);
        let w2 = ((self.cta.pack() as u64) << 32) | self.clock as u64;
        buf[0..8].copy_from_slice(&w0.to_le_bytes());
        buf[8..16].copy_from_slice(&self.addr.to_le_bytes());
        buf[16..24].copy_from_slice(&w2.to_le_bytes());
    }

    /// Unpacks a record previously written by [`RawRecord::pack_into`].
    ///
    /// Returns an error if the kind byte is out of range; slot regions are
    /// trusted otherwise.
    pub fn unpack_from(buf: &[u8]) -> Result<Self, WireError> {
        let w0 = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        let addr = u64::from_le_bytes(buf[8..16].try_into().unwrap());
        let w2 = u64::from_le_bytes(buf[16..24].try_into().unwrap());
        Ok(RawRecord {
            kind: AccessKind::try_from(((w0 >> 56) & 0xFF) as u8)?,
            size: ((w0 >> 48) & 0xFF) as u8,
            smid: ((w0 >> 40) & 0xFF) as u8,
            warp: ((w0 >> 32) & 0xFF) as u8,
            instr_id: ((w0 >> 16) & 0xFFFF) as u16,
            clock: (w2 & 0xFFFF_FFFF) as u32,
            addr,
            cta: Cta::unpack((w2 >> 32) as u32),
        })
    }
}

/// One arithmetic progression of addresses within a compressed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddrGroup {
    pub addr: u64,
    pub stride: i32,
    pub count: u32,
}

/// Index-bounded sequence of address groups, capacity [`MAX_ADDR_GROUPS`].
#[derive(Debug, Clone, Copy)]
pub struct AddrGroupSeq {
    groups: [AddrGroup; MAX_ADDR_GROUPS],
    len: u8,
}

impl AddrGroupSeq {
    pub fn new() -> Self {
        Self {
            groups: [AddrGroup::default(); MAX_ADDR_GROUPS],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len as usize == MAX_ADDR_GROUPS
    }

    /// Appends a group. Returns `false` without modifying the sequence if
    /// the capacity is already reached.
    pub fn push(&mut self, group: AddrGroup) -> bool {
        if self.is_full() {
            return false;
        }
        self.groups[self.len as usize] = group;
        self.len += 1;
        true
    }

    pub fn last_mut(&mut self) -> Option<&mut AddrGroup> {
        if self.len == 0 {
            None
        } else {
            Some(&mut self.groups[self.len as usize - 1])
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &AddrGroup> {
        self.groups[..self.len as usize].iter()
    }

    pub fn as_slice(&self) -> &[AddrGroup] {
        &self.groups[..self.len as usize]
    }
}

impl Default for AddrGroupSeq {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for AddrGroupSeq {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for AddrGroupSeq {}

impl FromIterator<AddrGroup> for AddrGroupSeq {
    /// # Panics
    ///
    /// Panics if the iterator yields more than [`MAX_ADDR_GROUPS`] groups.
    fn from_iter<I: IntoIterator<Item = AddrGroup>>(iter: I) -> Self {
        let mut seq = Self::new();
        for g in iter {
            assert!(seq.push(g), "more than {} address groups", MAX_ADDR_GROUPS);
        }
        seq
    }
}

/// Structured wire record: shared event attributes plus 1..=32 address
/// groups. One of these may stand for a long run of raw records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceRecord {
    pub kind: AccessKind,
    pub size: u8,
    pub smid: u8,
    pub warp: u16,
    pub instr_id: u16,
    pub cta: Cta,
    pub clock: u64,
    pub groups: AddrGroupSeq,
}

impl TraceRecord {
    /// Builds an uncompressed record from a single raw record: one address
    /// group with stride 0 and count 1.
    pub fn from_raw(raw: &RawRecord) -> Self {
        let mut groups = AddrGroupSeq::new();
        groups.push(AddrGroup {
            addr: raw.addr,
            stride: 0,
            count: 1,
        });
        TraceRecord {
            kind: raw.kind,
            size: raw.size,
            smid: raw.smid,
            warp: raw.warp as u16,
            instr_id: raw.instr_id,
            cta: Cta {
                x: raw.cta.x,
                y: raw.cta.y,
                z: raw.cta.z,
            },
            clock: raw.clock as u64,
            groups,
        }
    }

    /// True if `raw` agrees with this record on every non-address field.
    pub fn shares_attributes(&self, raw: &RawRecord) -> bool {
        self.kind == raw.kind
            && self.size == raw.size
            && self.smid == raw.smid
            && self.warp == raw.warp as u16
            && self.instr_id == raw.instr_id
            && self.cta == raw.cta
            && self.clock == raw.clock as u64
    }

    /// Total number of raw records this entry stands for.
    pub fn total_count(&self) -> u64 {
        self.groups.iter().map(|g| g.count as u64).sum()
    }

    /// Serializes this record as one wire entry.
    ///
    /// The leading word packs the address-group count in its top byte (the
    /// entry tag), letting a reader compute the entry length before reading
    /// the remainder.
    pub fn encode_into<W: Write>(&self, w: &mut W) -> io::Result<()> {
        debug_assert!(!self.groups.is_empty(), "record with no address groups");
        let word0 = ((self.groups.len() as u64) << 56)
            | ((self.smid as u64) << 48)
            | ((self.warp as u64) << 32)
            | ((self.instr_id as u64) << 16)
            | ((self.size as u64) << 8)
            | self.kind as u64;
        w.write_all(&word0.to_le_bytes())?;
        for g in self.groups.iter() {
            w.write_all(&g.addr.to_le_bytes())?;
            let meta = ((g.stride as u32 as u64) << 32) | g.count as u64;
            w.write_all(&meta.to_le_bytes())?;
        }
        let cta_word = ((self.cta.x as u64) << 32) | ((self.cta.y as u64) << 16) | self.cta.z as u64;
        w.write_all(&cta_word.to_le_bytes())?;
        w.write_all(&self.clock.to_le_bytes())?;
        Ok(())
    }

    /// Decodes a record entry from its leading word and body.
    ///
    /// `body` must hold exactly the group words plus the trailer, as sized
    /// by [`record_body_len`] for the entry tag.
    pub fn decode(word0: u64, body: &[u8]) -> Result<Self, WireError> {
        let addr_len = ((word0 >> 56) & 0xFF) as usize;
        if addr_len == 0 || addr_len > MAX_ADDR_GROUPS {
            return Err(WireError::InvalidGroupCount(addr_len as u8));
        }
        if body.len() != record_body_len(addr_len) {
            return Err(WireError::ShortEntry);
        }
        let mut groups = AddrGroupSeq::new();
        let mut pos = 0;
        for _ in 0..addr_len {
            let addr = u64::from_le_bytes(body[pos..pos + 8].try_into().unwrap());
            let meta = u64::from_le_bytes(body[pos + 8..pos + 16].try_into().unwrap());
            groups.push(AddrGroup {
                addr,
                stride: (meta >> 32) as u32 as i32,
                count: (meta & 0xFFFF_FFFF) as u32,
            });
            pos += 16;
        }
        let cta_word = u64::from_le_bytes(body[pos..pos + 8].try_into().unwrap());
        let clock = u64::from_le_bytes(body[pos + 8..pos + 16].try_into().unwrap());
        Ok(TraceRecord {
            kind: AccessKind::try_from((word0 & 0xFF) as u8)?,
            size: ((word0 >> 8) & 0xFF) as u8,
            smid: ((word0 >> 48) & 0xFF) as u8,
            warp: ((word0 >> 32) & 0xFFFF) as u16,
            instr_id: ((word0 >> 16) & 0xFFFF) as u16,
            cta: Cta {
                x: (cta_word >> 32) as u32,
                y: ((cta_word >> 16) & 0xFFFF) as u16,
                z: (cta_word & 0xFFFF) as u16,
            },
            clock,
            groups,
        })
    }
}

/// Entry tag reserved for kernel-boundary entries.
pub const KERNEL_TAG: u8 = 0x00;

/// Body length (bytes past the leading word) of a record entry with the
/// given address-group count: the groups plus the fixed trailer.
pub fn record_body_len(addr_len: usize) -> usize {
    addr_len * 16 + 16
}

/// Supported persisted trace formats, distinguished by a 10-byte magic.
/// Selected once at `TraceReader::open` and fixed thereafter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatVersion {
    /// Uncompressed: every raw record becomes one single-group entry.
    V2,
    /// Compressed-capable: entries may carry up to 32 address groups.
    V3,
}

const MAGIC_V2: [u8; 10] = *b"\x19MEMTRACE\0";
const MAGIC_V3: [u8; 10] = *b"\x1aMEMTRACE\0";

impl FormatVersion {
    pub fn magic(&self) -> &'static [u8; 10] {
        match self {
            FormatVersion::V2 => &MAGIC_V2,
            FormatVersion::V3 => &MAGIC_V3,
        }
    }

    pub fn from_magic(magic: &[u8; 10]) -> Option<Self> {
        if magic == &MAGIC_V2 {
            Some(FormatVersion::V2)
        } else if magic == &MAGIC_V3 {
            Some(FormatVersion::V3)
        } else {
            None
        }
    }
}

/// Malformed wire data, distinguishable from I/O failures and clean
/// end-of-stream.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("invalid access kind {0}")]
    InvalidKind(u8),
    #[error("invalid address-group count {0}")]
    InvalidGroupCount(u8),
    #[error("entry shorter than its declared length")]
    ShortEntry,
}
