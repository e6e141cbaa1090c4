//! # memtrace
//!
//! High-throughput collection of execution-trace records produced
//! concurrently by thousands of independent hardware execution contexts,
//! persisted through a single consumer thread per stream.
//!
//! The design goals, in order:
//!
//! * **Zero producer-side synchronization overhead**: producers reserve and
//!   publish buffer regions with nothing but atomic adds. No locks, no
//!   per-record checks on the hot path.
//! * **Zero data loss**: bounded in-flight data through slot headroom and a
//!   two-phase consumer shutdown that observes every committed record.
//! * **Compact persistence**: a streaming run-length merge collapses runs
//!   of regular access patterns into single records with up to 32 address
//!   groups.
//!
//! ## Main components
//!
//! * [`SlotBuffer`](slot::SlotBuffer): the lock-free multi-producer/
//!   single-consumer slotted buffer producers and the consumer share
//! * [`TraceConsumer`](consumer::TraceConsumer): per-stream slots, drain
//!   thread, sink, and the Idle/Running lifecycle
//! * [`TraceContext`](registry::TraceContext): one consumer per stream key,
//!   created lazily, torn down explicitly
//! * [`TraceReader`](reader::TraceReader): offline, format-version-aware
//!   iterator over a persisted trace
//!
//! ## Quick start
//!
//! ```no_run
//! use memtrace::{AccessKind, Cta, RawRecord, StreamKey, TraceConfig, TraceContext};
//!
//! let mut ctx = TraceContext::new(TraceConfig::default());
//! let stream = StreamKey(0x1000);
//! ctx.touch(stream);
//!
//! ctx.get_mut(stream).start("saxpy", 256);
//! // Producers emit records through the stream's buffer while the kernel
//! // runs; the background drain thread persists them.
//! ctx.get(stream).producer().emit(&RawRecord {
//!     kind: AccessKind::Load,
//!     size: 4,
//!     smid: 0,
//!     warp: 0,
//!     instr_id: 7,
//!     clock: 1234,
//!     addr: 0x7f00_0000,
//!     cta: Cta { x: 1, y: 0, z: 0 },
//! });
//! ctx.get_mut(stream).stop();
//! ctx.shutdown();
//! ```

pub mod compress;
pub mod config;
pub mod consumer;
pub mod reader;
pub mod record;
pub mod registry;
pub mod slot;
pub mod writer;

pub use compress::Accumulator;
pub use config::{ConfigError, TraceConfig};
pub use consumer::{Sink, TraceConsumer};
pub use reader::{ReadError, TraceEntry, TraceReader};
pub use record::{
    AccessKind, AddrGroup, AddrGroupSeq, Cta, FormatVersion, RawRecord, TraceRecord,
    MAX_ADDR_GROUPS, RAW_RECORD_SIZE, WARP_WIDTH,
};
pub use registry::{StreamKey, TraceContext};
pub use slot::{DrainMode, ProducerHandle, Slot, SlotBuffer, TraceInfo, HEADROOM};
pub use writer::TraceWriter;
