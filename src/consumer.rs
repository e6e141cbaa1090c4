use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::panic;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, trace};

use crate::compress::Accumulator;
use crate::config::TraceConfig;
use crate::record::{FormatVersion, TraceRecord};
use crate::slot::{DrainMode, ProducerHandle, SlotBuffer, TraceInfo};
use crate::writer::TraceWriter;

/// Pause between idle drain passes. The loop sleeps instead of spinning;
/// slots are sized to absorb a full pause of producer traffic.
const DRAIN_PAUSE: Duration = Duration::from_micros(100);

/// Output sink of a consumer. File-backed in production; tests substitute
/// in-memory writers.
pub type Sink = Box<dyn Write + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Running,
}

/// Per-stream trace consumer.
///
/// Owns the stream's slot buffer, its output sink, and (while Running) the
/// single background thread that drains committed records through the
/// compression merge into the sink.
///
/// # Lifecycle
///
/// `Idle --start(name, width)--> Running --stop()--> Idle`. Calling
/// `start` while Running or `stop` while Idle is an orchestration bug, not
/// a runtime condition, and panics. Consumers must be Idle when dropped.
pub struct TraceConsumer {
    shared: Arc<Shared>,
    writer: Arc<Mutex<TraceWriter<Sink>>>,
    compress: bool,
    state: State,
    thread: Option<JoinHandle<()>>,
    label: String,
}

struct Shared {
    buffer: SlotBuffer,
    /// Cleared by `stop()` to request the drain loop's final pass.
    active: AtomicBool,
    /// One-shot liveness handshake: the drain loop sets this and notifies
    /// before its first pass, unblocking `start()`.
    live: Mutex<bool>,
    live_cv: Condvar,
}

impl TraceConsumer {
    /// Creates an Idle consumer persisting to the file at `path`.
    ///
    /// The file is created (truncating any previous trace) and the format
    /// magic written immediately.
    pub fn create(config: &TraceConfig, path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)?;
        let sink: Sink = Box::new(BufWriter::new(file));
        Self::with_sink(config, sink, path.display().to_string())
    }

    /// Creates an Idle consumer writing to an arbitrary sink. The format
    /// magic is written immediately.
    pub fn with_sink(config: &TraceConfig, sink: Sink, label: String) -> io::Result<Self> {
        let mut writer = TraceWriter::new(sink);
        writer.write_header(if config.compress {
            FormatVersion::V3
        } else {
            FormatVersion::V2
        })?;
        info!(stream = %label, slots = config.slot_count, "trace consumer created");
        Ok(TraceConsumer {
            shared: Arc::new(Shared {
                buffer: SlotBuffer::new(config.slot_count, config.slot_capacity),
                active: AtomicBool::new(false),
                live: Mutex::new(false),
                live_cv: Condvar::new(),
            }),
            writer: Arc::new(Mutex::new(writer)),
            compress: config.compress,
            state: State::Idle,
            thread: None,
            label,
        })
    }

    pub fn is_idle(&self) -> bool {
        self.state == State::Idle
    }

    /// The stream's slot buffer, for in-process producers.
    pub fn buffer(&self) -> &SlotBuffer {
        &self.shared.buffer
    }

    /// Safe producer-side handle over this stream's buffer.
    pub fn producer(&self) -> ProducerHandle<'_> {
        ProducerHandle::new(&self.shared.buffer)
    }

    /// Raw buffer view handed to external producer code. Valid while this
    /// consumer is alive.
    pub fn fill_info(&self) -> TraceInfo {
        self.shared.buffer.fill_info()
    }

    /// Begins a kernel epoch: clears all slots, frames the output with a
    /// kernel-boundary entry, spawns the drain loop and blocks until it is
    /// live. Blocking here closes the race where `stop()` could be issued
    /// before the loop exists.
    ///
    /// # Panics
    ///
    /// Panics if the consumer is already Running, or on sink failure
    /// (fatal by design, see module docs on trace integrity).
    pub fn start(&mut self, kernel_name: &str, group_width: u16) {
        assert!(
            self.state == State::Idle,
            "start() on a Running trace consumer ({})",
            self.label
        );
        self.shared.buffer.clear();
        if let Err(e) = self.writer.lock().write_kernel(kernel_name, group_width) {
            panic!("trace sink write failed ({}): {e}", self.label);
        }

        self.shared.active.store(true, Ordering::Release);
        *self.shared.live.lock() = false;

        let shared = Arc::clone(&self.shared);
        let writer = Arc::clone(&self.writer);
        let compress = self.compress;
        let label = self.label.clone();
        let handle = thread::Builder::new()
            .name(format!("memtrace-drain-{}", self.label))
            .spawn(move || drain_loop(shared, writer, compress, label))
            .expect("failed to spawn drain thread");

        let mut live = self.shared.live.lock();
        while !*live {
            self.shared.live_cv.wait(&mut live);
        }
        drop(live);

        self.thread = Some(handle);
        self.state = State::Running;
        debug!(stream = %self.label, kernel = kernel_name, "tracing started");
    }

    /// Ends the kernel epoch: requests the drain loop's final inactive
    /// pass, joins the thread, and flushes the sink. Every record committed
    /// before this call is in the output when it returns.
    ///
    /// # Panics
    ///
    /// Panics if the consumer is Idle, or on sink failure.
    pub fn stop(&mut self) {
        assert!(
            self.state == State::Running,
            "stop() on an Idle trace consumer ({})",
            self.label
        );
        self.shared.active.store(false, Ordering::Release);
        let handle = self.thread.take().expect("Running consumer has a thread");
        if let Err(payload) = handle.join() {
            // The drain thread only panics on sink failure; that is fatal
            // for the caller too.
            panic::resume_unwind(payload);
        }
        if let Err(e) = self.writer.lock().flush() {
            panic!("trace sink flush failed ({}): {e}", self.label);
        }
        self.state = State::Idle;
        debug!(stream = %self.label, "tracing stopped");
    }
}

impl Drop for TraceConsumer {
    fn drop(&mut self) {
        if thread::panicking() {
            return;
        }
        assert!(
            self.state == State::Idle,
            "trace consumer ({}) dropped while Running",
            self.label
        );
    }
}

/// The background drain loop: the only reader of the stream's slots.
///
/// Round-robins all slots in active mode while the stream runs, then, once
/// `stop()` is requested, performs exactly one more full pass in inactive
/// mode and flushes the partial accumulator. Two-phase shutdown guarantees
/// every committed record is observed without any synchronization on the
/// producers' allocate/commit path.
fn drain_loop(
    shared: Arc<Shared>,
    writer: Arc<Mutex<TraceWriter<Sink>>>,
    compress: bool,
    label: String,
) {
    let mut accumulator = Accumulator::new();

    {
        let mut live = shared.live.lock();
        *live = true;
        shared.live_cv.notify_one();
    }

    while shared.active.load(Ordering::Acquire) {
        match drain_pass(&shared, &writer, &mut accumulator, compress, DrainMode::Active) {
            Ok(0) => thread::sleep(DRAIN_PAUSE),
            Ok(n) => trace!(stream = %label, records = n, "drained"),
            Err(e) => panic!("trace sink write failed ({label}): {e}"),
        }
    }

    let result = drain_pass(
        &shared,
        &writer,
        &mut accumulator,
        compress,
        DrainMode::Inactive,
    )
    .and_then(|_| accumulator.flush(&mut *writer.lock()));
    if let Err(e) = result {
        panic!("trace sink write failed ({label}): {e}");
    }
}

/// One round-robin pass over all slots. Returns the number of raw records
/// drained.
fn drain_pass(
    shared: &Shared,
    writer: &Mutex<TraceWriter<Sink>>,
    accumulator: &mut Accumulator,
    compress: bool,
    mode: DrainMode,
) -> io::Result<u32> {
    let mut drained = 0;
    for i in 0..shared.buffer.slot_count() {
        let slot = shared.buffer.slot(i);
        if !slot.is_drainable(mode) {
            continue;
        }
        let mut out = writer.lock();
        drained += slot.drain(|raw| {
            if compress {
                accumulator.feed(&raw, &mut *out)
            } else {
                out.write_record(&TraceRecord::from_raw(&raw))
            }
        })?;
    }
    Ok(drained)
}
