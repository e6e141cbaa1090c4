use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex};
use std::thread;

use memtrace::{
    AccessKind, Cta, RawRecord, TraceConfig, TraceConsumer, TraceEntry, TraceReader,
    FormatVersion,
};

/// Sink that lets the test inspect everything the consumer persisted,
/// after the consumer is done with it.
#[derive(Clone)]
struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl SharedSink {
    fn new() -> Self {
        SharedSink(Arc::new(Mutex::new(Vec::new())))
    }

    fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn test_config() -> TraceConfig {
    TraceConfig {
        slot_count: 4,
        slot_capacity: 256,
        compress: true,
        file_pattern: "unused-%i.trc".to_string(),
    }
}

fn consumer_with_sink(config: &TraceConfig) -> (TraceConsumer, SharedSink) {
    let sink = SharedSink::new();
    let consumer = TraceConsumer::with_sink(config, Box::new(sink.clone()), "test".to_string())
        .expect("in-memory sink cannot fail");
    (consumer, sink)
}

fn raw(smid: u8, addr: u64) -> RawRecord {
    RawRecord {
        kind: AccessKind::Load,
        size: 4,
        smid,
        warp: 1,
        instr_id: 9,
        clock: 7,
        addr,
        cta: Cta { x: 2, y: 0, z: 0 },
    }
}

fn read_entries(bytes: &[u8]) -> Vec<TraceEntry> {
    let reader = TraceReader::open(Cursor::new(bytes)).expect("valid header");
    reader.map(|e| e.expect("well-formed trace")).collect()
}

#[test]
fn test_start_stop_frames_the_output() {
    let (mut consumer, sink) = consumer_with_sink(&test_config());
    assert!(consumer.is_idle());
    consumer.start("saxpy_kernel", 128);
    assert!(!consumer.is_idle());
    consumer.stop();
    assert!(consumer.is_idle());

    let bytes = sink.contents();
    let reader = TraceReader::open(Cursor::new(&bytes)).unwrap();
    assert_eq!(reader.version(), FormatVersion::V3);
    let entries = read_entries(&bytes);
    assert_eq!(
        entries,
        vec![TraceEntry::NewKernel {
            name: "saxpy_kernel".to_string(),
            width: 128
        }]
    );
}

#[test]
fn test_every_committed_record_reaches_the_output() {
    let (mut consumer, sink) = consumer_with_sink(&test_config());
    consumer.start("vecadd", 256);

    const PER_THREAD: u64 = 2_500;
    let mut expected = Vec::new();
    thread::scope(|s| {
        for t in 0..4u64 {
            let producer = consumer.producer();
            s.spawn(move || {
                for i in 0..PER_THREAD {
                    // Distinct smid per thread so threads spread over slots;
                    // stride-8 addresses so runs compress.
                    producer.emit(&raw(t as u8, t * 0x1_0000_0000 + i * 8));
                }
            });
        }
        for t in 0..4u64 {
            for i in 0..PER_THREAD {
                expected.push(t * 0x1_0000_0000 + i * 8);
            }
        }
    });
    consumer.stop();

    let mut observed = Vec::new();
    for entry in read_entries(&sink.contents()) {
        if let TraceEntry::Record(r) = entry {
            for g in r.groups.iter() {
                for k in 0..g.count as u64 {
                    observed.push(g.addr.wrapping_add((g.stride as i64 as u64).wrapping_mul(k)));
                }
            }
        }
    }
    observed.sort_unstable();
    expected.sort_unstable();
    assert_eq!(observed.len(), expected.len(), "record count mismatch");
    assert_eq!(observed, expected, "every committed address exactly once");
}

#[test]
fn test_uncompressed_mode_writes_one_entry_per_record() {
    let mut config = test_config();
    config.compress = false;
    let (mut consumer, sink) = consumer_with_sink(&config);
    consumer.start("plain", 32);
    {
        let producer = consumer.producer();
        for i in 0..10u64 {
            producer.emit(&raw(0, 1000 + i * 8));
        }
    }
    consumer.stop();

    let bytes = sink.contents();
    let reader = TraceReader::open(Cursor::new(&bytes)).unwrap();
    assert_eq!(reader.version(), FormatVersion::V2);
    let records: Vec<_> = read_entries(&bytes)
        .into_iter()
        .filter_map(|e| match e {
            TraceEntry::Record(r) => Some(r),
            _ => None,
        })
        .collect();
    assert_eq!(records.len(), 10, "no merging in V2 mode");
    assert!(records.iter().all(|r| r.total_count() == 1));
}

#[test]
fn test_consecutive_epochs_share_one_file() {
    let (mut consumer, sink) = consumer_with_sink(&test_config());
    consumer.start("first", 64);
    consumer.producer().emit(&raw(0, 0x100));
    consumer.stop();
    consumer.start("second", 96);
    consumer.producer().emit(&raw(0, 0x200));
    consumer.stop();

    let kernels: Vec<_> = read_entries(&sink.contents())
        .into_iter()
        .filter_map(|e| match e {
            TraceEntry::NewKernel { name, width } => Some((name, width)),
            _ => None,
        })
        .collect();
    assert_eq!(
        kernels,
        vec![("first".to_string(), 64), ("second".to_string(), 96)]
    );
}

#[test]
fn test_collective_writes_survive_stop() {
    let (mut consumer, sink) = consumer_with_sink(&test_config());
    consumer.start("warp_wide", 32);
    {
        let producer = consumer.producer();
        let group: Vec<_> = (0..32u64).map(|lane| raw(1, 0x4000 + lane * 4)).collect();
        producer.emit_group(&group);
    }
    consumer.stop();

    let total: u64 = read_entries(&sink.contents())
        .into_iter()
        .filter_map(|e| match e {
            TraceEntry::Record(r) => Some(r.total_count()),
            _ => None,
        })
        .sum();
    assert_eq!(total, 32);
}

#[test]
#[should_panic(expected = "start() on a Running")]
fn test_double_start_aborts() {
    let (mut consumer, _sink) = consumer_with_sink(&test_config());
    consumer.start("once", 32);
    consumer.start("twice", 32);
}

#[test]
#[should_panic(expected = "stop() on an Idle")]
fn test_stop_while_idle_aborts() {
    let (mut consumer, _sink) = consumer_with_sink(&test_config());
    consumer.stop();
}

#[test]
#[should_panic(expected = "dropped while Running")]
fn test_drop_while_running_aborts() {
    let (mut consumer, _sink) = consumer_with_sink(&test_config());
    consumer.start("leaky", 32);
    drop(consumer);
}
