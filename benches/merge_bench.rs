use std::io;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use memtrace::{AccessKind, Accumulator, Cta, RawRecord, TraceWriter};

/// Sink that discards everything; benchmarks the merge, not the disk.
struct NullSink;

impl io::Write for NullSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn raw(kind: AccessKind, addr: u64) -> RawRecord {
    RawRecord {
        kind,
        size: 4,
        smid: 0,
        warp: 0,
        instr_id: 1,
        clock: 100,
        addr,
        cta: Cta { x: 0, y: 0, z: 0 },
    }
}

fn bench_merge(c: &mut Criterion) {
    const N: u64 = 100_000;
    let mut group = c.benchmark_group("streaming_merge");
    group.throughput(Throughput::Elements(N));

    // Best case: one long arithmetic progression.
    let regular: Vec<_> = (0..N).map(|i| raw(AccessKind::Load, 0x1000 + i * 8)).collect();
    group.bench_function("regular_stride", |b| {
        b.iter(|| {
            let mut writer = TraceWriter::new(NullSink);
            let mut acc = Accumulator::new();
            for r in &regular {
                acc.feed(black_box(r), &mut writer).unwrap();
            }
            acc.flush(&mut writer).unwrap();
        })
    });

    // Worst case: every record breaks the run and flushes.
    let alternating: Vec<_> = (0..N)
        .map(|i| {
            let kind = if i % 2 == 0 {
                AccessKind::Load
            } else {
                AccessKind::Store
            };
            raw(kind, 0x1000 + i * 8)
        })
        .collect();
    group.bench_function("alternating_kind", |b| {
        b.iter(|| {
            let mut writer = TraceWriter::new(NullSink);
            let mut acc = Accumulator::new();
            for r in &alternating {
                acc.feed(black_box(r), &mut writer).unwrap();
            }
            acc.flush(&mut writer).unwrap();
        })
    });

    group.finish();
}

criterion_group!(benches, bench_merge);
criterion_main!(benches);
