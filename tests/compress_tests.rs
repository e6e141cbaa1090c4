use memtrace::{
    AccessKind, Accumulator, Cta, RawRecord, TraceRecord, TraceWriter, MAX_ADDR_GROUPS,
};

fn raw(kind: AccessKind, addr: u64) -> RawRecord {
    RawRecord {
        kind,
        size: 8,
        smid: 5,
        warp: 2,
        instr_id: 77,
        clock: 1000,
        addr,
        cta: Cta { x: 3, y: 1, z: 0 },
    }
}

/// Decodes every record entry the accumulator flushed into `bytes`.
fn decode_all(bytes: &[u8]) -> Vec<TraceRecord> {
    let mut records = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let word0 = u64::from_le_bytes(bytes[pos..pos + 8].try_into().unwrap());
        let groups = (word0 >> 56) as usize;
        let body_len = groups * 16 + 16;
        records.push(TraceRecord::decode(word0, &bytes[pos + 8..pos + 8 + body_len]).unwrap());
        pos += 8 + body_len;
    }
    records
}

fn run_merge(records: &[RawRecord]) -> Vec<TraceRecord> {
    let mut writer = TraceWriter::new(Vec::new());
    let mut acc = Accumulator::new();
    for r in records {
        acc.feed(r, &mut writer).unwrap();
    }
    acc.flush(&mut writer).unwrap();
    decode_all(&writer.into_inner())
}

#[test]
fn test_stride_run_collapses_to_one_record() {
    // 50 records, addresses 1000, 1008, 1016, ... (stride 8).
    let input: Vec<_> = (0..50)
        .map(|i| raw(AccessKind::Load, 1000 + i * 8))
        .collect();
    let out = run_merge(&input);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].groups.len(), 1);
    let g = out[0].groups.as_slice()[0];
    assert_eq!(g.addr, 1000);
    assert_eq!(g.stride, 8);
    assert_eq!(g.count, 50);
}

#[test]
fn test_kind_change_splits_run() {
    // 32-run, then record 33 differs in kind: two persisted records.
    let mut input: Vec<_> = (0..32)
        .map(|i| raw(AccessKind::Load, 1000 + i * 8))
        .collect();
    input.push(raw(AccessKind::Store, 1000 + 32 * 8));
    let out = run_merge(&input);
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].kind, AccessKind::Load);
    assert_eq!(out[0].groups.as_slice()[0].count, 32);
    assert_eq!(out[1].kind, AccessKind::Store);
    assert_eq!(out[1].total_count(), 1);
}

#[test]
fn test_irregular_addresses_open_groups() {
    // Three records whose deltas keep breaking: addr, then a stride of 8
    // fixed tentatively, then a jump that breaks it.
    let input = [
        raw(AccessKind::Load, 1000),
        raw(AccessKind::Load, 1008),
        raw(AccessKind::Load, 5000),
    ];
    let out = run_merge(&input);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].groups.len(), 2);
    assert_eq!(out[0].groups.as_slice()[0].count, 2);
    assert_eq!(out[0].groups.as_slice()[1].addr, 5000);
    assert_eq!(out[0].total_count(), 3);
}

#[test]
fn test_group_cap_forces_flush() {
    // Deltas exceeding the stride range open a new group for every record;
    // past 32 groups the accumulator must flush and reseed.
    let input: Vec<_> = (0..MAX_ADDR_GROUPS as u64 + 1)
        .map(|i| raw(AccessKind::Load, i << 33))
        .collect();
    let out = run_merge(&input);
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].groups.len(), MAX_ADDR_GROUPS);
    assert!(out[0].groups.iter().all(|g| g.count == 1));
    assert_eq!(out[1].total_count(), 1);
    let total: u64 = out.iter().map(|r| r.total_count()).sum();
    assert_eq!(total, MAX_ADDR_GROUPS as u64 + 1);
}

#[test]
fn test_huge_delta_does_not_become_stride() {
    // Delta exceeds i32: must open a new group, not fix a stride.
    let input = [raw(AccessKind::Load, 0), raw(AccessKind::Load, 1 << 40)];
    let out = run_merge(&input);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].groups.len(), 2);
    assert_eq!(out[0].groups.as_slice()[0].count, 1);
    assert_eq!(out[0].groups.as_slice()[1].addr, 1 << 40);
}

#[test]
fn test_negative_stride_run() {
    let input: Vec<_> = (0..10)
        .map(|i| raw(AccessKind::Store, 10_000 - i * 16))
        .collect();
    let out = run_merge(&input);
    assert_eq!(out.len(), 1);
    let g = out[0].groups.as_slice()[0];
    assert_eq!(g.stride, -16);
    assert_eq!(g.count, 10);
}

#[test]
fn test_clock_change_is_a_new_run() {
    let mut a = raw(AccessKind::Load, 1000);
    let mut b = raw(AccessKind::Load, 1008);
    a.clock = 1;
    b.clock = 2;
    let mut writer = TraceWriter::new(Vec::new());
    let mut acc = Accumulator::new();
    acc.feed(&a, &mut writer).unwrap();
    acc.feed(&b, &mut writer).unwrap();
    acc.flush(&mut writer).unwrap();
    let out = decode_all(&writer.into_inner());
    assert_eq!(out.len(), 2, "cycle counter is a non-address field");
}

#[test]
fn test_empty_accumulator_flush_writes_nothing() {
    let mut writer = TraceWriter::new(Vec::new());
    let mut acc = Accumulator::new();
    assert!(acc.is_empty());
    acc.flush(&mut writer).unwrap();
    assert!(writer.into_inner().is_empty());
}
