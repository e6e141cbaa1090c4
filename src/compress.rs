use std::io::{self, Write};

use crate::record::{AddrGroup, RawRecord, TraceRecord};
use crate::writer::TraceWriter;

/// Streaming run-length compression of raw records.
///
/// The accumulator holds at most one in-progress wire record: a maximal run
/// of raw records sharing every non-address field, whose addresses form one
/// or more arithmetic progressions. The merge is a single-pass greedy
/// algorithm with O(1) memory and O(1) amortized cost per record; input can
/// arrive at millions of records per second, so nothing here allocates or
/// looks back. It is locally greedy, not globally optimal.
pub struct Accumulator {
    pending: Option<Pending>,
}

struct Pending {
    record: TraceRecord,
    /// Address of the most recently merged raw record; the next stride
    /// decision is made against this, not the group base.
    last_addr: u64,
}

impl Accumulator {
    pub fn new() -> Self {
        Accumulator { pending: None }
    }

    /// True if no partial record is being built.
    pub fn is_empty(&self) -> bool {
        self.pending.is_none()
    }

    /// Feeds one raw record into the merge, writing any completed run to
    /// `out`.
    pub fn feed<W: Write>(&mut self, raw: &RawRecord, out: &mut TraceWriter<W>) -> io::Result<()> {
        match &self.pending {
            None => {
                self.seed(raw);
                return Ok(());
            }
            Some(p) if !p.record.shares_attributes(raw) => {
                self.flush(out)?;
                self.seed(raw);
                return Ok(());
            }
            Some(_) => {}
        }

        let pending = self.pending.as_mut().expect("checked above");
        let last_addr = pending.last_addr;
        let group = pending
            .record
            .groups
            .last_mut()
            .expect("pending record always has a group");

        let merged = if group.count == 1 {
            // Second record of a group fixes the stride tentatively.
            match stride_between(last_addr, raw.addr) {
                Some(stride) => {
                    group.stride = stride;
                    group.count = 2;
                    true
                }
                None => false,
            }
        } else if raw.addr == last_addr.wrapping_add(group.stride as i64 as u64) {
            group.count += 1;
            true
        } else {
            false
        };
        if merged {
            pending.last_addr = raw.addr;
            return Ok(());
        }

        // Address breaks the progression: open a fresh group, or flush and
        // reseed once the group cap is reached.
        let opened = pending.record.groups.push(AddrGroup {
            addr: raw.addr,
            stride: 0,
            count: 1,
        });
        if opened {
            pending.last_addr = raw.addr;
            return Ok(());
        }
        self.flush(out)?;
        self.seed(raw);
        Ok(())
    }

    /// Serializes any partial record and clears the accumulator.
    pub fn flush<W: Write>(&mut self, out: &mut TraceWriter<W>) -> io::Result<()> {
        if let Some(p) = self.pending.take() {
            out.write_record(&p.record)?;
        }
        Ok(())
    }

    fn seed(&mut self, raw: &RawRecord) {
        self.pending = Some(Pending {
            record: TraceRecord::from_raw(raw),
            last_addr: raw.addr,
        });
    }
}

impl Default for Accumulator {
    fn default() -> Self {
        Self::new()
    }
}

/// Address delta if it fits the stride field, `None` otherwise.
fn stride_between(from: u64, to: u64) -> Option<i32> {
    i32::try_from(to.wrapping_sub(from) as i64).ok()
}
