use std::io::{self, Write};

use crate::record::{FormatVersion, TraceRecord};

/// Serializer for the persisted trace format.
///
/// Writes the three entry kinds of the wire format: the one-shot magic
/// header, kernel-boundary framing entries, and wire records. Failures
/// propagate as `io::Result`; on the consumer's drain path they are fatal
/// by design, since trace integrity could not otherwise be guaranteed.
pub struct TraceWriter<W: Write> {
    inner: W,
}

impl<W: Write> TraceWriter<W> {
    pub fn new(inner: W) -> Self {
        TraceWriter { inner }
    }

    /// Writes the 10-byte format magic. Call exactly once, before any
    /// entry.
    pub fn write_header(&mut self, version: FormatVersion) -> io::Result<()> {
        self.inner.write_all(version.magic())
    }

    /// Writes a kernel-boundary entry: a word packing the reserved tag,
    /// name length and execution-group width, followed by the raw name
    /// bytes (no terminator). Names longer than 255 bytes are truncated.
    pub fn write_kernel(&mut self, name: &str, group_width: u16) -> io::Result<()> {
        let name = &name.as_bytes()[..name.len().min(u8::MAX as usize)];
        let word0 = ((name.len() as u64) << 48) | ((group_width as u64) << 32);
        self.inner.write_all(&word0.to_le_bytes())?;
        self.inner.write_all(name)
    }

    /// Writes one wire record entry.
    pub fn write_record(&mut self, record: &TraceRecord) -> io::Result<()> {
        record.encode_into(&mut self.inner)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
