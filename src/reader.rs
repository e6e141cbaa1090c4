use std::io::{self, Read};

use thiserror::Error;

use crate::record::{record_body_len, FormatVersion, TraceRecord, WireError, KERNEL_TAG};

/// Offline reader for persisted trace files.
///
/// Format-version-aware, forward-only and non-restartable: reopen the
/// source to read again. Malformed input surfaces as [`ReadError`], never
/// a crash, and is distinguishable from a clean end-of-stream.

/// One entry of a persisted trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEntry {
    /// Framing entry marking the start of an instrumented kernel.
    NewKernel { name: String, width: u16 },
    /// One wire record (possibly standing for a compressed run).
    Record(TraceRecord),
}

/// A failed read, distinct from clean end-of-stream.
#[derive(Debug, Error)]
pub enum ReadError {
    /// The leading magic bytes match no supported format version.
    #[error("not a trace file: unrecognized magic")]
    InvalidHeader,
    /// The stream ended in the middle of an entry.
    #[error("truncated entry")]
    Truncated,
    /// Structurally invalid entry contents.
    #[error("malformed entry: {0}")]
    Malformed(#[from] WireError),
    #[error("read failed: {0}")]
    Io(#[from] io::Error),
}

/// Lazy iterator over the entries of a trace file.
#[derive(Debug)]
pub struct TraceReader<R: Read> {
    source: R,
    version: FormatVersion,
}

impl<R: Read> TraceReader<R> {
    /// Opens a trace, consuming and validating the magic header.
    pub fn open(mut source: R) -> Result<Self, ReadError> {
        let mut magic = [0u8; 10];
        source
            .read_exact(&mut magic)
            .map_err(|_| ReadError::InvalidHeader)?;
        let version = FormatVersion::from_magic(&magic).ok_or(ReadError::InvalidHeader)?;
        Ok(TraceReader { source, version })
    }

    /// The format version selected at open.
    pub fn version(&self) -> FormatVersion {
        self.version
    }

    /// Reads the next entry.
    ///
    /// Returns `Ok(None)` exactly at a clean end-of-stream (entry
    /// boundary); anything else that prevents producing an entry is an
    /// error.
    pub fn next_entry(&mut self) -> Result<Option<TraceEntry>, ReadError> {
        let mut word = [0u8; 8];
        match read_or_eof(&mut self.source, &mut word)? {
            Lead::Eof => return Ok(None),
            Lead::Full => {}
        }
        let word0 = u64::from_le_bytes(word);
        let tag = (word0 >> 56) as u8;

        if tag == KERNEL_TAG {
            let name_len = ((word0 >> 48) & 0xFF) as usize;
            let width = ((word0 >> 32) & 0xFFFF) as u16;
            let mut name = vec![0u8; name_len];
            self.source
                .read_exact(&mut name)
                .map_err(map_truncated)?;
            return Ok(Some(TraceEntry::NewKernel {
                name: String::from_utf8_lossy(&name).into_owned(),
                width,
            }));
        }

        let addr_len = tag as usize;
        if addr_len > crate::record::MAX_ADDR_GROUPS {
            return Err(WireError::InvalidGroupCount(tag).into());
        }
        let mut body = vec![0u8; record_body_len(addr_len)];
        self.source.read_exact(&mut body).map_err(map_truncated)?;
        let record = TraceRecord::decode(word0, &body)?;
        Ok(Some(TraceEntry::Record(record)))
    }
}

impl<R: Read> Iterator for TraceReader<R> {
    type Item = Result<TraceEntry, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}

enum Lead {
    Full,
    Eof,
}

/// Reads a full leading word, or recognizes a clean end-of-stream when no
/// byte of it exists. A partial word is a truncated entry.
fn read_or_eof(source: &mut impl Read, buf: &mut [u8; 8]) -> Result<Lead, ReadError> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(Lead::Eof),
            Ok(0) => return Err(ReadError::Truncated),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(Lead::Full)
}

fn map_truncated(e: io::Error) -> ReadError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        ReadError::Truncated
    } else {
        ReadError::Io(e)
    }
}
