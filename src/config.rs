use std::env;
use std::path::Path;

use thiserror::Error;

use crate::slot::HEADROOM;

/// Token in the output file pattern replaced by the per-stream index.
pub const INDEX_TOKEN: &str = "%i";

/// Build-time configuration contract for a tracing context.
///
/// Sizing is validated once, here, rather than checked per record on the
/// hot path: a slot must always be able to absorb one full collective
/// write past the producer-full threshold.
#[derive(Debug, Clone)]
pub struct TraceConfig {
    /// Number of slots per stream buffer. Must be a nonzero power of two
    /// so unit ids map to slots with a mask.
    pub slot_count: usize,
    /// Capacity of each slot in raw records. Must exceed the headroom
    /// margin.
    pub slot_capacity: u32,
    /// Persist the compressed-capable format (V3) instead of plain V2.
    pub compress: bool,
    /// Output filename pattern; [`INDEX_TOKEN`] is replaced by the stream
    /// index.
    pub file_pattern: String,
}

impl TraceConfig {
    /// Validates the configuration contract.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slot_count == 0 || !self.slot_count.is_power_of_two() {
            return Err(ConfigError::SlotCount(self.slot_count));
        }
        if self.slot_capacity <= HEADROOM {
            return Err(ConfigError::SlotCapacity {
                capacity: self.slot_capacity,
                headroom: HEADROOM,
            });
        }
        if !self.file_pattern.contains(INDEX_TOKEN) {
            return Err(ConfigError::Pattern(self.file_pattern.clone()));
        }
        Ok(())
    }

    /// Output path for the stream with the given index.
    pub fn path_for(&self, index: u32) -> String {
        self.file_pattern.replace(INDEX_TOKEN, &index.to_string())
    }
}

impl Default for TraceConfig {
    fn default() -> Self {
        TraceConfig {
            slot_count: 4,
            slot_capacity: 64 * 1024,
            compress: true,
            file_pattern: format!("{}-{}.trc", process_name(), INDEX_TOKEN),
        }
    }
}

fn process_name() -> String {
    env::args()
        .next()
        .as_deref()
        .map(Path::new)
        .and_then(Path::file_stem)
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "trace".to_string())
}

/// A violated configuration contract. These are programming errors in the
/// embedding application, surfaced before any producer runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("slot count {0} is not a nonzero power of two")]
    SlotCount(usize),
    #[error("slot capacity {capacity} does not clear the headroom margin of {headroom}")]
    SlotCapacity { capacity: u32, headroom: u32 },
    #[error("file pattern {0:?} lacks the stream index token")]
    Pattern(String),
}
