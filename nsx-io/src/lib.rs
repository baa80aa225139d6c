//! Blackrock `.nsX` reader: basic/extended headers, data-packet index,
//! and windowed reads of a single channel converted to microvolts.
//!
//! Supported file specs: 2.1 (`NEURALSG`), 2.2 / 2.3 (`NEURALCD`) and
//! 3.0 (`BRSMPGRP`, 64-bit packet timestamps). A matching writer is provided
//! for cutting windows out of a recording.

pub mod error;
pub mod header;
pub mod reader;
pub mod writer;

pub use error::*;
pub use header::*;
pub use reader::*;
pub use writer::*;

/// Convert a time in seconds to a sample index at `rate` Hz.
///
/// Truncates toward zero, so `time_to_sample(3110.99996, 30000.0)` lands on
/// the sample that starts at or before the requested instant.
pub fn time_to_sample(time_s: f64, rate: f64) -> u64 {
    let idx = time_s * rate;
    if idx.is_finite() && idx > 0.0 {
        idx as u64
    } else {
        0
    }
}
