//! Reassembly of chunked text transports into discrete units.
//!
//! This module provides:
//! - [`FrameReassembler`] for blank-line framed event streams
//! - [`LineReassembler`] for newline-delimited process output
//! - Lenient payload parsing that tolerates single-quoted literals

mod buffer;
mod quotes;
mod reassembler;

pub use buffer::DelimitedBuffer;
pub use quotes::{normalize_quotes, parse_lenient};
pub use reassembler::{parse_frame, FrameReassembler, LineReassembler};
