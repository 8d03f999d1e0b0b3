//! Test helpers for `mudbridge`.
//!
//! Provides a shared `logtest` logger fixture, builders for inbound records,
//! chunk splitters for exercising reassembly, a recording [`Context`]
//! implementation, and [`drive_mud`] for running a bridge over an in-memory
//! stream.
//!
//! [`Context`]: mudbridge::dispatch::Context

pub mod context;
pub mod drive;
pub mod logging;
pub mod records;

pub use context::RecordingContext;
pub use drive::drive_mud;
pub use logging::{LoggerHandle, logger};
pub use records::{chunks_of, command_line, process_line, split_at_points};
