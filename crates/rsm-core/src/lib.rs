#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! The ingestion engine: a long-polled change feed mirrored into a search
//! index, with checkpointing, bounded retry, parking, and periodic refresh.

/// Public API for the engine crate.
pub mod api;

mod backoff;
mod checkpoint;
mod formatter;
mod job;
mod pipeline;
mod queue;
mod reader;
mod reaper;
mod refresh;
mod telemetry;
mod watcher;

pub use api::{IngestEvent, WatcherConfig, WatcherHandle, start_watcher};
pub use formatter::{DefaultFormatter, Formatter};
pub use telemetry::{NoopTelemetry, StderrTelemetry, Telemetry};
