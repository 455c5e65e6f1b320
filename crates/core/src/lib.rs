//! Domain types shared by the WebAudit job tracker.
//!
//! Holds the job model, target validation, normalized progress events
//! and the display-percent rules. Nothing here performs I/O.

pub mod error;
pub mod job;
pub mod progress;
pub mod target;
pub mod types;
