//! Job progress tracking for the WebAudit analyzer.
//!
//! Submits an audit, follows it over the push channel (WebSocket) and
//! falls back to polling the history endpoint when the channel cannot be
//! opened or drops. Either way the caller receives one ordered stream of
//! [`events::JobEvent`]s ending in exactly one terminal event.
//!
//! - [`api`] / [`client`]: HTTP and WebSocket adapters.
//! - [`machine`]: the pure per-job state machine.
//! - [`coordinator`]: the task that drives one machine.
//! - [`manager`]: the registry of running jobs.

pub mod api;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod machine;
pub mod manager;
pub mod messages;
pub mod poll;
pub mod submitter;
pub mod transport;

pub use config::{CoordinatorConfig, TrackerConfig};
pub use coordinator::{JobHandle, Transports};
pub use events::{FailureReason, JobEvent, JobState};
pub use manager::JobRegistry;
