#![forbid(unsafe_code)]

//! zsnapd — tiered ZFS snapshot, replication and aging daemon.
//!
//! The daemon wakes on a fixed interval, walks the configured datasets in
//! configuration-file order, and for each dataset that is due runs the
//! linear sequence pre-hook → snapshot → replicate → post-hooks → clean.
//! Retention is a pure bucketed aging pass over the live snapshot list;
//! nothing is persisted between ticks.

pub mod cli;
pub mod clock;
pub mod config;
pub mod daemon;
pub mod engine;
pub mod error;
pub mod name;
pub mod planner;
pub mod rcmd;
pub mod remote;
pub mod schema;
pub mod telemetry;
pub mod trigger;
pub mod zfs;

pub use error::{ConfigError, EndpointError, Error, HookError, ZfsError};
pub type Result<T, E = Error> = std::result::Result<T, E>;
