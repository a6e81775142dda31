//! The daemon: due-time scheduling and the outer run loop.
//!
//! The scheduler is a tickable unit — give it "now", get back the
//! datasets that fire — so time-based behaviour tests run without
//! sleeping. The run loop owns the sleeping, the signal flags and the
//! dispatch into the execution engine.

mod run;
mod scheduler;

pub use run::{DaemonOptions, run_loop, tick};
pub use scheduler::Scheduler;
