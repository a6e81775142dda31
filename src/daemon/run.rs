//! The outer daemon loop: sleep, tick, dispatch.
//!
//! The first SIGTERM/SIGINT raises a flag that is honoured between
//! datasets — an in-flight send/receive is drained, not killed, since
//! the receive side is transactional. A second signal terminates the
//! process with the signal exit code. SIGHUP requests a reconfigure:
//! the dataset file is re-read before the next tick, sections that no
//! longer validate are disabled with the rest carrying on, and a
//! file-level fault keeps the previous configuration.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};

use crate::clock::{Clock, WallClock};
use crate::config::{self, DatasetConfig, ProcessConfig};
use crate::engine::{Engine, ShellHooks};
use crate::remote::{Probe, ReachabilityCache, TcpProbe};
use crate::zfs::ZfsCli;

use super::Scheduler;

/// Exit code used when a second signal forces termination.
pub const EXIT_SIGNALLED: i32 = 2;

#[derive(Debug, Clone, Copy, Default)]
pub struct DaemonOptions {
    /// Use `debug_sleep_time` between ticks.
    pub debug: bool,
    /// Log resident set size each tick.
    pub memory_stats: bool,
}

/// One scheduler pass: liveness touch, due walk, sequential dispatch.
/// Stops early when the shutdown flag is raised mid-walk.
pub fn tick(
    engine: &Engine<'_>,
    scheduler: &mut Scheduler,
    datasets: &[DatasetConfig],
    clock: &dyn Clock,
    probe: &dyn Probe,
    process: &ProcessConfig,
    options: &DaemonOptions,
    shutdown: &AtomicBool,
) {
    if let Some(canary) = &process.daemon_canary {
        if let Err(error) = std::fs::write(canary, format!("{}\n", clock.now())) {
            tracing::warn!(canary = %canary.display(), %error, "cannot touch canary");
        }
    }
    if process.debug_mark {
        tracing::debug!("-- MARK --");
    }
    if options.memory_stats {
        if let Some(rss_kib) = resident_set_kib() {
            tracing::info!(rss_kib, "memory");
        }
    }

    let now = clock.now();
    let mut reach = ReachabilityCache::new(probe);
    for dataset in scheduler.due(datasets, now) {
        let Some(cfg) = datasets.iter().find(|cfg| cfg.dataset == dataset) else {
            continue;
        };
        match engine.run_dataset(cfg, &mut reach) {
            Ok(outcome) if outcome.idle => {
                tracing::debug!(dataset = %dataset, "nothing to do");
            }
            Ok(outcome) => {
                tracing::debug!(
                    dataset = %dataset,
                    snapshot_taken = outcome.snapshot_taken,
                    replication = ?outcome.replication,
                    destroyed_local = outcome.destroyed_local,
                    destroyed_remote = outcome.destroyed_remote,
                    "dataset tick complete"
                );
            }
            Err(failure) => {
                tracing::error!(dataset = %dataset, step = %failure.step,
                    error = %failure.error, "dataset tick aborted");
            }
        }
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
    }
}

/// Run until the first termination signal. Never returns otherwise.
pub fn run_loop(
    process: &ProcessConfig,
    datasets: Vec<DatasetConfig>,
    options: &DaemonOptions,
) -> io::Result<()> {
    let mut datasets = datasets;
    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [SIGTERM, SIGINT] {
        // Second signal kills with the signal exit code; the first only
        // raises the flag.
        signal_hook::flag::register_conditional_shutdown(signal, EXIT_SIGNALLED, shutdown.clone())?;
        signal_hook::flag::register(signal, shutdown.clone())?;
    }
    let reload = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGHUP, reload.clone())?;

    let zfs = ZfsCli;
    let hooks = ShellHooks;
    let clock = WallClock;
    let probe = TcpProbe {
        retry_wait: process.connect_retry_wait,
        ..TcpProbe::default()
    };
    let engine = Engine::new(&zfs, &hooks, &clock).with_interrupt(&shutdown);
    let mut scheduler = Scheduler::new(&datasets, clock.now(), process.startup_hysteresis);
    let sleep = if options.debug {
        process.debug_sleep_time
    } else {
        process.sleep_time
    };
    tracing::info!(
        datasets = datasets.len(),
        sleep_secs = sleep.as_secs(),
        "daemon started"
    );

    loop {
        if sleep_interruptibly(sleep, &shutdown) {
            break;
        }
        if reload.swap(false, Ordering::Relaxed) {
            apply_reload(process, &mut datasets);
        }
        tick(
            &engine,
            &mut scheduler,
            &datasets,
            &clock,
            &probe,
            process,
            options,
            &shutdown,
        );
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
    }
    tracing::info!("daemon stopping on signal");
    Ok(())
}

/// Re-read the dataset file after SIGHUP. Invalid sections are
/// disabled one by one; a file-level fault keeps the configuration
/// already in force.
fn apply_reload(process: &ProcessConfig, datasets: &mut Vec<DatasetConfig>) {
    match config::reload_dataset_configs(process) {
        Ok(report) => {
            for (dataset, error) in &report.disabled {
                tracing::error!(dataset = %dataset, %error, "dataset disabled on reconfigure");
            }
            tracing::info!(
                datasets = report.datasets.len(),
                disabled = report.disabled.len(),
                "configuration reloaded"
            );
            *datasets = report.datasets;
        }
        Err(error) => {
            tracing::error!(%error, "reconfigure failed, keeping previous configuration");
        }
    }
}

/// Sleep in small slices so a signal is honoured promptly.
/// Returns true when the shutdown flag was raised.
fn sleep_interruptibly(total: Duration, shutdown: &AtomicBool) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        std::thread::sleep((deadline - now).min(Duration::from_millis(250)));
    }
}

/// VmRSS from /proc/self/status, if the platform provides it.
fn resident_set_kib() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    line.split_whitespace().nth(1)?.parse().ok()
}
