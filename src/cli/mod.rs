//! Command-line surfaces for the daemon and its companion tools.
//!
//! Each binary stays thin: parse flags, load configuration, bring up
//! telemetry, hand off. Exit codes: 0 clean, 1 configuration error,
//! 2 signal-terminated, >2 unexpected fatal.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use clap::Parser;

use crate::config::{self, DatasetConfig, LoggingConfig, ProcessConfig, ReplicateConfig};
use crate::daemon::{self, DaemonOptions};
use crate::rcmd;
use crate::remote::{Probe, ReachabilityCache, TcpProbe};
use crate::telemetry::{self, DebugLevel, TelemetryGuard};
use crate::trigger;
use crate::zfs::{DatasetInfo, Zfs, ZfsCli};

pub const EXIT_OK: i32 = 0;
pub const EXIT_CONFIG: i32 = 1;
pub const EXIT_SIGNALLED: i32 = 2;
pub const EXIT_FATAL: i32 = 3;

fn parse_debug_level(s: &str) -> Result<DebugLevel, String> {
    s.parse()
}

/// Flags shared by every binary.
#[derive(Debug, clap::Args)]
pub struct CommonArgs {
    /// Process configuration file.
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Debug level.
    #[arg(
        short = 'd',
        long = "debug",
        value_name = "LEVEL",
        default_value = "none",
        value_parser = parse_debug_level
    )]
    pub debug: DebugLevel,

    /// Chattier output.
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl CommonArgs {
    fn load_process(&self) -> Result<ProcessConfig, i32> {
        config::load_process_config(self.config.as_deref()).map_err(|error| {
            eprintln!("zsnapd: {error}");
            EXIT_CONFIG
        })
    }

    fn telemetry(&self, journal: bool, logging: &LoggingConfig) -> TelemetryGuard {
        telemetry::init(telemetry::TelemetryOptions {
            debug: self.debug,
            verbose: self.verbose,
            journal,
            logging: logging.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// zsnapd
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(name = "zsnapd", version, about = "ZFS snapshot management daemon")]
pub struct DaemonCli {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Foreground mode with journal-friendly logging.
    #[arg(short = 'S', long = "systemd")]
    pub systemd: bool,

    /// Log memory usage each tick.
    #[arg(short = 'b', long = "memory-stats")]
    pub memory_stats: bool,
}

pub fn run_daemon(cli: DaemonCli) -> i32 {
    let process = match cli.common.load_process() {
        Ok(process) => process,
        Err(code) => return code,
    };
    let _guard = cli.common.telemetry(cli.systemd, &process.logging);
    if let Some(user) = &process.run_as_user {
        tracing::debug!(user = %user, "run_as_user is handled by the service manager");
    }
    let datasets = match config::load_dataset_configs(&process) {
        Ok(datasets) => datasets,
        Err(error) => {
            tracing::error!(%error, "dataset configuration invalid");
            return EXIT_CONFIG;
        }
    };
    let options = DaemonOptions {
        debug: cli.common.debug > DebugLevel::None,
        memory_stats: cli.memory_stats,
    };
    match daemon::run_loop(&process, datasets, &options) {
        Ok(()) => EXIT_SIGNALLED,
        Err(error) => {
            tracing::error!(%error, "daemon failed");
            EXIT_FATAL
        }
    }
}

// ---------------------------------------------------------------------------
// zsnapd-cfgtest
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(
    name = "zsnapd-cfgtest",
    version,
    about = "Validate the zsnapd dataset configuration"
)]
pub struct CfgtestCli {
    #[command(flatten)]
    pub common: CommonArgs,
}

pub fn run_cfgtest(cli: CfgtestCli) -> i32 {
    let process = match cli.common.load_process() {
        Ok(process) => process,
        Err(code) => return code,
    };
    let _guard = cli.common.telemetry(false, &process.logging);
    match config::load_dataset_configs(&process) {
        Ok(datasets) => {
            for dataset in &datasets {
                match serde_json::to_string(dataset) {
                    Ok(merged) => tracing::debug!(dataset = %dataset.dataset, %merged, "resolved"),
                    Err(error) => tracing::debug!(dataset = %dataset.dataset, %error, "resolved"),
                }
            }
            tracing::info!(datasets = datasets.len(), "dataset configuration valid");
            EXIT_OK
        }
        Err(error) => {
            tracing::error!(%error, "dataset configuration invalid");
            eprintln!("zsnapd-cfgtest: {error}");
            EXIT_CONFIG
        }
    }
}

// ---------------------------------------------------------------------------
// zsnapd-trigger
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(
    name = "zsnapd-trigger",
    version,
    about = "Write .trigger files for trigger-timed datasets"
)]
pub struct TriggerCli {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Probe the replication endpoint before writing a trigger.
    #[arg(short = 'r', long = "reachable")]
    pub reachable: bool,

    /// Select every dataset flagged with do_trigger.
    #[arg(short = 't', long = "do-trigger")]
    pub do_trigger: bool,

    /// Datasets or mountpoints to trigger.
    #[arg(value_name = "DATASET|MOUNTPOINT")]
    pub operands: Vec<String>,
}

pub fn run_trigger(cli: TriggerCli) -> i32 {
    let process = match cli.common.load_process() {
        Ok(process) => process,
        Err(code) => return code,
    };
    let _guard = cli.common.telemetry(false, &process.logging);
    let datasets = match config::load_dataset_configs(&process) {
        Ok(datasets) => datasets,
        Err(error) => {
            tracing::error!(%error, "dataset configuration invalid");
            return EXIT_CONFIG;
        }
    };
    let zfs = ZfsCli;
    let existing = match zfs.list_datasets(&crate::remote::Endpoint::local(), false) {
        Ok(existing) => existing,
        Err(error) => {
            tracing::error!(%error, "cannot list datasets");
            return EXIT_FATAL;
        }
    };
    let candidates = match resolve_trigger_candidates(
        &datasets,
        &existing,
        cli.do_trigger,
        &cli.operands,
    ) {
        Ok(candidates) => candidates,
        Err(reason) => {
            tracing::error!("{reason}");
            return EXIT_CONFIG;
        }
    };
    let probe = TcpProbe {
        retry_wait: process.connect_retry_wait,
        ..TcpProbe::default()
    };
    if touch_triggers(&candidates, &probe, cli.reachable) {
        EXIT_OK
    } else {
        EXIT_CONFIG
    }
}

/// Work out which datasets the operands select. Mountpoint operands
/// resolve through trigger-timed datasets; name operands must be
/// configured and present on the system.
fn resolve_trigger_candidates<'a>(
    datasets: &'a [DatasetConfig],
    existing: &[DatasetInfo],
    do_trigger: bool,
    operands: &[String],
) -> Result<Vec<&'a DatasetConfig>, String> {
    let by_name: HashMap<&str, &DatasetConfig> = datasets
        .iter()
        .map(|cfg| (cfg.dataset.as_str(), cfg))
        .collect();
    let by_mountpoint: HashMap<&Path, &DatasetConfig> = datasets
        .iter()
        .filter(|cfg| cfg.when.is_trigger())
        .filter_map(|cfg| cfg.mountpoint.as_deref().map(|m| (m, cfg)))
        .collect();

    let mut selected: Vec<&DatasetConfig> = Vec::new();
    for operand in operands {
        let operand = if operand.len() > 1 {
            operand.trim_end_matches('/')
        } else {
            operand.as_str()
        };
        if operand.starts_with('/') {
            let Some(cfg) = by_mountpoint.get(Path::new(operand)) else {
                return Err(format!("trigger mount '{operand}' is not configured"));
            };
            selected.push(cfg);
        } else {
            let Some(cfg) = by_name.get(operand) else {
                return Err(format!("dataset '{operand}' is not configured"));
            };
            if !existing.iter().any(|d| d.name == operand) {
                return Err(format!("dataset '{operand}' does not exist"));
            }
            selected.push(cfg);
        }
    }

    if do_trigger && selected.is_empty() {
        selected = datasets.iter().filter(|cfg| cfg.do_trigger).collect();
    } else if do_trigger {
        selected.retain(|cfg| {
            if !cfg.do_trigger {
                tracing::info!(dataset = %cfg.dataset, "do_trigger not set, skipping");
            }
            cfg.do_trigger
        });
    }
    if selected.is_empty() {
        return Err("no datasets configured for triggers or given on the command line".to_string());
    }
    Ok(selected)
}

/// Write trigger files for the candidates. Returns overall success.
fn touch_triggers(candidates: &[&DatasetConfig], probe: &dyn Probe, reachable: bool) -> bool {
    let mut reach = ReachabilityCache::new(probe);
    let mut ok = true;
    for cfg in candidates {
        if !cfg.when.is_trigger() {
            tracing::info!(dataset = %cfg.dataset, "not trigger-timed, skipping");
            continue;
        }
        let Some(mountpoint) = cfg.mountpoint.as_deref() else {
            tracing::info!(dataset = %cfg.dataset, "no mountpoint, skipping");
            continue;
        };
        if reachable {
            if let Some(ReplicateConfig { endpoint, .. }) = &cfg.replicate {
                if let Err(error) = reach.check(&endpoint.to_endpoint()) {
                    tracing::info!(dataset = %cfg.dataset, %error, "skipping");
                    ok = false;
                    continue;
                }
            }
        }
        if trigger::is_pending(Some(mountpoint)) {
            tracing::debug!(dataset = %cfg.dataset, "trigger already pending");
            continue;
        }
        match trigger::write(mountpoint) {
            Ok(()) => tracing::info!(dataset = %cfg.dataset, "trigger written"),
            Err(error) => {
                tracing::error!(dataset = %cfg.dataset, %error, "cannot write trigger");
                ok = false;
            }
        }
    }
    ok
}

// ---------------------------------------------------------------------------
// zsnapd-rcmd
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(
    name = "zsnapd-rcmd",
    version,
    about = "SSH forced-command filter for zsnapd replication logins"
)]
pub struct RcmdCli {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Validate and match only; exit before executing the command.
    #[arg(short = 't', long = "testing")]
    pub testing: bool,
}

pub fn run_rcmd(cli: RcmdCli) -> i32 {
    let process = match cli.common.load_process() {
        Ok(process) => process,
        Err(code) => return code,
    };
    let _guard = cli.common.telemetry(true, &process.logging);
    rcmd::run(&process.rcmd, cli.testing)
}

#[cfg(test)]
mod tests {
    use crate::config::FireSpec;
    use crate::schema::Schema;

    use super::*;

    fn dataset(name: &str, trigger_mount: Option<&str>, do_trigger: bool) -> DatasetConfig {
        DatasetConfig {
            dataset: name.to_string(),
            mountpoint: trigger_mount.map(PathBuf::from),
            when: if trigger_mount.is_some() {
                FireSpec::Trigger
            } else {
                FireSpec::Times(vec![])
            },
            snapshot: true,
            do_trigger,
            schema: "7d".parse::<Schema>().unwrap(),
            local_schema: None,
            clean_all: false,
            local_clean_all: false,
            all_snapshots: true,
            preexec: None,
            postexec: None,
            replicate_postexec: None,
            log_commands: false,
            replicate: None,
        }
    }

    fn existing(names: &[&str]) -> Vec<DatasetInfo> {
        names
            .iter()
            .map(|name| DatasetInfo {
                name: name.to_string(),
                mountpoint: None,
            })
            .collect()
    }

    #[test]
    fn resolves_dataset_and_mountpoint_operands() {
        let datasets = vec![
            dataset("zpool/a", Some("/srv/a"), false),
            dataset("zpool/b", None, false),
        ];
        let found = resolve_trigger_candidates(
            &datasets,
            &existing(&["zpool/a", "zpool/b"]),
            false,
            &["/srv/a/".to_string(), "zpool/b".to_string()],
        )
        .unwrap();
        let names: Vec<_> = found.iter().map(|cfg| cfg.dataset.as_str()).collect();
        assert_eq!(names, vec!["zpool/a", "zpool/b"]);
    }

    #[test]
    fn unknown_operands_are_errors() {
        let datasets = vec![dataset("zpool/a", Some("/srv/a"), false)];
        assert!(
            resolve_trigger_candidates(
                &datasets,
                &existing(&["zpool/a"]),
                false,
                &["/srv/other".to_string()],
            )
            .is_err()
        );
        assert!(
            resolve_trigger_candidates(
                &datasets,
                &existing(&["zpool/a"]),
                false,
                &["zpool/missing".to_string()],
            )
            .is_err()
        );
        // Configured but absent from the system.
        assert!(
            resolve_trigger_candidates(&datasets, &existing(&[]), false,
                &["zpool/a".to_string()])
                .is_err()
        );
    }

    #[test]
    fn do_trigger_selects_flagged_datasets() {
        let datasets = vec![
            dataset("zpool/a", Some("/srv/a"), true),
            dataset("zpool/b", Some("/srv/b"), false),
        ];
        let found =
            resolve_trigger_candidates(&datasets, &existing(&["zpool/a", "zpool/b"]), true, &[])
                .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].dataset, "zpool/a");
    }

    #[test]
    fn no_selection_is_an_error() {
        let datasets = vec![dataset("zpool/a", Some("/srv/a"), false)];
        assert!(resolve_trigger_candidates(&datasets, &existing(&["zpool/a"]), false, &[]).is_err());
        assert!(resolve_trigger_candidates(&datasets, &existing(&["zpool/a"]), true, &[]).is_err());
    }
}
