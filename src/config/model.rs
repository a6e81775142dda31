//! Typed configuration model.
//!
//! Raw INI sections are merged (DEFAULT → template → section) and then
//! resolved into these structs at load time; nothing re-reads the INI
//! at runtime. Unknown keys are errors, not silent ignores.

use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveTime;
use serde::Serialize;

use crate::remote::{DEFAULT_COMMAND, DEFAULT_LOGIN, DEFAULT_PORT, Endpoint};
use crate::schema::Schema;

pub const TRIGGER_SPEC: &str = "trigger";

/// When a dataset fires: at wall-clock times, or when a `.trigger`
/// file shows up under its mountpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FireSpec {
    Trigger,
    /// Sorted, deduplicated occurrences within a day.
    Times(Vec<NaiveTime>),
}

impl FireSpec {
    pub fn is_trigger(&self) -> bool {
        matches!(self, FireSpec::Trigger)
    }
}

/// Replication direction, relative to the host running the tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Send local snapshots to this remote dataset.
    Push { target: String },
    /// Receive snapshots from this remote dataset.
    Pull { source: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointConfig {
    pub host: Option<String>,
    pub port: u16,
    pub login: String,
    pub command: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_PORT,
            login: DEFAULT_LOGIN.to_string(),
            command: DEFAULT_COMMAND.to_string(),
        }
    }
}

impl EndpointConfig {
    pub fn to_endpoint(&self) -> Endpoint {
        match &self.host {
            None => Endpoint::local(),
            Some(host) => Endpoint::remote(host, self.port, &self.login, &self.command),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplicateConfig {
    pub direction: Direction,
    pub endpoint: EndpointConfig,
    /// Compression tool piped as `tool -c` / `tool -d` around the wire.
    pub compression: Option<String>,
    /// mbuffer size on each side of the network hop.
    pub buffer_size: String,
}

pub const DEFAULT_BUFFER_SIZE: &str = "512M";

/// Fully resolved per-dataset configuration, immutable for the life of
/// the daemon (or until an explicit reconfigure).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetConfig {
    pub dataset: String,
    pub mountpoint: Option<PathBuf>,
    pub when: FireSpec,
    pub snapshot: bool,
    /// Candidate for `zsnapd-trigger --do-trigger`.
    pub do_trigger: bool,
    pub schema: Schema,
    /// Retention for the receiving side; target for push, this host
    /// for pull.
    pub local_schema: Option<Schema>,
    pub clean_all: bool,
    pub local_clean_all: bool,
    /// Stream every snapshot rather than only managed-named ones.
    pub all_snapshots: bool,
    pub preexec: Option<String>,
    pub postexec: Option<String>,
    pub replicate_postexec: Option<String>,
    pub log_commands: bool,
    pub replicate: Option<ReplicateConfig>,
}

impl DatasetConfig {
    /// Inert datasets (no snapshotting, no replication, empty schema)
    /// are skipped by the scheduler.
    pub fn is_active(&self) -> bool {
        self.snapshot || self.replicate.is_some() || !self.schema.is_empty()
    }

    pub fn is_pull(&self) -> bool {
        matches!(
            self.replicate,
            Some(ReplicateConfig {
                direction: Direction::Pull { .. },
                ..
            })
        )
    }
}

/// Logging keys from the process file.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_file: Option<PathBuf>,
    pub backup_count: usize,
    pub max_age_days: Option<u64>,
    /// Parsed for compatibility; the syslog sink itself is provided by
    /// the platform service manager.
    pub syslog_facility: Option<String>,
}

impl LoggingConfig {
    pub fn new() -> Self {
        Self {
            log_file: None,
            backup_count: 10,
            max_age_days: None,
            syslog_facility: None,
        }
    }
}

/// `[zsnapd-rcmd]` section: the SSH ForceCommand filter.
#[derive(Debug, Clone)]
pub struct RcmdConfig {
    pub rshell: String,
    pub rshell_path: String,
    pub require_anchor_start: bool,
    pub forbid_wildcard: bool,
    pub require_anchor_end: bool,
    /// (key, pattern) pairs in file order; empty patterns are skipped.
    pub patterns: Vec<(String, String)>,
}

impl Default for RcmdConfig {
    fn default() -> Self {
        Self {
            rshell: "/bin/rbash".to_string(),
            rshell_path: "/usr/local/bin:/usr/bin:/bin:/usr/local/sbin:/usr/sbin:/sbin"
                .to_string(),
            require_anchor_start: true,
            forbid_wildcard: true,
            require_anchor_end: true,
            patterns: Vec::new(),
        }
    }
}

/// The `[zsnapd]` section of the process file plus tool sections.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub sleep_time: Duration,
    pub debug_sleep_time: Duration,
    pub startup_hysteresis: Duration,
    pub connect_retry_wait: Duration,
    pub dataset_config_file: PathBuf,
    pub dataset_config_dir: PathBuf,
    pub template_config_file: PathBuf,
    pub template_config_dir: PathBuf,
    /// File touched at every tick as a liveness probe.
    pub daemon_canary: Option<PathBuf>,
    /// Log a `-- MARK --` line each tick at DEBUG.
    pub debug_mark: bool,
    /// Informational; privilege dropping belongs to the service manager.
    pub run_as_user: Option<String>,
    pub logging: LoggingConfig,
    pub rcmd: RcmdConfig,
}

pub const CONFIG_DIR: &str = "/etc/zsnapd";
pub const LEGACY_DATASET_CONFIG: &str = "/etc/zfssnapmanager.cfg";

impl Default for ProcessConfig {
    fn default() -> Self {
        let dir = PathBuf::from(CONFIG_DIR);
        Self {
            sleep_time: Duration::from_secs(300),
            debug_sleep_time: Duration::from_secs(15),
            startup_hysteresis: Duration::from_secs(15),
            connect_retry_wait: Duration::from_secs(3),
            dataset_config_file: dir.join("dataset.conf"),
            dataset_config_dir: dir.join("dataset.conf.d"),
            template_config_file: dir.join("template.conf"),
            template_config_dir: dir.join("template.conf.d"),
            daemon_canary: None,
            debug_mark: false,
            run_as_user: None,
            logging: LoggingConfig::new(),
            rcmd: RcmdConfig::default(),
        }
    }
}
