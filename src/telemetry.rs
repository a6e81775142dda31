//! Logging setup.
//!
//! Structured records go to stderr (plain compact form under `-S` so
//! the journal can capture them) and optionally to a rotating log file
//! with count/age retention. The debug level maps to the tracing
//! filter; `ZSNAPD_LOG` overrides it with a full filter expression.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, SystemTime};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum DebugLevel {
    #[default]
    None,
    Normal,
    Verbose,
    Extreme,
}

impl DebugLevel {
    /// Warnings only by default; `-v` raises the quiet level to INFO,
    /// the debug levels override it entirely.
    fn filter(self, verbose: bool) -> tracing::metadata::LevelFilter {
        use tracing::metadata::LevelFilter;
        match self {
            DebugLevel::None if verbose => LevelFilter::INFO,
            DebugLevel::None => LevelFilter::WARN,
            DebugLevel::Normal => LevelFilter::DEBUG,
            DebugLevel::Verbose | DebugLevel::Extreme => LevelFilter::TRACE,
        }
    }
}

impl FromStr for DebugLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0" | "none" => Ok(DebugLevel::None),
            "1" | "normal" => Ok(DebugLevel::Normal),
            "2" | "verbose" => Ok(DebugLevel::Verbose),
            "3" | "extreme" => Ok(DebugLevel::Extreme),
            _ => Err(format!(
                "'{s}' is not a debug level (0|1|2|3|none|normal|verbose|extreme)"
            )),
        }
    }
}

impl fmt::Display for DebugLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DebugLevel::None => "none",
            DebugLevel::Normal => "normal",
            DebugLevel::Verbose => "verbose",
            DebugLevel::Extreme => "extreme",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Debug)]
pub struct TelemetryOptions {
    pub debug: DebugLevel,
    pub verbose: bool,
    /// Journal-friendly stderr: compact, no ANSI, no timestamps.
    pub journal: bool,
    pub logging: LoggingConfig,
}

pub struct TelemetryGuard {
    _guards: Vec<tracing_appender::non_blocking::WorkerGuard>,
}

pub fn init(options: TelemetryOptions) -> TelemetryGuard {
    let filter = EnvFilter::builder()
        .with_default_directive(options.debug.filter(options.verbose).into())
        .with_env_var("ZSNAPD_LOG")
        .from_env_lossy();

    let mut guards = Vec::new();
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if options.journal {
        layers.push(Box::new(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .without_time()
                .with_target(false),
        ));
    } else {
        layers.push(Box::new(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_target(false),
        ));
    }

    let mut file_error = None;
    if let Some(log_file) = &options.logging.log_file {
        match build_file_layer(log_file, &options.logging) {
            Ok((layer, guard)) => {
                layers.push(layer);
                guards.push(guard);
            }
            Err(error) => file_error = Some(error),
        }
    }

    layers.push(Box::new(filter));
    Registry::default().with(layers).init();

    if let Some(error) = file_error {
        tracing::warn!("{error}");
    }
    TelemetryGuard { _guards: guards }
}

type FileLayer = (
    Box<dyn Layer<Registry> + Send + Sync>,
    tracing_appender::non_blocking::WorkerGuard,
);

fn build_file_layer(log_file: &Path, logging: &LoggingConfig) -> Result<FileLayer, String> {
    let dir = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| format!("log file '{}' has no parent directory", log_file.display()))?;
    let prefix = log_file
        .file_name()
        .ok_or_else(|| format!("log file '{}' has no file name", log_file.display()))?;
    fs::create_dir_all(dir)
        .map_err(|e| format!("cannot create log dir {}: {e}", dir.display()))?;

    let retention = RetentionLimits {
        max_files: Some(logging.backup_count),
        max_age: logging
            .max_age_days
            .map(|days| Duration::from_secs(days.saturating_mul(24 * 60 * 60))),
    };
    if let Err(e) = prune_logs(dir, &prefix.to_string_lossy(), retention, SystemTime::now()) {
        return Err(format!("log retention failed: {e}"));
    }

    let appender = tracing_appender::rolling::RollingFileAppender::new(
        tracing_appender::rolling::Rotation::DAILY,
        dir,
        prefix.to_string_lossy().into_owned(),
    );
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer: Box<dyn Layer<Registry> + Send + Sync> = Box::new(
        tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(false),
    );
    Ok((layer, guard))
}

#[derive(Clone, Copy, Debug, Default)]
struct RetentionLimits {
    max_age: Option<Duration>,
    max_files: Option<usize>,
}

#[derive(Clone, Debug)]
struct LogEntry {
    path: PathBuf,
    modified: SystemTime,
}

fn prune_logs(
    dir: &Path,
    prefix: &str,
    retention: RetentionLimits,
    now: SystemTime,
) -> std::io::Result<()> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !file_name.starts_with(prefix) {
            continue;
        }
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        entries.push(LogEntry {
            path,
            modified: meta.modified().unwrap_or(now),
        });
    }
    for path in select_prunable(&mut entries, retention, now) {
        let _ = fs::remove_file(path);
    }
    Ok(())
}

fn select_prunable(
    entries: &mut Vec<LogEntry>,
    retention: RetentionLimits,
    now: SystemTime,
) -> Vec<PathBuf> {
    let mut removed = Vec::new();
    if let Some(max_age) = retention.max_age {
        let mut keep = Vec::new();
        for entry in entries.drain(..) {
            let age = now
                .duration_since(entry.modified)
                .unwrap_or(Duration::ZERO);
            if age > max_age {
                removed.push(entry.path);
            } else {
                keep.push(entry);
            }
        }
        *entries = keep;
    }
    if let Some(max_files) = retention.max_files {
        entries.sort_by_key(|entry| entry.modified);
        if entries.len() > max_files {
            let excess = entries.len() - max_files;
            for entry in entries.drain(..excess) {
                removed.push(entry.path);
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_levels_parse_both_spellings() {
        assert_eq!("0".parse::<DebugLevel>().unwrap(), DebugLevel::None);
        assert_eq!("none".parse::<DebugLevel>().unwrap(), DebugLevel::None);
        assert_eq!("2".parse::<DebugLevel>().unwrap(), DebugLevel::Verbose);
        assert_eq!("extreme".parse::<DebugLevel>().unwrap(), DebugLevel::Extreme);
        assert!("4".parse::<DebugLevel>().is_err());
    }

    #[test]
    fn verbose_raises_the_quiet_level_only() {
        use tracing::metadata::LevelFilter;
        assert_eq!(DebugLevel::None.filter(false), LevelFilter::WARN);
        assert_eq!(DebugLevel::None.filter(true), LevelFilter::INFO);
        assert_eq!(DebugLevel::Normal.filter(true), LevelFilter::DEBUG);
        assert_eq!(DebugLevel::Extreme.filter(false), LevelFilter::TRACE);
    }

    #[test]
    fn prune_respects_age_and_count() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(100_000);
        let mut entries = vec![
            LogEntry {
                path: PathBuf::from("zsnapd.log.1"),
                modified: now - Duration::from_secs(90_000),
            },
            LogEntry {
                path: PathBuf::from("zsnapd.log.2"),
                modified: now - Duration::from_secs(5_000),
            },
            LogEntry {
                path: PathBuf::from("zsnapd.log.3"),
                modified: now - Duration::from_secs(600),
            },
            LogEntry {
                path: PathBuf::from("zsnapd.log.4"),
                modified: now - Duration::from_secs(60),
            },
        ];
        let retention = RetentionLimits {
            max_age: Some(Duration::from_secs(10_000)),
            max_files: Some(2),
        };
        let removed = select_prunable(&mut entries, retention, now);
        assert!(removed.contains(&PathBuf::from("zsnapd.log.1")));
        assert!(removed.contains(&PathBuf::from("zsnapd.log.2")));
        assert_eq!(entries.len(), 2);
    }
}
