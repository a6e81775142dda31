use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use chrono::{NaiveTime, Timelike};
use ini::Ini;
use regex::Regex;

use crate::error::ConfigError;
use crate::schema::Schema;

use super::model::{
    DEFAULT_BUFFER_SIZE, DatasetConfig, Direction, EndpointConfig, FireSpec, LEGACY_DATASET_CONFIG,
    ProcessConfig, RcmdConfig, ReplicateConfig, TRIGGER_SPEC,
};

static DATASET_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-_:.a-zA-Z0-9][-_:./a-zA-Z0-9]*$").expect("static regex"));
static DATASET_RESERVED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(log|DEFAULT|(c[0-9]|log/|mirror|raidz|raidz1|raidz2|raidz3|spare).*)$")
        .expect("static regex")
});
static TEMPLATE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9][-_:.a-zA-Z0-9]*$").expect("static regex"));
static HOST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-zA-Z\[][-_.:a-zA-Z0-9\]]*$").expect("static regex"));
static LOGIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z][-_.a-zA-Z0-9]*$").expect("static regex"));
static MOUNTPOINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(None|none|legacy|/|/[-_./ ~a-zA-Z0-9]+)$").expect("static regex"));
static SHELL_COMMAND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^[-_./~a-zA-Z0-9 \t:@|=$"']+$"#).expect("static regex"));
static COMMAND_TEMPLATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-_./~a-zA-Z0-9 \t:@|{}]+$").expect("static regex"));
static COMPRESSION_TOOL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-_./ ~a-zA-Z0-9]+$").expect("static regex"));
static BUFFER_SIZE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{1,12}[kMG]$").expect("static regex"));

const DATASET_KEYS: &[&str] = &[
    "mountpoint",
    "time",
    "snapshot",
    "do_trigger",
    "schema",
    "local_schema",
    "clean_all",
    "local_clean_all",
    "all_snapshots",
    "preexec",
    "postexec",
    "replicate_postexec",
    "log_commands",
    "template",
    "replicate_target",
    "replicate_source",
    "replicate_endpoint",
    "replicate_endpoint_host",
    "replicate_endpoint_port",
    "replicate_endpoint_login",
    "replicate_endpoint_command",
    "compression",
    "buffer_size",
];

const TEMPLATE_PLACEHOLDER: &str = "{template}";

type Section = HashMap<String, String>;

/// Ordered section name → merged key/value pairs, collected across the
/// main file and its drop-in directory (later files override per key).
#[derive(Debug, Default)]
struct IniStack {
    order: Vec<String>,
    sections: HashMap<String, Section>,
    defaults: Section,
}

impl IniStack {
    fn absorb(&mut self, ini: &Ini) {
        for (section, properties) in ini.iter() {
            let Some(name) = section else {
                continue;
            };
            let pairs = properties
                .iter()
                .map(|(k, v)| (k.to_string(), v.trim().to_string()));
            if name == "DEFAULT" {
                self.defaults.extend(pairs);
                continue;
            }
            if !self.sections.contains_key(name) {
                self.order.push(name.to_string());
            }
            self.sections.entry(name.to_string()).or_default().extend(pairs);
        }
    }
}

fn read_ini(path: &Path) -> Result<Ini, ConfigError> {
    // Values are taken verbatim: escape/quote processing would mangle
    // the rcmd regex patterns and shell commands.
    let options = ini::ParseOption {
        enabled_quote: false,
        enabled_escape: false,
        enabled_indented_mutiline_value: false,
        enabled_preserve_key_leading_whitespace: false,
    };
    Ini::load_from_file_opt(path, options).map_err(|error| match error {
        ini::Error::Io(source) => ConfigError::Io {
            path: path.to_path_buf(),
            source,
        },
        ini::Error::Parse(parse) => ConfigError::Parse {
            path: path.to_path_buf(),
            reason: parse.to_string(),
        },
    })
}

/// Load a config file plus its drop-in directory (sorted file order).
fn read_stack(file: &Path, dir: &Path) -> Result<IniStack, ConfigError> {
    let mut stack = IniStack::default();
    if file.exists() {
        stack.absorb(&read_ini(file)?);
    }
    if dir.is_dir() {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(|source| ConfigError::Io {
                path: dir.to_path_buf(),
                source,
            })?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        entries.sort();
        for entry in entries {
            stack.absorb(&read_ini(&entry)?);
        }
    }
    Ok(stack)
}

/// The dataset file path, honouring the legacy location when the
/// configured one is absent.
pub fn dataset_config_path(process: &ProcessConfig) -> PathBuf {
    if process.dataset_config_file.exists() {
        return process.dataset_config_file.clone();
    }
    let legacy = PathBuf::from(LEGACY_DATASET_CONFIG);
    if legacy.exists() {
        return legacy;
    }
    process.dataset_config_file.clone()
}

// ---------------------------------------------------------------------------
// Value parsers
// ---------------------------------------------------------------------------

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn parse_bool(section: &str, key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "on" | "1" => Ok(true),
        "false" | "off" | "0" => Ok(false),
        _ => Err(invalid(
            section,
            key,
            format!("'{value}' is not a boolean (true/false/on/off/1/0)"),
        )),
    }
}

fn parse_seconds(section: &str, key: &str, value: &str) -> Result<Duration, ConfigError> {
    value
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| invalid(section, key, format!("'{value}' is not a number of seconds")))
}

fn parse_hhmm(entry: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(entry.trim(), "%H:%M")
        .map_err(|_| format!("'{entry}' is not a HH:MM time"))
}

fn time_from_seconds(seconds: u32) -> Option<NaiveTime> {
    NaiveTime::from_num_seconds_from_midnight_opt(seconds, 0)
}

/// One time entry: `HH:MM` or a range `HH:MM-HH:MM[/STEP]` where STEP
/// is hours (`4`) or `HH:MM`; ranges expand inclusive of both ends.
fn expand_time_entry(entry: &str, into: &mut Vec<NaiveTime>) -> Result<(), String> {
    let entry = entry.trim();
    let Some((start, rest)) = entry.split_once('-') else {
        into.push(parse_hhmm(entry)?);
        return Ok(());
    };
    let (stop, step) = match rest.split_once('/') {
        Some((stop, step)) => (stop, Some(step.trim())),
        None => (rest, None),
    };
    let start = parse_hhmm(start)?;
    let stop = parse_hhmm(stop)?;
    if stop < start {
        return Err(format!("'{entry}': range end is before its start"));
    }
    let step_seconds = match step {
        None => 3600,
        Some(step) => {
            let seconds = if step.contains(':') {
                parse_hhmm(step)?.num_seconds_from_midnight()
            } else {
                step.parse::<u32>()
                    .map_err(|_| format!("'{step}' is not a step in hours"))?
                    .saturating_mul(3600)
            };
            if seconds == 0 {
                return Err(format!("'{entry}': step must be nonzero"));
            }
            seconds
        }
    };
    let stop_seconds = stop.num_seconds_from_midnight();
    let mut cursor = start.num_seconds_from_midnight();
    while cursor < stop_seconds {
        if let Some(t) = time_from_seconds(cursor) {
            into.push(t);
        }
        cursor = cursor.saturating_add(step_seconds);
    }
    if let Some(t) = time_from_seconds(stop_seconds) {
        into.push(t);
    }
    Ok(())
}

/// Parse a `time` value: `trigger`, or a comma list of times and ranges.
pub fn parse_fire_spec(value: &str) -> Result<FireSpec, String> {
    let value = value.trim();
    if value == TRIGGER_SPEC {
        return Ok(FireSpec::Trigger);
    }
    let mut times = Vec::new();
    for entry in value.split(',') {
        if entry.trim() == TRIGGER_SPEC {
            return Err("'trigger' cannot be combined with clock times".to_string());
        }
        expand_time_entry(entry, &mut times)?;
    }
    if times.is_empty() {
        return Err("no firing times given".to_string());
    }
    times.sort();
    times.dedup();
    Ok(FireSpec::Times(times))
}

// ---------------------------------------------------------------------------
// Dataset configuration
// ---------------------------------------------------------------------------

fn check_known_keys(section_name: &str, section: &Section) -> Result<(), ConfigError> {
    for key in section.keys() {
        if !DATASET_KEYS.contains(&key.as_str()) {
            return Err(ConfigError::UnknownKey {
                section: section_name.to_string(),
                key: key.clone(),
            });
        }
    }
    Ok(())
}

fn check_dataset_name(section: &str) -> Result<(), ConfigError> {
    if DATASET_NAME.is_match(section) && !DATASET_RESERVED.is_match(section) {
        Ok(())
    } else {
        Err(ConfigError::BadDatasetName {
            section: section.to_string(),
        })
    }
}

fn checked(
    section: &str,
    key: &str,
    value: Option<&String>,
    pattern: &Regex,
    what: &str,
) -> Result<Option<String>, ConfigError> {
    match value {
        None => Ok(None),
        Some(value) if pattern.is_match(value) => Ok(Some(value.clone())),
        Some(value) => Err(invalid(section, key, format!("'{value}' is not {what}"))),
    }
}

fn parse_schema_value(
    section: &str,
    key: &str,
    value: &str,
) -> Result<Schema, ConfigError> {
    value
        .parse::<Schema>()
        .map_err(|e| invalid(section, key, e.to_string()))
}

fn get_bool(
    section: &str,
    merged: &Section,
    key: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    match merged.get(key) {
        None => Ok(default),
        Some(value) => parse_bool(section, key, value),
    }
}

fn parse_replication(
    section: &str,
    merged: &Section,
) -> Result<Option<ReplicateConfig>, ConfigError> {
    if merged.contains_key("replicate_endpoint") {
        return Err(invalid(
            section,
            "replicate_endpoint",
            "deprecated; use replicate_endpoint_host, replicate_endpoint_port \
             and replicate_endpoint_command",
        ));
    }
    let target = merged.get("replicate_target");
    let source = merged.get("replicate_source");
    let direction = match (target, source) {
        (Some(_), Some(_)) => {
            return Err(ConfigError::Exclusive {
                section: section.to_string(),
                first: "replicate_target",
                second: "replicate_source",
            });
        }
        (Some(target), None) => Direction::Push {
            target: target.clone(),
        },
        (None, Some(source)) => Direction::Pull {
            source: source.clone(),
        },
        (None, None) => {
            for key in [
                "replicate_endpoint_host",
                "replicate_endpoint_port",
                "replicate_endpoint_login",
                "replicate_endpoint_command",
                "compression",
                "buffer_size",
            ] {
                if merged.contains_key(key) {
                    return Err(invalid(
                        section,
                        key,
                        "replication option without replicate_target or replicate_source",
                    ));
                }
            }
            return Ok(None);
        }
    };
    let peer = match &direction {
        Direction::Push { target } => target,
        Direction::Pull { source } => source,
    };
    if !DATASET_NAME.is_match(peer) || DATASET_RESERVED.is_match(peer) {
        let key = match direction {
            Direction::Push { .. } => "replicate_target",
            Direction::Pull { .. } => "replicate_source",
        };
        return Err(invalid(section, key, format!("'{peer}' is not a dataset name")));
    }

    let host = checked(
        section,
        "replicate_endpoint_host",
        merged.get("replicate_endpoint_host"),
        &HOST,
        "a hostname",
    )?;
    let port = match merged.get("replicate_endpoint_port") {
        None => EndpointConfig::default().port,
        Some(value) => value.parse::<u16>().map_err(|_| {
            invalid(
                section,
                "replicate_endpoint_port",
                format!("'{value}' is not a port"),
            )
        })?,
    };
    let login = checked(
        section,
        "replicate_endpoint_login",
        merged.get("replicate_endpoint_login"),
        &LOGIN,
        "a login name",
    )?
    .unwrap_or_else(|| EndpointConfig::default().login);
    let command = checked(
        section,
        "replicate_endpoint_command",
        merged.get("replicate_endpoint_command"),
        &COMMAND_TEMPLATE,
        "a command template",
    )?
    .unwrap_or_else(|| EndpointConfig::default().command);
    let compression = checked(
        section,
        "compression",
        merged.get("compression"),
        &COMPRESSION_TOOL,
        "a compression tool",
    )?;
    let buffer_size = checked(
        section,
        "buffer_size",
        merged.get("buffer_size"),
        &BUFFER_SIZE,
        "a buffer size like 512M",
    )?
    .unwrap_or_else(|| DEFAULT_BUFFER_SIZE.to_string());

    Ok(Some(ReplicateConfig {
        direction,
        endpoint: EndpointConfig {
            host,
            port,
            login,
            command,
        },
        compression,
        buffer_size,
    }))
}

fn parse_dataset(section: &str, merged: &Section) -> Result<DatasetConfig, ConfigError> {
    let time = merged
        .get("time")
        .ok_or_else(|| invalid(section, "time", "required option is missing"))?;
    let when = parse_fire_spec(time).map_err(|reason| invalid(section, "time", reason))?;

    let snapshot = merged
        .get("snapshot")
        .ok_or_else(|| invalid(section, "snapshot", "required option is missing"))
        .and_then(|value| parse_bool(section, "snapshot", value))?;

    let schema = merged
        .get("schema")
        .ok_or_else(|| invalid(section, "schema", "required option is missing"))
        .and_then(|value| parse_schema_value(section, "schema", value))?;
    let local_schema = merged
        .get("local_schema")
        .map(|value| parse_schema_value(section, "local_schema", value))
        .transpose()?;

    let mountpoint = match checked(
        section,
        "mountpoint",
        merged.get("mountpoint"),
        &MOUNTPOINT,
        "a mountpoint path or None",
    )? {
        None => None,
        Some(value) if matches!(value.as_str(), "None" | "none" | "legacy") => None,
        Some(value) => Some(PathBuf::from(value)),
    };

    let hook = |key: &str| {
        checked(section, key, merged.get(key), &SHELL_COMMAND, "a shell command")
    };

    Ok(DatasetConfig {
        dataset: section.to_string(),
        mountpoint,
        when,
        snapshot,
        do_trigger: get_bool(section, merged, "do_trigger", false)?,
        schema,
        local_schema,
        clean_all: get_bool(section, merged, "clean_all", false)?,
        local_clean_all: get_bool(section, merged, "local_clean_all", false)?,
        all_snapshots: get_bool(section, merged, "all_snapshots", true)?,
        preexec: hook("preexec")?,
        postexec: hook("postexec")?,
        replicate_postexec: hook("replicate_postexec")?,
        log_commands: get_bool(section, merged, "log_commands", false)?,
        replicate: parse_replication(section, merged)?,
    })
}

fn load_templates(
    file: &Path,
    dir: &Path,
) -> Result<HashMap<String, Section>, ConfigError> {
    let stack = read_stack(file, dir)?;
    let mut templates = HashMap::new();
    for name in &stack.order {
        if !TEMPLATE_NAME.is_match(name) {
            return Err(ConfigError::Parse {
                path: file.to_path_buf(),
                reason: format!("template name '{name}' is invalid"),
            });
        }
        let section = &stack.sections[name];
        check_known_keys(name, section)?;
        if section.contains_key("template") {
            return Err(invalid(name, "template", "templates cannot nest"));
        }
        if let Some(time) = section.get("time") {
            if time.contains(TEMPLATE_PLACEHOLDER) {
                return Err(invalid(
                    name,
                    "time",
                    format!("templates cannot use '{TEMPLATE_PLACEHOLDER}'"),
                ));
            }
        }
        // The template file's DEFAULT section backs every template.
        let mut merged = stack.defaults.clone();
        merged.extend(section.iter().map(|(k, v)| (k.clone(), v.clone())));
        templates.insert(name.clone(), merged);
    }
    check_known_keys("DEFAULT", &stack.defaults)?;
    Ok(templates)
}

/// Merge and validate one dataset section against the stack.
fn resolve_dataset(
    name: &str,
    stack: &IniStack,
    templates: &HashMap<String, Section>,
) -> Result<DatasetConfig, ConfigError> {
    check_dataset_name(name)?;
    let section = &stack.sections[name];
    check_known_keys(name, section)?;

    // Resolution order: section beats template beats DEFAULT.
    let mut merged = stack.defaults.clone();
    let template_name = section
        .get("template")
        .or_else(|| stack.defaults.get("template"));
    let mut template = None;
    if let Some(template_name) = template_name {
        template = Some(templates.get(template_name).ok_or_else(|| {
            ConfigError::UnknownTemplate {
                section: name.to_string(),
                template: template_name.clone(),
            }
        })?);
    }
    if let Some(template) = template {
        merged.extend(template.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    merged.extend(section.iter().map(|(k, v)| (k.clone(), v.clone())));

    // A dataset's time may splice the template's value in.
    if let Some(time) = merged.get("time").cloned() {
        if time.contains(TEMPLATE_PLACEHOLDER) {
            let inherited = template
                .and_then(|t| t.get("time"))
                .ok_or_else(|| invalid(name, "time", "no template time to substitute"))?;
            merged.insert(
                "time".to_string(),
                time.replace(TEMPLATE_PLACEHOLDER, inherited),
            );
        }
    }
    merged.remove("template");

    parse_dataset(name, &merged)
}

/// Outcome of a dataset-config read: the datasets that resolved, and
/// the sections that did not, with why.
#[derive(Debug)]
pub struct LoadReport {
    pub datasets: Vec<DatasetConfig>,
    pub disabled: Vec<(String, ConfigError)>,
}

fn load_datasets_report(process: &ProcessConfig) -> Result<LoadReport, ConfigError> {
    let templates = load_templates(&process.template_config_file, &process.template_config_dir)?;
    let path = dataset_config_path(process);
    if !path.exists() {
        return Err(ConfigError::Io {
            path,
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        });
    }
    let stack = read_stack(&path, &process.dataset_config_dir)?;
    check_known_keys("DEFAULT", &stack.defaults)?;

    let mut report = LoadReport {
        datasets: Vec::new(),
        disabled: Vec::new(),
    };
    for name in &stack.order {
        match resolve_dataset(name, &stack, &templates) {
            Ok(config) => report.datasets.push(config),
            Err(error) => report.disabled.push((name.clone(), error)),
        }
    }
    Ok(report)
}

/// Startup load: any invalid dataset section is fatal. Order follows
/// the configuration file; the scheduler preserves it within a tick.
pub fn load_dataset_configs(process: &ProcessConfig) -> Result<Vec<DatasetConfig>, ConfigError> {
    let report = load_datasets_report(process)?;
    if let Some((_, error)) = report.disabled.into_iter().next() {
        return Err(error);
    }
    Ok(report.datasets)
}

/// Runtime reconfigure: a dataset section that fails validation is
/// disabled and reported, the rest continue. File-level faults (an
/// unreadable file, a broken template file, bad DEFAULT keys) still
/// fail the whole reload so the previous configuration can be kept.
pub fn reload_dataset_configs(process: &ProcessConfig) -> Result<LoadReport, ConfigError> {
    load_datasets_report(process)
}

// ---------------------------------------------------------------------------
// Process configuration
// ---------------------------------------------------------------------------

const RCMD_PATTERN_KEYS: &[&str] = &[
    "preexec",
    "postexec",
    "replicate_postexec",
    "rcmd_aux0",
    "rcmd_aux1",
    "rcmd_aux2",
    "rcmd_aux3",
    "rcmd_aux4",
    "rcmd_aux5",
    "rcmd_aux6",
    "rcmd_aux7",
    "rcmd_aux8",
    "rcmd_aux9",
];

fn apply_zsnapd_section(
    config: &mut ProcessConfig,
    section: &[(String, String)],
) -> Result<(), ConfigError> {
    const SECTION: &str = "zsnapd";
    for (key, value) in section {
        match key.as_str() {
            "sleep_time" => config.sleep_time = parse_seconds(SECTION, key, value)?,
            "debug_sleep_time" => config.debug_sleep_time = parse_seconds(SECTION, key, value)?,
            "startup_hysteresis_time" => {
                config.startup_hysteresis = parse_seconds(SECTION, key, value)?;
            }
            "connect_retry_wait" => {
                config.connect_retry_wait = parse_seconds(SECTION, key, value)?;
            }
            "dataset_config_file" => config.dataset_config_file = PathBuf::from(value),
            "dataset_config_dir" => config.dataset_config_dir = PathBuf::from(value),
            "template_config_file" => config.template_config_file = PathBuf::from(value),
            "template_config_dir" => config.template_config_dir = PathBuf::from(value),
            "daemon_canary" => config.daemon_canary = Some(PathBuf::from(value)),
            "debug_mark" => config.debug_mark = parse_bool(SECTION, key, value)?,
            "run_as_user" => config.run_as_user = Some(value.clone()),
            "log_file" => config.logging.log_file = Some(PathBuf::from(value)),
            "log_file_backup_count" => {
                config.logging.backup_count = value.parse().map_err(|_| {
                    invalid(SECTION, key, format!("'{value}' is not a count"))
                })?;
            }
            "log_file_max_age_days" => {
                config.logging.max_age_days = Some(value.parse().map_err(|_| {
                    invalid(SECTION, key, format!("'{value}' is not a number of days"))
                })?);
            }
            "syslog_facility" => config.logging.syslog_facility = Some(value.clone()),
            _ => {
                return Err(ConfigError::UnknownKey {
                    section: SECTION.to_string(),
                    key: key.clone(),
                });
            }
        }
    }
    Ok(())
}

fn apply_rcmd_section(
    config: &mut RcmdConfig,
    section: &[(String, String)],
) -> Result<(), ConfigError> {
    const SECTION: &str = "zsnapd-rcmd";
    for (key, value) in section {
        match key.as_str() {
            "rshell" => config.rshell = value.clone(),
            "rshell_path" => config.rshell_path = value.clone(),
            "regex_error_on_^" => config.require_anchor_start = parse_bool(SECTION, key, value)?,
            "regex_error_on_.*" => config.forbid_wildcard = parse_bool(SECTION, key, value)?,
            "regex_error_on_$" => config.require_anchor_end = parse_bool(SECTION, key, value)?,
            key if RCMD_PATTERN_KEYS.contains(&key) || key.starts_with("rcmd_zfs_") => {
                config.patterns.push((key.to_string(), value.clone()));
            }
            _ => {
                return Err(ConfigError::UnknownKey {
                    section: SECTION.to_string(),
                    key: key.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Load the process file. A missing default file yields the built-in
/// defaults; an explicitly named missing file is an error.
pub fn load_process_config(explicit: Option<&Path>) -> Result<ProcessConfig, ConfigError> {
    let default_path = Path::new(super::model::CONFIG_DIR).join("process.conf");
    let path = explicit.map(Path::to_path_buf).unwrap_or(default_path);
    let mut config = ProcessConfig::default();
    if !path.exists() {
        if explicit.is_some() {
            return Err(ConfigError::Io {
                path,
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }
        return Ok(config);
    }
    let ini = read_ini(&path)?;
    for (section, properties) in ini.iter() {
        // Kept as a pair list: rcmd patterns match in file order.
        let pairs: Vec<(String, String)> = properties
            .iter()
            .map(|(k, v)| (k.to_string(), v.trim().to_string()))
            .collect();
        match section {
            None | Some("DEFAULT") => {}
            Some("zsnapd") => apply_zsnapd_section(&mut config, &pairs)?,
            Some("zsnapd-rcmd") => apply_rcmd_section(&mut config.rcmd, &pairs)?,
            // Per-subtool logging sections; their keys mirror [zsnapd]
            // and are not needed by the daemon itself.
            Some("zsnapd-cfgtest") | Some("zsnapd-trigger") => {}
            Some(other) => {
                return Err(ConfigError::Parse {
                    path: path.clone(),
                    reason: format!("unknown section [{other}]"),
                });
            }
        }
    }
    Ok(config)
}
