use std::path::PathBuf;

use thiserror::Error;

/// Configuration faults. Fatal at startup; at runtime reconfigure the
/// offending dataset is disabled and the rest continue.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("[{section}] {key}: {reason}")]
    Invalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("[{section}] '{key}' is not a recognised option")]
    UnknownKey { section: String, key: String },

    #[error("[{section}] references unknown template '{template}'")]
    UnknownTemplate { section: String, template: String },

    #[error("[{section}] '{first}' and '{second}' cannot both be set")]
    Exclusive {
        section: String,
        first: &'static str,
        second: &'static str,
    },

    #[error("'{section}' is not a valid dataset name")]
    BadDatasetName { section: String },
}

/// The ZFS tool or a transfer pipeline failed.
#[derive(Error, Debug)]
pub enum ZfsError {
    #[error("`{command}` exited with status {status}: {stderr}")]
    ToolFailure {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("pipeline stage `{stage}` exited with status {status}: {stderr}")]
    PipelineFailure {
        stage: String,
        status: i32,
        stderr: String,
    },

    #[error("cannot spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unparseable `zfs list` line {line:?}")]
    Malformed { line: String },

    #[error("dataset '{dataset}' does not exist on {endpoint}")]
    MissingDataset { dataset: String, endpoint: String },
}

/// The TCP reachability probe failed; operations against this endpoint
/// are skipped for the rest of the tick.
#[derive(Error, Debug)]
pub enum EndpointError {
    #[error("endpoint {host}:{port} unreachable: {reason}")]
    Unreachable {
        host: String,
        port: u16,
        reason: String,
    },
}

/// A pre/post hook command failed.
#[derive(Error, Debug)]
pub enum HookError {
    #[error("hook `{command}` exited with status {status}: {stderr}")]
    Failed {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("cannot run hook `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Crate-level convenience error: a thin wrapper over the capability
/// errors, not a dumping ground.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Zfs(#[from] ZfsError),

    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    #[error(transparent)]
    Hook(#[from] HookError),
}

impl Error {
    /// True when the failure is the reachability probe, which is reported
    /// as a skipped step rather than a failed one.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Error::Endpoint(EndpointError::Unreachable { .. }))
    }
}
