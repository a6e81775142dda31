//! The real adapter: assembles `zfs` command lines and runs them
//! directly or through the endpoint's SSH command.

use std::process::{Command, Stdio};

use crate::error::ZfsError;
use crate::remote::{Endpoint, Pipeline, join_argv};

use super::{DatasetInfo, SnapshotInfo, Transfer, Zfs, parse_dataset_listing,
    parse_snapshot_listing};

const MBUFFER_ARGS: &str = "-q -v 0 -s 128k";

#[derive(Debug, Clone, Copy, Default)]
pub struct ZfsCli;

impl ZfsCli {
    /// Run a simple (non-pipeline) command on the endpoint and capture
    /// stdout. Any nonzero exit is a `ToolFailure` carrying stderr.
    fn run_capture(
        &self,
        endpoint: &Endpoint,
        argv: &[String],
        log_commands: bool,
    ) -> Result<String, ZfsError> {
        let rendered = join_argv(argv);
        if log_commands {
            tracing::debug!(endpoint = %endpoint.describe(), command = %rendered, "running");
        }
        let mut command = if endpoint.is_local() {
            let mut cmd = Command::new(&argv[0]);
            cmd.args(&argv[1..]);
            cmd
        } else {
            endpoint.shell_command(&rendered)
        };
        let output = command
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ZfsError::Spawn {
                command: rendered.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(ZfsError::ToolFailure {
                command: rendered,
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Zfs for ZfsCli {
    fn list_snapshots(
        &self,
        endpoint: &Endpoint,
        dataset: &str,
        log_commands: bool,
    ) -> Result<Vec<SnapshotInfo>, ZfsError> {
        let argv = argv([
            "zfs", "list", "-pH", "-s", "creation", "-o", "name,creation", "-t", "snapshot",
            "-d", "1", dataset,
        ]);
        let output = self.run_capture(endpoint, &argv, log_commands)?;
        parse_snapshot_listing(&output)
    }

    fn list_datasets(
        &self,
        endpoint: &Endpoint,
        log_commands: bool,
    ) -> Result<Vec<DatasetInfo>, ZfsError> {
        let argv = argv(["zfs", "list", "-pH", "-o", "name,mountpoint"]);
        let output = self.run_capture(endpoint, &argv, log_commands)?;
        parse_dataset_listing(&output)
    }

    fn create_snapshot(
        &self,
        endpoint: &Endpoint,
        dataset: &str,
        name: &str,
        log_commands: bool,
    ) -> Result<(), ZfsError> {
        let argv = argv(["zfs", "snapshot", &format!("{dataset}@{name}")]);
        self.run_capture(endpoint, &argv, log_commands).map(|_| ())
    }

    fn destroy_snapshot(
        &self,
        endpoint: &Endpoint,
        dataset: &str,
        name: &str,
        log_commands: bool,
    ) -> Result<(), ZfsError> {
        let argv = argv(["zfs", "destroy", &format!("{dataset}@{name}")]);
        self.run_capture(endpoint, &argv, log_commands).map(|_| ())
    }

    fn get_property(
        &self,
        endpoint: &Endpoint,
        dataset: &str,
        property: &str,
        log_commands: bool,
    ) -> Result<Option<String>, ZfsError> {
        let argv = argv(["zfs", "get", "-pHo", "value", property, dataset]);
        let output = self.run_capture(endpoint, &argv, log_commands)?;
        let value = output.trim();
        if value.is_empty() || value == "-" {
            Ok(None)
        } else {
            Ok(Some(value.to_string()))
        }
    }

    fn transfer(&self, transfer: &Transfer) -> Result<(), ZfsError> {
        let pipeline = build_pipeline(transfer);
        if transfer.options.log_commands {
            tracing::debug!(command = %pipeline.describe(), "running transfer");
        }
        pipeline.run()
    }
}

fn argv<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.into_iter().map(str::to_string).collect()
}

fn send_argv(transfer: &Transfer) -> Vec<String> {
    let mut argv = vec!["zfs".to_string(), "send".to_string()];
    if let Some(token) = &transfer.resume_token {
        argv.push("-t".to_string());
        argv.push(token.clone());
        return argv;
    }
    if let Some(base) = &transfer.base {
        argv.push(if transfer.options.intermediates { "-I" } else { "-i" }.to_string());
        argv.push(format!("{}@{}", transfer.source_dataset, base));
    }
    argv.push(format!("{}@{}", transfer.source_dataset, transfer.snapshot));
    argv
}

fn receive_argv(transfer: &Transfer) -> Vec<String> {
    vec![
        "zfs".to_string(),
        "receive".to_string(),
        "-F".to_string(),
        transfer.target_dataset.clone(),
    ]
}

fn buffer_command(size: &str) -> String {
    format!("mbuffer {MBUFFER_ARGS} -m {size}")
}

fn command_from(script: &str) -> Command {
    let mut parts = script.split_whitespace();
    let mut cmd = Command::new(parts.next().unwrap_or("true"));
    cmd.args(parts);
    cmd
}

/// Assemble the transfer pipeline. Local-to-local transfers are a bare
/// `send | receive`; a network hop adds the buffer stage on each side
/// and the compression filter around the wire:
///
/// push:  `send | tool -c | mbuffer | ssh 'mbuffer | tool -d | receive -F'`
/// pull:  `ssh 'send | tool -c | mbuffer' | mbuffer | tool -d | receive -F`
fn build_pipeline(transfer: &Transfer) -> Pipeline {
    let send = send_argv(transfer);
    let receive = receive_argv(transfer);
    let options = &transfer.options;
    let buffer = buffer_command(&options.buffer_size);

    if transfer.source_endpoint.is_local() && transfer.target_endpoint.is_local() {
        return Pipeline::new()
            .stage(command_from_argv(&send))
            .stage(command_from_argv(&receive));
    }

    if transfer.target_endpoint.is_local() {
        // Pull: the remote side sends, compresses and buffers.
        let mut remote_script = join_argv(&send);
        if let Some(tool) = &options.compression {
            remote_script.push_str(&format!(" | {tool} -c"));
        }
        remote_script.push_str(&format!(" | {buffer}"));
        let mut pipeline = Pipeline::new()
            .stage(transfer.source_endpoint.shell_command(&remote_script))
            .stage(command_from(&buffer));
        if let Some(tool) = &options.compression {
            pipeline = pipeline.stage(command_from(&format!("{tool} -d")));
        }
        pipeline.stage(command_from_argv(&receive))
    } else {
        // Push: the remote side buffers, decompresses and receives.
        let mut pipeline = Pipeline::new().stage(command_from_argv(&send));
        if let Some(tool) = &options.compression {
            pipeline = pipeline.stage(command_from(&format!("{tool} -c")));
        }
        pipeline = pipeline.stage(command_from(&buffer));
        let mut remote_script = buffer.clone();
        if let Some(tool) = &options.compression {
            remote_script.push_str(&format!(" | {tool} -d"));
        }
        remote_script.push_str(&format!(" | {}", join_argv(&receive)));
        pipeline.stage(transfer.target_endpoint.shell_command(&remote_script))
    }
}

fn command_from_argv(argv: &[String]) -> Command {
    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..]);
    cmd
}
