//! Structured subprocess pipelines.
//!
//! A transfer is `zfs send | [compression] | [buffer] | ssh 'receive'`
//! (or its pull mirror). Rather than handing a pipe expression to a
//! shell, each stage is a [`Command`] wired stdout→stdin here; every
//! stage's stderr is captured separately and the first nonzero exit
//! fails the whole transfer.

use std::io::Read;
use std::process::{Child, ChildStderr, Command, Stdio};
use std::thread::JoinHandle;

use crate::error::ZfsError;

pub struct Pipeline {
    stages: Vec<Command>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    pub fn stage(mut self, command: Command) -> Self {
        self.stages.push(command);
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Render the pipeline the way an operator would type it, for
    /// command auditing.
    pub fn describe(&self) -> String {
        self.stages
            .iter()
            .map(render)
            .collect::<Vec<_>>()
            .join(" | ")
    }

    /// Spawn all stages, wait for all of them, and report the first
    /// nonzero exit with that stage's captured stderr.
    pub fn run(self) -> Result<(), ZfsError> {
        let total = self.stages.len();
        let mut running: Vec<Stage> = Vec::with_capacity(total);
        let mut upstream = None;
        for (index, mut command) in self.stages.into_iter().enumerate() {
            match upstream.take() {
                Some(out) => command.stdin(Stdio::from(out)),
                None => command.stdin(Stdio::null()),
            };
            command.stdout(if index + 1 == total {
                Stdio::null()
            } else {
                Stdio::piped()
            });
            command.stderr(Stdio::piped());

            let label = render(&command);
            let mut child = command.spawn().map_err(|source| ZfsError::Spawn {
                command: label.clone(),
                source,
            })?;
            upstream = child.stdout.take();
            let drain = child.stderr.take().map(drain_stderr);
            running.push(Stage { label, child, drain });
        }

        let mut failure = None;
        for mut stage in running {
            let status = stage.child.wait().map_err(|source| ZfsError::Spawn {
                command: stage.label.clone(),
                source,
            })?;
            let stderr = stage
                .drain
                .take()
                .and_then(|h| h.join().ok())
                .unwrap_or_default();
            if !status.success() && failure.is_none() {
                failure = Some(ZfsError::PipelineFailure {
                    stage: stage.label,
                    status: status.code().unwrap_or(-1),
                    stderr: stderr.trim().to_string(),
                });
            }
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

struct Stage {
    label: String,
    child: Child,
    drain: Option<JoinHandle<String>>,
}

/// Read a stage's stderr on its own thread so a chatty stage cannot
/// deadlock against a full pipe while we wait on another stage.
fn drain_stderr(mut stderr: ChildStderr) -> JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buffer = String::new();
        let _ = stderr.read_to_string(&mut buffer);
        buffer
    })
}

fn render(command: &Command) -> String {
    let mut parts = vec![command.get_program().to_string_lossy().into_owned()];
    parts.extend(command.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn single_stage_success() {
        assert!(Pipeline::new().stage(sh("true")).run().is_ok());
    }

    #[test]
    fn data_flows_between_stages() {
        // Middle stage only succeeds if it sees the upstream bytes.
        let result = Pipeline::new()
            .stage(sh("printf payload"))
            .stage(sh("grep -q payload"))
            .stage(sh("cat > /dev/null"))
            .run();
        assert!(result.is_ok());
    }

    #[test]
    fn nonzero_stage_fails_the_pipeline() {
        let err = Pipeline::new()
            .stage(sh("printf x"))
            .stage(sh("echo broken >&2; exit 3"))
            .stage(sh("cat > /dev/null"))
            .run()
            .unwrap_err();
        match err {
            ZfsError::PipelineFailure {
                status, stderr, ..
            } => {
                assert_eq!(status, 3);
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn first_failing_stage_wins() {
        let err = Pipeline::new()
            .stage(sh("exit 7"))
            .stage(sh("cat > /dev/null; exit 9"))
            .run()
            .unwrap_err();
        match err {
            ZfsError::PipelineFailure { status, .. } => assert_eq!(status, 7),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn describe_renders_operator_form() {
        let p = Pipeline::new().stage(sh("true")).stage(sh("false"));
        assert_eq!(p.describe(), "sh -c true | sh -c false");
    }
}
