//! Per-dataset execution engine.
//!
//! Each due dataset runs the linear sequence pre → snapshot →
//! replicate → post → clean. A failing step aborts the sequence for
//! that dataset only; the next tick re-derives everything from the
//! live snapshot lists, so no state survives a failure or a restart.
//!
//! Replication direction decides where the side effects land: a push
//! dataset snapshots and pre/posts locally and cleans the remote
//! target with `local_schema`; a pull dataset drives the remote source
//! (hooks and snapshot included) and cleans locally with
//! `local_schema`.

mod hooks;

pub use hooks::{HookRunner, ShellHooks};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::NaiveDateTime;

use crate::clock::{Clock, snap_to_minute};
use crate::config::{DatasetConfig, Direction, ReplicateConfig};
use crate::error::{Error, ZfsError};
use crate::name;
use crate::planner::{self, Candidate};
use crate::remote::{Endpoint, ReachabilityCache};
use crate::schema::Schema;
use crate::trigger;
use crate::zfs::{SnapshotInfo, Transfer, TransferOptions, Zfs};

/// Sequence position, for failure reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Pre,
    Snapshot,
    Replicate,
    Post,
    Clean,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Step::Pre => "pre",
            Step::Snapshot => "snapshot",
            Step::Replicate => "replicate",
            Step::Post => "post",
            Step::Clean => "clean",
        };
        f.write_str(label)
    }
}

/// A step failed; the dataset's sequence was aborted there.
#[derive(Debug)]
pub struct StepFailure {
    pub step: Step,
    pub error: Error,
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} step failed: {}", self.step, self.error)
    }
}

impl std::error::Error for StepFailure {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplicationOutcome {
    #[default]
    NotConfigured,
    Completed,
    /// Endpoint unreachable this tick; not a failure.
    Skipped,
}

/// What one engine run did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// The tick was a no-op (trigger dataset without a pending trigger).
    pub idle: bool,
    /// Shutdown was requested; the step in flight was drained and the
    /// rest of the sequence abandoned.
    pub interrupted: bool,
    pub snapshot_taken: bool,
    pub replication: ReplicationOutcome,
    pub destroyed_local: usize,
    pub destroyed_remote: usize,
}

pub struct Engine<'a> {
    zfs: &'a dyn Zfs,
    hooks: &'a dyn HookRunner,
    clock: &'a dyn Clock,
    interrupt: Option<&'a AtomicBool>,
}

impl<'a> Engine<'a> {
    pub fn new(zfs: &'a dyn Zfs, hooks: &'a dyn HookRunner, clock: &'a dyn Clock) -> Self {
        Self {
            zfs,
            hooks,
            clock,
            interrupt: None,
        }
    }

    /// Honour a shutdown flag between steps: the step in flight always
    /// drains (an interrupted receive is transactional on the other
    /// side), the remaining steps are abandoned.
    pub fn with_interrupt(mut self, flag: &'a AtomicBool) -> Self {
        self.interrupt = Some(flag);
        self
    }

    fn interrupted(&self, dataset: &str, outcome: &mut TickOutcome) -> bool {
        let raised = self
            .interrupt
            .is_some_and(|flag| flag.load(Ordering::Relaxed));
        if raised {
            tracing::info!(dataset, "shutdown requested, abandoning sequence");
            outcome.interrupted = true;
        }
        raised
    }

    /// Run the full sequence for one due dataset.
    pub fn run_dataset(
        &self,
        cfg: &DatasetConfig,
        reach: &mut ReachabilityCache<'_>,
    ) -> Result<TickOutcome, StepFailure> {
        let now = snap_to_minute(self.clock.now());

        if cfg.when.is_trigger() {
            let consumed = cfg
                .mountpoint
                .as_deref()
                .is_some_and(|mountpoint| trigger::consume(&cfg.dataset, mountpoint));
            if !consumed {
                return Ok(TickOutcome {
                    idle: true,
                    ..TickOutcome::default()
                });
            }
        }

        if cfg.is_pull() {
            self.run_pull(cfg, reach, now)
        } else {
            self.run_local_or_push(cfg, reach, now)
        }
    }

    /// Push datasets and purely local ones share a sequence; the only
    /// difference is the replicate step and the remote target clean.
    fn run_local_or_push(
        &self,
        cfg: &DatasetConfig,
        reach: &mut ReachabilityCache<'_>,
        now: NaiveDateTime,
    ) -> Result<TickOutcome, StepFailure> {
        let dataset = cfg.dataset.as_str();
        let log = cfg.log_commands;
        let local = Endpoint::local();
        let stamp = name::format_stamp(now);
        let mut outcome = TickOutcome::default();

        if let Some(preexec) = &cfg.preexec {
            self.hooks
                .run(&local, preexec, log)
                .map_err(|e| fail(Step::Pre, e))?;
        }
        if self.interrupted(dataset, &mut outcome) {
            return Ok(outcome);
        }

        if cfg.snapshot {
            outcome.snapshot_taken = self
                .take_snapshot(&local, dataset, &stamp, log)
                .map_err(|e| fail(Step::Snapshot, e))?;
        }
        if self.interrupted(dataset, &mut outcome) {
            return Ok(outcome);
        }

        let push = cfg.replicate.as_ref().and_then(|rep| match &rep.direction {
            Direction::Push { target } => Some((rep, target.as_str())),
            Direction::Pull { .. } => None,
        });
        let mut target_endpoint = None;
        if let Some((rep, target)) = push {
            let endpoint = rep.endpoint.to_endpoint();
            match reach.check(&endpoint) {
                Err(error) => {
                    tracing::info!(dataset, %error, "skipping replication");
                    outcome.replication = ReplicationOutcome::Skipped;
                }
                Ok(()) => {
                    self.replicate(&local, dataset, &endpoint, target, rep, cfg.all_snapshots, log)
                        .map_err(|e| fail(Step::Replicate, e))?;
                    outcome.replication = ReplicationOutcome::Completed;
                    target_endpoint = Some(endpoint);
                }
            }
        }
        if self.interrupted(dataset, &mut outcome) {
            return Ok(outcome);
        }

        if let Some(postexec) = &cfg.postexec {
            self.hooks
                .run(&local, postexec, log)
                .map_err(|e| fail(Step::Post, e))?;
        }
        if outcome.replication == ReplicationOutcome::Completed {
            if let Some(replicate_postexec) = &cfg.replicate_postexec {
                self.hooks
                    .run(&local, replicate_postexec, log)
                    .map_err(|e| fail(Step::Post, e))?;
            }
        }
        if self.interrupted(dataset, &mut outcome) {
            return Ok(outcome);
        }

        outcome.destroyed_local = self
            .clean(&local, dataset, &cfg.schema, cfg.clean_all, now, log)
            .map_err(|e| fail(Step::Clean, e))?;
        // For push configurations local_schema ages the remote target.
        if let (Some(endpoint), Some((_, target)), Some(schema)) =
            (&target_endpoint, push, &cfg.local_schema)
        {
            outcome.destroyed_remote = self
                .clean(endpoint, target, schema, cfg.local_clean_all, now, log)
                .map_err(|e| fail(Step::Clean, e))?;
        }
        Ok(outcome)
    }

    /// Pull: the snapshot, hooks and source aging happen on the remote
    /// side, the receive and `local_schema` aging on this one. With the
    /// endpoint unreachable every remote step is skipped but the local
    /// clean still runs.
    fn run_pull(
        &self,
        cfg: &DatasetConfig,
        reach: &mut ReachabilityCache<'_>,
        now: NaiveDateTime,
    ) -> Result<TickOutcome, StepFailure> {
        let dataset = cfg.dataset.as_str();
        let log = cfg.log_commands;
        let local = Endpoint::local();
        let stamp = name::format_stamp(now);
        let mut outcome = TickOutcome::default();
        let local_schema = cfg.local_schema.as_ref().unwrap_or(&cfg.schema);

        let Some(rep) = cfg.replicate.as_ref() else {
            return Ok(outcome);
        };
        let Direction::Pull { source } = &rep.direction else {
            return Ok(outcome);
        };
        let endpoint = rep.endpoint.to_endpoint();

        if let Err(error) = reach.check(&endpoint) {
            tracing::info!(dataset, %error, "skipping remote side");
            outcome.replication = ReplicationOutcome::Skipped;
            outcome.destroyed_local = self
                .clean(&local, dataset, local_schema, cfg.local_clean_all, now, log)
                .map_err(|e| fail(Step::Clean, e))?;
            return Ok(outcome);
        }

        let remote_datasets = self
            .zfs
            .list_datasets(&endpoint, log)
            .map_err(|e| fail(Step::Replicate, e))?;
        if !remote_datasets.iter().any(|d| d.name == *source) {
            return Err(fail(
                Step::Replicate,
                ZfsError::MissingDataset {
                    dataset: source.clone(),
                    endpoint: endpoint.describe(),
                },
            ));
        }

        if let Some(preexec) = &cfg.preexec {
            self.hooks
                .run(&endpoint, preexec, log)
                .map_err(|e| fail(Step::Pre, e))?;
        }
        if self.interrupted(dataset, &mut outcome) {
            return Ok(outcome);
        }

        if cfg.snapshot {
            outcome.snapshot_taken = self
                .take_snapshot(&endpoint, source, &stamp, log)
                .map_err(|e| fail(Step::Snapshot, e))?;
        }
        if self.interrupted(dataset, &mut outcome) {
            return Ok(outcome);
        }

        self.replicate(&endpoint, source, &local, dataset, rep, cfg.all_snapshots, log)
            .map_err(|e| fail(Step::Replicate, e))?;
        outcome.replication = ReplicationOutcome::Completed;
        if self.interrupted(dataset, &mut outcome) {
            return Ok(outcome);
        }

        if let Some(postexec) = &cfg.postexec {
            self.hooks
                .run(&endpoint, postexec, log)
                .map_err(|e| fail(Step::Post, e))?;
        }
        if let Some(replicate_postexec) = &cfg.replicate_postexec {
            self.hooks
                .run(&endpoint, replicate_postexec, log)
                .map_err(|e| fail(Step::Post, e))?;
        }
        if self.interrupted(dataset, &mut outcome) {
            return Ok(outcome);
        }

        outcome.destroyed_remote = self
            .clean(&endpoint, source, &cfg.schema, cfg.clean_all, now, log)
            .map_err(|e| fail(Step::Clean, e))?;
        outcome.destroyed_local = self
            .clean(&local, dataset, local_schema, cfg.local_clean_all, now, log)
            .map_err(|e| fail(Step::Clean, e))?;
        Ok(outcome)
    }

    /// Create `dataset@stamp` unless a snapshot of that name already
    /// exists (a clock-granularity collision is a success, not an
    /// error). Returns whether a snapshot was actually taken.
    fn take_snapshot(
        &self,
        endpoint: &Endpoint,
        dataset: &str,
        stamp: &str,
        log: bool,
    ) -> Result<bool, Error> {
        let existing = self.zfs.list_snapshots(endpoint, dataset, log)?;
        if existing.iter().any(|s| s.name == stamp) {
            tracing::debug!(dataset, stamp, "snapshot already exists");
            return Ok(false);
        }
        tracing::info!(dataset, "taking snapshot {dataset}@{stamp}");
        self.zfs.create_snapshot(endpoint, dataset, stamp, log)?;
        Ok(true)
    }

    /// Bring `target` up to date from `source` with as few streams as
    /// the snapshot sets allow, resuming an interrupted receive first
    /// if the target advertises a token.
    #[allow(clippy::too_many_arguments)]
    fn replicate(
        &self,
        source_endpoint: &Endpoint,
        source: &str,
        target_endpoint: &Endpoint,
        target: &str,
        rep: &ReplicateConfig,
        all_snapshots: bool,
        log: bool,
    ) -> Result<(), Error> {
        let options = TransferOptions {
            compression: rep.compression.clone(),
            buffer_size: rep.buffer_size.clone(),
            intermediates: all_snapshots,
            log_commands: log,
        };
        let transfer_for = |base: Option<String>, snapshot: String, resume: Option<String>| {
            Transfer {
                source_endpoint: source_endpoint.clone(),
                source_dataset: source.to_string(),
                target_endpoint: target_endpoint.clone(),
                target_dataset: target.to_string(),
                base,
                snapshot,
                resume_token: resume,
                options: options.clone(),
            }
        };

        let source_label = side_label(source_endpoint, source);
        let target_label = side_label(target_endpoint, target);

        let target_exists = self
            .zfs
            .list_datasets(target_endpoint, log)?
            .iter()
            .any(|d| d.name == target);
        if target_exists {
            if let Some(token) =
                self.zfs
                    .get_property(target_endpoint, target, "receive_resume_token", log)?
            {
                tracing::info!("resuming replication {source_label} to {target_label}");
                self.zfs.transfer(&transfer_for(None, String::new(), Some(token)))?;
                tracing::info!("resumed replication {source_label} to {target_label} complete");
                return Ok(());
            }
        }

        let source_snapshots = self.zfs.list_snapshots(source_endpoint, source, log)?;
        let target_snapshots = if target_exists {
            self.zfs.list_snapshots(target_endpoint, target, log)?
        } else {
            Vec::new()
        };
        let hops = plan_hops(&source_snapshots, &target_snapshots, all_snapshots);
        if hops.is_empty() {
            tracing::debug!(source, target, "replication already in sync");
            return Ok(());
        }
        tracing::info!("replicating {source_label} to {target_label}");
        for hop in hops {
            let transfer = transfer_for(hop.base, hop.snapshot, None);
            tracing::info!("  {}", transfer.describe());
            self.zfs.transfer(&transfer)?;
        }
        tracing::info!("replicating {source_label} to {target_label} complete");
        Ok(())
    }

    /// Age one side of a dataset: list, plan, destroy oldest first.
    fn clean(
        &self,
        endpoint: &Endpoint,
        dataset: &str,
        schema: &Schema,
        clean_all: bool,
        now: NaiveDateTime,
        log: bool,
    ) -> Result<usize, Error> {
        let snapshots = self.zfs.list_snapshots(endpoint, dataset, log)?;
        let candidates: Vec<Candidate> = snapshots
            .iter()
            .map(|s| {
                Candidate::new(
                    s.name.clone(),
                    self.clock.from_epoch(s.creation),
                    name::is_managed(&s.name),
                )
            })
            .collect();
        let plan = planner::plan(schema, &candidates, now, clean_all);
        if plan.destroy.is_empty() {
            return Ok(0);
        }
        tracing::info!(dataset, "cleaning {}", endpoint.describe());
        let mut destroyed = 0;
        for victim in &plan.destroy {
            tracing::info!(dataset, "  destroying {dataset}@{}", victim.name);
            self.zfs
                .destroy_snapshot(endpoint, dataset, &victim.name, log)?;
            destroyed += 1;
        }
        Ok(destroyed)
    }
}

fn fail(step: Step, error: impl Into<Error>) -> StepFailure {
    StepFailure {
        step,
        error: error.into(),
    }
}

fn side_label(endpoint: &Endpoint, dataset: &str) -> String {
    let host = match endpoint.host_port() {
        Some((host, _)) => host.to_string(),
        None => short_hostname(),
    };
    format!("[{host}]:{dataset}")
}

fn short_hostname() -> String {
    whoami::fallible::hostname()
        .ok()
        .and_then(|h| h.split('.').next().map(str::to_string))
        .unwrap_or_else(|| "localhost".to_string())
}

/// One incremental (or initial full) hop of a replication.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Hop {
    base: Option<String>,
    snapshot: String,
}

/// Work out the hops that bring the target's snapshot set up to the
/// source's newest.
///
/// The common base is the most recent source snapshot present on the
/// target by name; with `all_snapshots` the name intersection and the
/// streams cover everything, otherwise only managed names take part.
/// With no common snapshot the oldest candidate goes over as a full
/// stream and the rest follows incrementally.
fn plan_hops(
    source: &[SnapshotInfo],
    target: &[SnapshotInfo],
    all_snapshots: bool,
) -> Vec<Hop> {
    let candidates: Vec<&str> = source
        .iter()
        .map(|s| s.name.as_str())
        .filter(|n| all_snapshots || name::is_managed(n))
        .collect();
    let Some(&newest) = candidates.last() else {
        return Vec::new();
    };
    let target_names: Vec<&str> = target
        .iter()
        .map(|s| s.name.as_str())
        .filter(|n| all_snapshots || name::is_managed(n))
        .collect();

    let common_index = candidates
        .iter()
        .rposition(|n| target_names.contains(n));

    let mut hops = Vec::new();
    let walk_from = match common_index {
        Some(index) if candidates[index] == newest => return hops,
        Some(index) => index,
        None => {
            hops.push(Hop {
                base: None,
                snapshot: candidates[0].to_string(),
            });
            if candidates.len() == 1 {
                return hops;
            }
            0
        }
    };

    if all_snapshots {
        // One stream with every intermediate snapshot in it.
        hops.push(Hop {
            base: Some(candidates[walk_from].to_string()),
            snapshot: newest.to_string(),
        });
    } else {
        for pair in candidates[walk_from..].windows(2) {
            hops.push(Hop {
                base: Some(pair[0].to_string()),
                snapshot: pair[1].to_string(),
            });
        }
    }
    hops
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snaps(names: &[&str]) -> Vec<SnapshotInfo> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| SnapshotInfo {
                name: name.to_string(),
                creation: 1_700_000_000 + i as i64 * 3600,
            })
            .collect()
    }

    fn hop(base: Option<&str>, snapshot: &str) -> Hop {
        Hop {
            base: base.map(str::to_string),
            snapshot: snapshot.to_string(),
        }
    }

    #[test]
    fn incremental_from_common_base() {
        let source = snaps(&["202401010000", "202401020000"]);
        let target = snaps(&["202401010000"]);
        assert_eq!(
            plan_hops(&source, &target, true),
            vec![hop(Some("202401010000"), "202401020000")]
        );
    }

    #[test]
    fn in_sync_needs_no_hops() {
        let source = snaps(&["202401010000", "202401020000"]);
        let target = snaps(&["202401010000", "202401020000"]);
        assert!(plan_hops(&source, &target, true).is_empty());
        assert!(plan_hops(&[], &[], true).is_empty());
    }

    #[test]
    fn bootstrap_sends_full_then_increments() {
        let source = snaps(&["202401010000", "202401020000", "202401030000"]);
        assert_eq!(
            plan_hops(&source, &[], true),
            vec![
                hop(None, "202401010000"),
                hop(Some("202401010000"), "202401030000"),
            ]
        );
    }

    #[test]
    fn managed_only_walks_stepwise() {
        let source = snaps(&[
            "202401010000",
            "manual-checkpoint",
            "202401020000",
            "202401030000",
        ]);
        let target = snaps(&["202401010000", "stray-on-target"]);
        assert_eq!(
            plan_hops(&source, &target, false),
            vec![
                hop(Some("202401010000"), "202401020000"),
                hop(Some("202401020000"), "202401030000"),
            ]
        );
    }

    #[test]
    fn foreign_names_count_when_streaming_everything() {
        let source = snaps(&["202401010000", "manual-checkpoint", "202401020000"]);
        let target = snaps(&["202401010000", "manual-checkpoint"]);
        assert_eq!(
            plan_hops(&source, &target, true),
            vec![hop(Some("manual-checkpoint"), "202401020000")]
        );
    }

    #[test]
    fn single_snapshot_bootstrap_is_one_full_stream() {
        let source = snaps(&["202401010000"]);
        assert_eq!(plan_hops(&source, &[], true), vec![hop(None, "202401010000")]);
    }
}
