//! ZFS adapter: the only module that knows what the `zfs` command line
//! looks like.
//!
//! The [`Zfs`] trait is the seam the execution engine is tested
//! through; [`ZfsCli`] is the real implementation issuing commands
//! locally or through an [`Endpoint`](crate::remote::Endpoint).

mod cli;

pub use cli::ZfsCli;

use std::path::PathBuf;

use crate::error::ZfsError;
use crate::remote::Endpoint;

/// One snapshot as listed by the tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub name: String,
    /// Seconds since the Unix epoch, from the `creation` property.
    pub creation: i64,
}

/// One dataset as listed by the tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetInfo {
    pub name: String,
    pub mountpoint: Option<PathBuf>,
}

/// Knobs shaping a transfer pipeline.
#[derive(Debug, Clone, Default)]
pub struct TransferOptions {
    /// Pipe through `tool -c` / `tool -d` around the network hop.
    pub compression: Option<String>,
    /// `mbuffer` memory size on each side of the network hop.
    pub buffer_size: String,
    /// Use `-I` (every intermediate snapshot) rather than `-i`.
    pub intermediates: bool,
    /// Audit the assembled pipeline at DEBUG.
    pub log_commands: bool,
}

/// One send/receive hop bringing `target_dataset` up to `snapshot`.
/// At most one of the two endpoints is remote.
#[derive(Debug, Clone)]
pub struct Transfer {
    pub source_endpoint: Endpoint,
    pub source_dataset: String,
    pub target_endpoint: Endpoint,
    pub target_dataset: String,
    /// Incremental base; `None` sends a full stream.
    pub base: Option<String>,
    /// Snapshot to bring the target up to. Ignored when resuming.
    pub snapshot: String,
    /// Interrupted-receive token from the target side; when set the
    /// stream is `zfs send -t <token>` instead of a snapshot range.
    pub resume_token: Option<String>,
    pub options: TransferOptions,
}

impl Transfer {
    /// `dataset@base > dataset@snap` for log lines.
    pub fn describe(&self) -> String {
        match (&self.resume_token, &self.base) {
            (Some(_), _) => format!("{}@<resume>", self.source_dataset),
            (None, Some(base)) => format!(
                "{0}@{1} > {0}@{2}",
                self.source_dataset, base, self.snapshot
            ),
            (None, None) => format!("{0}@ > {0}@{1}", self.source_dataset, self.snapshot),
        }
    }
}

pub trait Zfs {
    /// Snapshots of one dataset, sorted by creation ascending.
    fn list_snapshots(
        &self,
        endpoint: &Endpoint,
        dataset: &str,
        log_commands: bool,
    ) -> Result<Vec<SnapshotInfo>, ZfsError>;

    /// Every dataset on the endpoint with its mountpoint.
    fn list_datasets(
        &self,
        endpoint: &Endpoint,
        log_commands: bool,
    ) -> Result<Vec<DatasetInfo>, ZfsError>;

    fn create_snapshot(
        &self,
        endpoint: &Endpoint,
        dataset: &str,
        name: &str,
        log_commands: bool,
    ) -> Result<(), ZfsError>;

    fn destroy_snapshot(
        &self,
        endpoint: &Endpoint,
        dataset: &str,
        name: &str,
        log_commands: bool,
    ) -> Result<(), ZfsError>;

    /// A single property value; `None` when the tool prints `-`.
    fn get_property(
        &self,
        endpoint: &Endpoint,
        dataset: &str,
        property: &str,
        log_commands: bool,
    ) -> Result<Option<String>, ZfsError>;

    /// Run one send/receive hop to completion.
    fn transfer(&self, transfer: &Transfer) -> Result<(), ZfsError>;
}

/// Parse `zfs list -pH -o name,creation -t snapshot` output.
/// Tolerant of surrounding whitespace, strict about column count.
pub(crate) fn parse_snapshot_listing(output: &str) -> Result<Vec<SnapshotInfo>, ZfsError> {
    let mut snapshots = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut columns = line.split_whitespace();
        let (Some(qualified), Some(creation), None) =
            (columns.next(), columns.next(), columns.next())
        else {
            return Err(ZfsError::Malformed { line: line.into() });
        };
        let Some((_, name)) = qualified.split_once('@') else {
            return Err(ZfsError::Malformed { line: line.into() });
        };
        let creation: i64 = creation
            .parse()
            .map_err(|_| ZfsError::Malformed { line: line.into() })?;
        snapshots.push(SnapshotInfo {
            name: name.to_string(),
            creation,
        });
    }
    snapshots.sort_by(|a, b| a.creation.cmp(&b.creation).then(a.name.cmp(&b.name)));
    Ok(snapshots)
}

/// Parse `zfs list -pH -o name,mountpoint` output. Mountpoints may
/// contain spaces, so this split is on the tab the tool emits.
pub(crate) fn parse_dataset_listing(output: &str) -> Result<Vec<DatasetInfo>, ZfsError> {
    let mut datasets = Vec::new();
    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let mut columns = line.split('\t');
        let (Some(name), Some(mountpoint), None) =
            (columns.next(), columns.next(), columns.next())
        else {
            return Err(ZfsError::Malformed { line: line.into() });
        };
        let mountpoint = match mountpoint.trim() {
            "none" | "legacy" | "-" => None,
            path => Some(PathBuf::from(path)),
        };
        datasets.push(DatasetInfo {
            name: name.trim().to_string(),
            mountpoint,
        });
    }
    Ok(datasets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_listing_parses_and_sorts() {
        let output = "\
zpool/data@202401020000\t1704153600
  zpool/data@202401010000\t1704067200  \n\
zpool/data@manual-before-migration\t1704100000
";
        let snaps = parse_snapshot_listing(output).unwrap();
        assert_eq!(
            snaps
                .iter()
                .map(|s| (s.name.as_str(), s.creation))
                .collect::<Vec<_>>(),
            vec![
                ("202401010000", 1704067200),
                ("manual-before-migration", 1704100000),
                ("202401020000", 1704153600),
            ]
        );
    }

    #[test]
    fn snapshot_listing_rejects_wrong_column_count() {
        assert!(parse_snapshot_listing("zpool/data@a\t1\textra").is_err());
        assert!(parse_snapshot_listing("zpool/data@a").is_err());
        assert!(parse_snapshot_listing("zpool/data\t170").is_err());
        assert!(parse_snapshot_listing("zpool/data@a\tnot-a-number").is_err());
    }

    #[test]
    fn dataset_listing_handles_unmounted() {
        let output = "zpool\t/zpool\nzpool/vol\t-\nzpool/legacy\tlegacy\n";
        let datasets = parse_dataset_listing(output).unwrap();
        assert_eq!(datasets[0].mountpoint, Some(PathBuf::from("/zpool")));
        assert_eq!(datasets[1].mountpoint, None);
        assert_eq!(datasets[2].mountpoint, None);
    }

    #[test]
    fn transfer_describe_shows_the_hop() {
        let t = Transfer {
            source_endpoint: Endpoint::local(),
            source_dataset: "zpool/data".into(),
            target_endpoint: Endpoint::local(),
            target_dataset: "backup/data".into(),
            base: Some("202401010000".into()),
            snapshot: "202401020000".into(),
            resume_token: None,
            options: TransferOptions::default(),
        };
        assert_eq!(
            t.describe(),
            "zpool/data@202401010000 > zpool/data@202401020000"
        );
    }
}
