//! SSH ForceCommand filter.
//!
//! Installed as the forced command for the replication login, this
//! matches `SSH_ORIGINAL_COMMAND` against the configured allow-list
//! and execs it through the restricted shell only on a match. Matched
//! commands run unmodified with their exit status preserved (the exec
//! replaces this process).

use std::os::unix::process::CommandExt;
use std::process::Command;

use regex::Regex;

use crate::config::RcmdConfig;

/// sysexits EX_NOPERM, the traditional rejection code for this filter.
pub const EXIT_REJECTED: i32 = 77;
/// sysexits EX_SOFTWARE: the exec itself failed.
pub const EXIT_EXEC_FAILED: i32 = 70;

pub const COMMAND_VARIABLE: &str = "SSH_ORIGINAL_COMMAND";

/// Compiled allow-list.
#[derive(Debug)]
pub struct CommandFilter {
    patterns: Vec<(String, Regex)>,
}

impl CommandFilter {
    /// Compile every configured pattern, enforcing the anchoring lint:
    /// unanchored or wildcarded patterns are an operator mistake that
    /// silently widens the allow-list, so they refuse to load.
    pub fn compile(config: &RcmdConfig) -> Result<Self, Vec<String>> {
        let mut patterns = Vec::new();
        let mut problems = Vec::new();
        for (key, pattern) in &config.patterns {
            if pattern.is_empty() {
                continue;
            }
            if config.require_anchor_start && !pattern.starts_with('^') {
                problems.push(format!("{key}: pattern '{pattern}' does not begin with '^'"));
            }
            if config.forbid_wildcard && pattern.contains(".*") {
                problems.push(format!("{key}: pattern '{pattern}' contains '.*'"));
            }
            if config.require_anchor_end && !pattern.ends_with('$') {
                problems.push(format!("{key}: pattern '{pattern}' does not end with '$'"));
            }
            match Regex::new(pattern) {
                Ok(regex) => patterns.push((key.clone(), regex)),
                Err(error) => problems.push(format!("{key}: {error}")),
            }
        }
        if problems.is_empty() {
            Ok(Self { patterns })
        } else {
            Err(problems)
        }
    }

    /// Key of the first matching pattern, if any.
    pub fn matches(&self, command: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|(_, regex)| regex.is_match(command))
            .map(|(key, _)| key.as_str())
    }
}

/// Filter and exec the incoming command. Returns an exit code when the
/// command is rejected or `testing` short-circuits the exec.
pub fn run(config: &RcmdConfig, testing: bool) -> i32 {
    let filter = match CommandFilter::compile(config) {
        Ok(filter) => filter,
        Err(problems) => {
            for problem in &problems {
                tracing::error!("SECURITY - {problem}");
            }
            eprintln!("SECURITY - command rejected");
            return EXIT_REJECTED;
        }
    };

    let Ok(command) = std::env::var(COMMAND_VARIABLE) else {
        tracing::error!("{COMMAND_VARIABLE} not set");
        eprintln!("SECURITY - command rejected");
        return EXIT_REJECTED;
    };
    tracing::debug!(%command, "incoming command");

    let Some(key) = filter.matches(&command) else {
        tracing::error!(%command, "command rejected");
        eprintln!("SECURITY - command rejected");
        return EXIT_REJECTED;
    };
    tracing::info!(%command, key, "command accepted");
    if testing {
        return 0;
    }

    let error = Command::new(&config.rshell)
        .arg("-c")
        .arg(&command)
        .env_clear()
        .env("PATH", &config.rshell_path)
        .exec();
    tracing::error!(rshell = %config.rshell, %error, "exec failed");
    EXIT_EXEC_FAILED
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(patterns: &[(&str, &str)]) -> RcmdConfig {
        RcmdConfig {
            patterns: patterns
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..RcmdConfig::default()
        }
    }

    #[test]
    fn anchored_patterns_match() {
        let filter = CommandFilter::compile(&config(&[
            ("rcmd_zfs_snapshot", r"^zfs snapshot [-/@a-zA-Z0-9]+$"),
            ("preexec", r"^/usr/local/bin/quiesce-db$"),
        ]))
        .unwrap();
        assert_eq!(
            filter.matches("zfs snapshot zpool/data@202401010000"),
            Some("rcmd_zfs_snapshot")
        );
        assert_eq!(
            filter.matches("/usr/local/bin/quiesce-db"),
            Some("preexec")
        );
        assert_eq!(filter.matches("rm -rf /"), None);
    }

    #[test]
    fn unanchored_patterns_refuse_to_load() {
        let problems = CommandFilter::compile(&config(&[("rcmd_aux0", "zfs list$")]))
            .unwrap_err();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("does not begin with '^'"));

        let problems =
            CommandFilter::compile(&config(&[("rcmd_aux0", "^zfs list")])).unwrap_err();
        assert!(problems[0].contains("does not end with '$'"));

        let problems =
            CommandFilter::compile(&config(&[("rcmd_aux0", "^zfs .*$")])).unwrap_err();
        assert!(problems[0].contains("contains '.*'"));
    }

    #[test]
    fn lints_can_be_relaxed() {
        let mut cfg = config(&[("rcmd_aux0", "^zfs .*$")]);
        cfg.forbid_wildcard = false;
        let filter = CommandFilter::compile(&cfg).unwrap();
        assert_eq!(filter.matches("zfs list -pH"), Some("rcmd_aux0"));
    }

    #[test]
    fn empty_patterns_are_skipped() {
        let filter = CommandFilter::compile(&config(&[("rcmd_aux0", "")])).unwrap();
        assert_eq!(filter.matches("anything"), None);
    }

    #[test]
    fn invalid_regex_is_reported() {
        let problems =
            CommandFilter::compile(&config(&[("rcmd_aux0", "^zfs ($")])).unwrap_err();
        assert!(!problems.is_empty());
    }
}
