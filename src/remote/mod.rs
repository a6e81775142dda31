//! Remote endpoints.
//!
//! An [`Endpoint`] is where a command runs: this host, or a replication
//! peer reached through an SSH command template. Before any remote use
//! within a tick the peer is probed with a short TCP connect so a
//! laptop with its backup box switched off skips replication quickly
//! instead of hanging in SSH timeouts.

mod pipeline;

pub use pipeline::Pipeline;

use std::collections::HashMap;
use std::net::{TcpStream, ToSocketAddrs};
use std::process::Command;
use std::time::Duration;

use crate::error::EndpointError;

pub const DEFAULT_PORT: u16 = 22;
pub const DEFAULT_LOGIN: &str = "root";
pub const DEFAULT_COMMAND: &str = "ssh -l {login} -p {port} {host}";

/// Where a command runs: this host, or a peer reached through the
/// expanded SSH command template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: Option<String>,
    port: u16,
    login: String,
    command_template: String,
}

impl Endpoint {
    pub fn local() -> Self {
        Self {
            host: None,
            port: DEFAULT_PORT,
            login: DEFAULT_LOGIN.to_string(),
            command_template: DEFAULT_COMMAND.to_string(),
        }
    }

    pub fn remote(
        host: impl Into<String>,
        port: u16,
        login: impl Into<String>,
        command_template: impl Into<String>,
    ) -> Self {
        Self {
            host: Some(host.into()),
            port,
            login: login.into(),
            command_template: command_template.into(),
        }
    }

    pub fn is_local(&self) -> bool {
        self.host.is_none()
    }

    pub fn host_port(&self) -> Option<(&str, u16)> {
        self.host.as_deref().map(|h| (h, self.port))
    }

    /// `{host}`, `{port}` and `{login}` expanded into argv parts.
    /// Empty for the local endpoint.
    pub fn ssh_argv(&self) -> Vec<String> {
        let Some(host) = self.host.as_deref() else {
            return Vec::new();
        };
        self.command_template
            .replace("{host}", host)
            .replace("{port}", &self.port.to_string())
            .replace("{login}", &self.login)
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }

    /// Build a command running `script` on this endpoint: locally via
    /// `sh -c`, remotely as the single argument to the SSH command.
    pub fn shell_command(&self, script: &str) -> Command {
        let ssh = self.ssh_argv();
        if ssh.is_empty() {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(script);
            cmd
        } else {
            let mut cmd = Command::new(&ssh[0]);
            cmd.args(&ssh[1..]).arg(script);
            cmd
        }
    }

    /// Label for log lines: `local` or `host:port`.
    pub fn describe(&self) -> String {
        match self.host.as_deref() {
            None => "local".to_string(),
            Some(host) => format!("{host}:{}", self.port),
        }
    }
}

/// Render an argv as the flat string a remote shell (or a log line)
/// sees. Arguments are validated at config load to be free of shell
/// metacharacters, so plain joining is sound.
pub fn join_argv(argv: &[String]) -> String {
    argv.join(" ")
}

/// TCP reachability, injectable for tests.
pub trait Probe {
    fn probe(&self, host: &str, port: u16) -> Result<(), String>;
}

/// Real connect-with-timeout probe, retried a few times so a peer that
/// is just waking from suspend gets a second chance.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    pub timeout: Duration,
    pub attempts: u32,
    pub retry_wait: Duration,
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            attempts: 3,
            retry_wait: Duration::from_secs(3),
        }
    }
}

impl Probe for TcpProbe {
    fn probe(&self, host: &str, port: u16) -> Result<(), String> {
        let mut last_error = String::new();
        for attempt in 0..self.attempts.max(1) {
            if attempt > 0 {
                std::thread::sleep(self.retry_wait);
            }
            let addrs = match (host, port).to_socket_addrs() {
                Ok(addrs) => addrs,
                Err(e) => {
                    last_error = e.to_string();
                    continue;
                }
            };
            for addr in addrs {
                match TcpStream::connect_timeout(&addr, self.timeout) {
                    Ok(_) => return Ok(()),
                    Err(e) => last_error = e.to_string(),
                }
            }
        }
        Err(last_error)
    }
}

/// Per-tick memo of probe verdicts, so several datasets sharing a peer
/// probe it once.
pub struct ReachabilityCache<'a> {
    probe: &'a dyn Probe,
    verdicts: HashMap<(String, u16), Option<String>>,
}

impl<'a> ReachabilityCache<'a> {
    pub fn new(probe: &'a dyn Probe) -> Self {
        Self {
            probe,
            verdicts: HashMap::new(),
        }
    }

    /// Ok for local endpoints and reachable peers; `Unreachable`
    /// otherwise, cached for the rest of the tick.
    pub fn check(&mut self, endpoint: &Endpoint) -> Result<(), EndpointError> {
        let Some((host, port)) = endpoint.host_port() else {
            return Ok(());
        };
        let probe = self.probe;
        let verdict = self
            .verdicts
            .entry((host.to_string(), port))
            .or_insert_with(|| probe.probe(host, port).err());
        match verdict {
            None => Ok(()),
            Some(reason) => Err(EndpointError::Unreachable {
                host: host.to_string(),
                port,
                reason: reason.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn template_expansion() {
        let ep = Endpoint::remote("backup.example.net", 2222, "zsnap", DEFAULT_COMMAND);
        assert_eq!(
            ep.ssh_argv(),
            vec!["ssh", "-l", "zsnap", "-p", "2222", "backup.example.net"]
        );
    }

    #[test]
    fn local_endpoint_has_no_ssh_argv() {
        let ep = Endpoint::local();
        assert!(ep.is_local());
        assert!(ep.ssh_argv().is_empty());
        assert_eq!(ep.describe(), "local");
    }

    #[test]
    fn shell_command_wraps_remote_script() {
        let ep = Endpoint::remote("peer", 22, "root", DEFAULT_COMMAND);
        let cmd = ep.shell_command("zfs list -pH");
        assert_eq!(cmd.get_program(), "ssh");
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy()).collect();
        assert_eq!(args.last().map(AsRef::as_ref), Some("zfs list -pH"));
    }

    struct CountingProbe {
        calls: Cell<u32>,
        reachable: bool,
    }

    impl Probe for CountingProbe {
        fn probe(&self, _host: &str, _port: u16) -> Result<(), String> {
            self.calls.set(self.calls.get() + 1);
            if self.reachable {
                Ok(())
            } else {
                Err("connection refused".to_string())
            }
        }
    }

    #[test]
    fn cache_probes_each_peer_once() {
        let probe = CountingProbe {
            calls: Cell::new(0),
            reachable: false,
        };
        let mut cache = ReachabilityCache::new(&probe);
        let ep = Endpoint::remote("peer", 22, "root", DEFAULT_COMMAND);
        assert!(cache.check(&ep).is_err());
        assert!(cache.check(&ep).is_err());
        assert_eq!(probe.calls.get(), 1);
    }

    #[test]
    fn local_endpoints_are_always_reachable() {
        let probe = CountingProbe {
            calls: Cell::new(0),
            reachable: false,
        };
        let mut cache = ReachabilityCache::new(&probe);
        assert!(cache.check(&Endpoint::local()).is_ok());
        assert_eq!(probe.calls.get(), 0);
    }
}
