//! Mirror status retrieval via the `rbd` CLI
//!
//! Fetching is split into two fallible steps so each boundary can fail on
//! its own in tests:
//! 1. [`CommandRunner::run`] executes the process and returns stdout
//! 2. [`decode_status`] decodes the JSON document
//!
//! [`RbdStatusFetcher`] combines both behind the [`StatusSource`] trait that
//! the store depends on.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use mirrorwatch_common::Error;

use crate::credentials::CredentialInput;
use crate::status::{decode_status, MirrorStatus};
use crate::Result;

/// Program invoked for status queries
pub const RBD_COMMAND: &str = "rbd";

/// Default timeout for a single status query
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Arguments for `rbd mirror pool status` against `pool`
pub fn status_args(pool: &str, credentials: &CredentialInput) -> Vec<String> {
    [
        "mirror",
        "pool",
        "status",
        pool,
        "--verbose",
        "--format",
        "json",
        "-m",
        credentials.monitor.as_str(),
        "--id",
        credentials.id.as_str(),
        "--key",
        credentials.key.as_str(),
        "--debug-rbd",
        "0",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Executes an external program and returns its stdout
///
/// Errors are human-readable descriptions (spawn failure, exit status and
/// stderr, timeout).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` to completion
    async fn run(&self, program: &str, args: &[String]) -> std::result::Result<Vec<u8>, String>;
}

/// [`CommandRunner`] that spawns real processes with `tokio::process`
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
    envs: Vec<(String, String)>,
}

impl ProcessRunner {
    /// Runner with the given timeout (`None` waits indefinitely)
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            envs: Vec::new(),
        }
    }

    /// Set an environment variable on every spawned process
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(Some(DEFAULT_COMMAND_TIMEOUT))
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[String]) -> std::result::Result<Vec<u8>, String> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .kill_on_drop(true);

        let output = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, cmd.output())
                .await
                .map_err(|_| format!("timed out after {:?}", timeout))?,
            None => cmd.output().await,
        }
        .map_err(|e| format!("failed to execute {}: {}", program, e))?;

        if output.status.success() {
            Ok(output.stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(format!("{}: {}", output.status, stderr.trim()))
        }
    }
}

/// Source of mirror status for a pool
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Fetch the current mirror status of `pool`
    async fn fetch(&self, pool: &str, credentials: &CredentialInput) -> Result<MirrorStatus>;
}

/// [`StatusSource`] that queries `rbd mirror pool status`
pub struct RbdStatusFetcher {
    runner: Arc<dyn CommandRunner>,
}

impl RbdStatusFetcher {
    /// Create a fetcher that executes through `runner`
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl StatusSource for RbdStatusFetcher {
    async fn fetch(&self, pool: &str, credentials: &CredentialInput) -> Result<MirrorStatus> {
        if credentials.is_empty() {
            return Err(Error::IncompleteCredentials {
                pool: pool.to_string(),
            });
        }

        debug!(pool = %pool, monitor = %credentials.monitor, "Querying rbd mirror pool status");
        let output = self
            .runner
            .run(RBD_COMMAND, &status_args(pool, credentials))
            .await
            .map_err(|e| {
                warn!(pool = %pool, error = %e, "rbd mirror pool status failed");
                Error::command(pool, e)
            })?;

        decode_status(&output).map_err(|e| Error::response_parse(pool, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> CredentialInput {
        CredentialInput {
            monitor: "10.0.0.1:6789".to_string(),
            id: "admin".to_string(),
            key: "AQABCDEF==".to_string(),
        }
    }

    fn expected_args() -> Vec<String> {
        [
            "mirror",
            "pool",
            "status",
            "pool1",
            "--verbose",
            "--format",
            "json",
            "-m",
            "10.0.0.1:6789",
            "--id",
            "admin",
            "--key",
            "AQABCDEF==",
            "--debug-rbd",
            "0",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    #[test]
    fn builds_status_command_arguments() {
        assert_eq!(status_args("pool1", &credentials()), expected_args());
    }

    #[tokio::test]
    async fn fetch_runs_rbd_once_and_decodes() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .times(1)
            .returning(|program, args| {
                assert_eq!(program, RBD_COMMAND);
                assert_eq!(args, expected_args().as_slice());
                Ok(br#"{"summary":{"health":"OK","daemon_health":"OK","image_health":"OK","states":{}},"daemons":[],"images":[]}"#.to_vec())
            });

        let fetcher = RbdStatusFetcher::new(Arc::new(runner));
        let status = fetcher.fetch("pool1", &credentials()).await.unwrap();
        assert_eq!(status.summary.health, "OK");
    }

    #[tokio::test]
    async fn empty_credentials_never_spawn() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().never();

        let fetcher = RbdStatusFetcher::new(Arc::new(runner));
        let empty = CredentialInput {
            monitor: String::new(),
            id: String::new(),
            key: String::new(),
        };
        let err = fetcher.fetch("pool1", &empty).await.unwrap_err();
        assert!(matches!(err, Error::IncompleteCredentials { .. }));
    }

    #[tokio::test]
    async fn execution_failure_is_command_error() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(|_, _| Err("exit status: 2: rbd: mirroring not enabled".to_string()));

        let fetcher = RbdStatusFetcher::new(Arc::new(runner));
        let err = fetcher.fetch("pool1", &credentials()).await.unwrap_err();
        match err {
            Error::CommandExecution { pool, message } => {
                assert_eq!(pool, "pool1");
                assert!(message.contains("mirroring not enabled"));
            }
            other => panic!("expected CommandExecution, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_output_is_parse_error() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(|_, _| Ok(b"2024-03-01 warning: something odd".to_vec()));

        let fetcher = RbdStatusFetcher::new(Arc::new(runner));
        let err = fetcher.fetch("pool1", &credentials()).await.unwrap_err();
        assert!(matches!(err, Error::ResponseParse { ref pool, .. } if pool == "pool1"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_runner_returns_stdout() {
        let runner = ProcessRunner::default();
        let out = runner
            .run("sh", &["-c".to_string(), "printf '{}'".to_string()])
            .await
            .unwrap();
        assert_eq!(out, b"{}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_runner_reports_exit_status_and_stderr() {
        let runner = ProcessRunner::default();
        let err = runner
            .run("sh", &["-c".to_string(), "echo boom >&2; exit 3".to_string()])
            .await
            .unwrap_err();
        assert!(err.contains("boom"));
        assert!(err.contains('3'));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_runner_passes_environment() {
        let runner = ProcessRunner::default().with_env("CEPH_CONF", "/tmp/ceph.conf");
        let out = runner
            .run("sh", &["-c".to_string(), "printf %s \"$CEPH_CONF\"".to_string()])
            .await
            .unwrap();
        assert_eq!(out, b"/tmp/ceph.conf");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_runner_times_out() {
        let runner = ProcessRunner::new(Some(Duration::from_millis(100)));
        let err = runner
            .run("sleep", &["5".to_string()])
            .await
            .unwrap_err();
        assert!(err.contains("timed out"));
    }

    #[tokio::test]
    async fn process_runner_spawn_failure() {
        let runner = ProcessRunner::default();
        let err = runner
            .run("definitely-not-a-real-binary-xyz", &[])
            .await
            .unwrap_err();
        assert!(err.contains("failed to execute"));
    }
}
