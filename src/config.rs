//! Command-line and environment configuration

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use thiserror::Error;

use mirrorwatch_cache::bootstrap::DEFAULT_CEPH_CONFIG_DIR;
use mirrorwatch_cache::{CephConfigPaths, ResyncMode};
use mirrorwatch_common::telemetry::LogFormat;

/// Invalid configuration values
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// No usable namespace in the allow-list
    #[error("--allowed-namespaces must name at least one namespace")]
    NoAllowedNamespaces,

    /// Resync interval of zero
    #[error("--resync-interval-secs must be greater than 0")]
    ZeroResyncInterval,
}

/// How resync sweeps lock the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResyncModeArg {
    /// Hold the store lock for the whole sweep
    HoldLock,
    /// Fetch unlocked and commit per entry
    PerEntry,
}

impl From<ResyncModeArg> for ResyncMode {
    fn from(arg: ResyncModeArg) -> Self {
        match arg {
            ResyncModeArg::HoldLock => ResyncMode::HoldLock,
            ResyncModeArg::PerEntry => ResyncMode::PerEntry,
        }
    }
}

/// mirrorwatch - cache RBD mirror pool status for CephBlockPools
#[derive(Parser, Debug, Clone)]
#[command(name = "mirrorwatch", version, about, long_about = None)]
pub struct Cli {
    /// Namespaces whose pools may be queried (comma-separated)
    #[arg(
        long,
        env = "MIRRORWATCH_ALLOWED_NAMESPACES",
        value_delimiter = ',',
        required = true
    )]
    pub allowed_namespaces: Vec<String>,

    /// Seconds between resync sweeps
    #[arg(long, env = "MIRRORWATCH_RESYNC_INTERVAL_SECS", default_value_t = 60)]
    pub resync_interval_secs: u64,

    /// Timeout for a single rbd call in seconds (0 disables)
    #[arg(long, env = "MIRRORWATCH_COMMAND_TIMEOUT_SECS", default_value_t = 30)]
    pub command_timeout_secs: u64,

    /// Directory for ceph.conf and the keyring placeholder
    #[arg(long, env = "MIRRORWATCH_CEPH_CONFIG_DIR", default_value = DEFAULT_CEPH_CONFIG_DIR)]
    pub ceph_config_dir: PathBuf,

    /// Store locking during resync
    #[arg(
        long,
        env = "MIRRORWATCH_RESYNC_MODE",
        value_enum,
        default_value_t = ResyncModeArg::HoldLock
    )]
    pub resync_mode: ResyncModeArg,

    /// Field selector for the CephBlockPool watch, e.g. `metadata.namespace=openshift-storage`
    #[arg(long, env = "MIRRORWATCH_FIELD_SELECTOR")]
    pub field_selector: Option<String>,

    /// Kubeconfig to use instead of in-cluster / default discovery
    #[arg(long, env = "MIRRORWATCH_KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Log output format (json or text)
    #[arg(long, env = "MIRRORWATCH_LOG_FORMAT", default_value = "json")]
    pub log_format: LogFormat,
}

/// Validated runtime configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub allowed_namespaces: Vec<String>,
    pub resync_interval: Duration,
    /// `None` waits for rbd indefinitely
    pub command_timeout: Option<Duration>,
    pub ceph_config: CephConfigPaths,
    pub resync_mode: ResyncMode,
    pub field_selector: Option<String>,
    pub kubeconfig: Option<PathBuf>,
    pub log_format: LogFormat,
}

impl TryFrom<Cli> for Config {
    type Error = ConfigError;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let allowed_namespaces: Vec<String> = cli
            .allowed_namespaces
            .iter()
            .map(|ns| ns.trim())
            .filter(|ns| !ns.is_empty())
            .map(str::to_string)
            .collect();
        if allowed_namespaces.is_empty() {
            return Err(ConfigError::NoAllowedNamespaces);
        }

        if cli.resync_interval_secs == 0 {
            return Err(ConfigError::ZeroResyncInterval);
        }

        Ok(Self {
            allowed_namespaces,
            resync_interval: Duration::from_secs(cli.resync_interval_secs),
            command_timeout: (cli.command_timeout_secs > 0)
                .then(|| Duration::from_secs(cli.command_timeout_secs)),
            ceph_config: CephConfigPaths::under(cli.ceph_config_dir),
            resync_mode: cli.resync_mode.into(),
            field_selector: cli.field_selector.filter(|s| !s.trim().is_empty()),
            kubeconfig: cli.kubeconfig,
            log_format: cli.log_format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("mirrorwatch").chain(args.iter().copied()))
            .expect("arguments should parse")
    }

    #[test]
    fn defaults() {
        let config = Config::try_from(parse(&["--allowed-namespaces", "openshift-storage"])).unwrap();

        assert_eq!(config.allowed_namespaces, vec!["openshift-storage"]);
        assert_eq!(config.resync_interval, Duration::from_secs(60));
        assert_eq!(config.command_timeout, Some(Duration::from_secs(30)));
        assert!(config.ceph_config.is_default());
        assert_eq!(config.resync_mode, ResyncMode::HoldLock);
        assert_eq!(config.field_selector, None);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn namespace_list_is_split_and_trimmed() {
        let config =
            Config::try_from(parse(&["--allowed-namespaces", "ns1, ns2,,ns3"])).unwrap();
        assert_eq!(config.allowed_namespaces, vec!["ns1", "ns2", "ns3"]);
    }

    #[test]
    fn explicit_values() {
        let config = Config::try_from(parse(&[
            "--allowed-namespaces",
            "ns1",
            "--resync-interval-secs",
            "15",
            "--command-timeout-secs",
            "0",
            "--ceph-config-dir",
            "/var/lib/mirrorwatch/ceph",
            "--resync-mode",
            "per-entry",
            "--field-selector",
            "metadata.namespace=ns1",
            "--log-format",
            "text",
        ]))
        .unwrap();

        assert_eq!(config.resync_interval, Duration::from_secs(15));
        assert_eq!(config.command_timeout, None);
        assert_eq!(
            config.ceph_config.config,
            PathBuf::from("/var/lib/mirrorwatch/ceph/ceph.conf")
        );
        assert_eq!(config.resync_mode, ResyncMode::PerEntry);
        assert_eq!(config.field_selector.as_deref(), Some("metadata.namespace=ns1"));
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn rejects_blank_namespaces() {
        assert_eq!(
            Config::try_from(parse(&["--allowed-namespaces", " , "])),
            Err(ConfigError::NoAllowedNamespaces)
        );
    }

    #[test]
    fn rejects_zero_interval() {
        assert_eq!(
            Config::try_from(parse(&[
                "--allowed-namespaces",
                "ns1",
                "--resync-interval-secs",
                "0"
            ])),
            Err(ConfigError::ZeroResyncInterval)
        );
    }

    #[test]
    fn allowed_namespaces_are_required() {
        assert!(Cli::try_parse_from(["mirrorwatch"]).is_err());
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        assert!(Cli::try_parse_from([
            "mirrorwatch",
            "--allowed-namespaces",
            "ns1",
            "--log-format",
            "xml"
        ])
        .is_err());
    }
}
