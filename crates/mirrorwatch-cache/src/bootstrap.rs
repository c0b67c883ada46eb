//! Local Ceph configuration required by the `rbd` CLI
//!
//! `rbd` refuses to run without a `ceph.conf` and logs keyring errors when no
//! keyring file exists, even though credentials are passed on the command
//! line. Both files are created once and never overwritten.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use mirrorwatch_common::Error;

use crate::Result;

/// Default Ceph configuration directory
pub const DEFAULT_CEPH_CONFIG_DIR: &str = "/etc/ceph";

/// Minimal ceph.conf requiring cephx everywhere
pub const CEPH_CONFIG: &str = "[global]
auth_cluster_required = cephx
auth_service_required = cephx
auth_client_required = cephx
";

/// Locations of the local Ceph configuration files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CephConfigPaths {
    /// Configuration directory
    pub root: PathBuf,
    /// ceph.conf path
    pub config: PathBuf,
    /// Keyring placeholder path
    pub keyring: PathBuf,
}

impl CephConfigPaths {
    /// Paths rooted at `root` (`<root>/ceph.conf`, `<root>/keyring`)
    pub fn under(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            config: root.join("ceph.conf"),
            keyring: root.join("keyring"),
            root,
        }
    }

    /// Whether these are the paths `rbd` reads without extra configuration
    pub fn is_default(&self) -> bool {
        self.root == Path::new(DEFAULT_CEPH_CONFIG_DIR)
    }
}

impl Default for CephConfigPaths {
    fn default() -> Self {
        Self::under(DEFAULT_CEPH_CONFIG_DIR)
    }
}

/// Create the Ceph config directory, ceph.conf, and an empty keyring.
///
/// Idempotent: existing files are left untouched. Any failure is
/// [`Error::BootstrapFatal`].
pub fn ensure_ceph_config(paths: &CephConfigPaths) -> Result<()> {
    create_config_root(&paths.root)?;

    if create_new_file(&paths.config, 0o600, CEPH_CONFIG.as_bytes())? {
        info!(path = %paths.config.display(), "Wrote ceph config");
    } else {
        debug!(path = %paths.config.display(), "Ceph config already present");
    }

    if create_new_file(&paths.keyring, 0o600, &[])? {
        info!(path = %paths.keyring.display(), "Created keyring placeholder");
    }

    Ok(())
}

fn create_config_root(root: &Path) -> Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o755);
    }
    builder
        .create(root)
        .map_err(|e| Error::bootstrap(root.display(), e.to_string()))
}

/// Create `path` with `contents` unless it exists. Returns whether it was created.
fn create_new_file(path: &Path, mode: u32, contents: &[u8]) -> Result<bool> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    let mut file = match options.open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(Error::bootstrap(path.display(), e.to_string())),
    };

    file.write_all(contents)
        .map_err(|e| Error::bootstrap(path.display(), e.to_string()))?;
    Ok(true)
}
