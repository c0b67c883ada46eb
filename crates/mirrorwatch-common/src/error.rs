//! Error types for mirrorwatch
//!
//! Every variant carries the namespace, pool, or path it relates to so that a
//! single log line is enough to locate the failing resource.

use thiserror::Error;

/// Main error type for mirrorwatch operations
#[derive(Debug, Error)]
pub enum Error {
    /// Namespace is not in the configured allow-list
    #[error("rbd-mirror status collection from namespace {namespace:?} is not allowed")]
    NotAllowedNamespace {
        /// Namespace that was rejected
        namespace: String,
    },

    /// The monitor secret could not be read
    #[error("failed to get secret {namespace}/{name}: {message}")]
    SecretLookup {
        /// Namespace of the secret
        namespace: String,
        /// Name of the secret
        name: String,
        /// Underlying failure
        message: String,
    },

    /// The monitor secret exists but lacks the client key
    #[error("secret {namespace}/{name} is missing key {key:?}")]
    SecretFieldMissing {
        /// Namespace of the secret
        namespace: String,
        /// Name of the secret
        name: String,
        /// Data key that was expected
        key: String,
    },

    /// The CSI config map could not be read
    #[error("failed to get configmap {namespace}/{name}: {message}")]
    ConfigLookup {
        /// Namespace of the config map
        namespace: String,
        /// Name of the config map
        name: String,
        /// Underlying failure
        message: String,
    },

    /// The CSI config map exists but lacks the cluster config key
    #[error("configmap {namespace}/{name} is missing key {key:?}")]
    ConfigFieldMissing {
        /// Namespace of the config map
        namespace: String,
        /// Name of the config map
        name: String,
        /// Data key that was expected
        key: String,
    },

    /// The CSI cluster config JSON could not be decoded
    #[error("failed to parse CSI cluster config in namespace {namespace:?}: {message}")]
    ConfigParse {
        /// Namespace of the config map
        namespace: String,
        /// Decoder error
        message: String,
    },

    /// The CSI cluster config list is empty
    #[error("expected 1 or more CSI cluster configs but found 0 in namespace {namespace:?}")]
    NoClusterConfig {
        /// Namespace of the config map
        namespace: String,
    },

    /// The first CSI cluster config has no monitors
    #[error("expected 1 or more monitors for cluster {cluster_id:?} but found 0 in namespace {namespace:?}")]
    NoMonitors {
        /// Namespace of the config map
        namespace: String,
        /// Cluster ID of the first config record
        cluster_id: String,
    },

    /// Monitor, client id, and key are all empty
    #[error("unable to get rbd mirror status for pool {pool:?}: credentials not specified")]
    IncompleteCredentials {
        /// Pool the status was requested for
        pool: String,
    },

    /// The status command failed to spawn, exited non-zero, or timed out
    #[error("rbd command failed for pool {pool:?}: {message}")]
    CommandExecution {
        /// Pool the status was requested for
        pool: String,
        /// Exit status or spawn failure and captured stderr
        message: String,
    },

    /// The status command output is not a valid mirror status document
    #[error("failed to parse rbd mirror status for pool {pool:?}: {message}")]
    ResponseParse {
        /// Pool the status was requested for
        pool: String,
        /// Decoder error
        message: String,
    },

    /// An event carried an object that is not a pool resource
    #[error("unexpected object: expected {expected}, found {found}")]
    TypeMismatch {
        /// Expected apiVersion/kind
        expected: String,
        /// What the object actually was
        found: String,
    },

    /// A pool object is missing metadata required to key it
    #[error("pool object {name:?} is missing metadata.{field}")]
    MissingMetadata {
        /// Name of the object (may be empty)
        name: String,
        /// Missing metadata field, e.g. "uid"
        field: String,
    },

    /// Local Ceph configuration could not be prepared
    #[error("failed to prepare ceph config at {path}: {message}")]
    BootstrapFatal {
        /// Path that could not be created or written
        path: String,
        /// Underlying I/O error
        message: String,
    },
}

impl Error {
    /// Create a NotAllowedNamespace error
    pub fn not_allowed(namespace: impl Into<String>) -> Self {
        Self::NotAllowedNamespace {
            namespace: namespace.into(),
        }
    }

    /// Create a CommandExecution error for a pool
    pub fn command(pool: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::CommandExecution {
            pool: pool.into(),
            message: msg.into(),
        }
    }

    /// Create a ResponseParse error for a pool
    pub fn response_parse(pool: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ResponseParse {
            pool: pool.into(),
            message: msg.into(),
        }
    }

    /// Create a TypeMismatch error
    pub fn type_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Create a BootstrapFatal error for a path
    pub fn bootstrap(path: impl std::fmt::Display, msg: impl Into<String>) -> Self {
        Self::BootstrapFatal {
            path: path.to_string(),
            message: msg.into(),
        }
    }

    /// Whether this error came from credential resolution
    ///
    /// Credential errors are not cached, so they clear up on their own once
    /// the Secret and ConfigMap are fixed.
    pub fn is_credential_error(&self) -> bool {
        matches!(
            self,
            Self::NotAllowedNamespace { .. }
                | Self::SecretLookup { .. }
                | Self::SecretFieldMissing { .. }
                | Self::ConfigLookup { .. }
                | Self::ConfigFieldMissing { .. }
                | Self::ConfigParse { .. }
                | Self::NoClusterConfig { .. }
                | Self::NoMonitors { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_allowed_message_names_namespace() {
        let err = Error::not_allowed("tenant-a");
        assert_eq!(
            err.to_string(),
            "rbd-mirror status collection from namespace \"tenant-a\" is not allowed"
        );
    }

    #[test]
    fn command_error_includes_pool_and_cause() {
        let err = Error::command("replicapool", "exit status 2: pool not found");
        let msg = err.to_string();
        assert!(msg.contains("replicapool"));
        assert!(msg.contains("exit status 2"));
    }

    #[test]
    fn credential_errors_are_classified() {
        assert!(Error::not_allowed("ns").is_credential_error());
        assert!(Error::NoMonitors {
            namespace: "ns".into(),
            cluster_id: "c1".into(),
        }
        .is_credential_error());
        assert!(!Error::command("p", "boom").is_credential_error());
        assert!(!Error::type_mismatch("a", "b").is_credential_error());
    }

    #[test]
    fn bootstrap_error_formats_path() {
        let err = Error::bootstrap("/etc/ceph/ceph.conf", "permission denied");
        assert_eq!(
            err.to_string(),
            "failed to prepare ceph config at /etc/ceph/ceph.conf: permission denied"
        );
    }
}
