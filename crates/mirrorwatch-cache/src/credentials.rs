//! Per-namespace Ceph credential resolution
//!
//! The credential triple for `rbd` is assembled from two Rook-managed
//! objects in the pool's namespace:
//! - Secret `rook-ceph-mon`, key `ceph-secret` → client key
//! - ConfigMap `rook-ceph-csi-config`, key `csi-cluster-config-json` → monitor
//!
//! Resolved triples are cached forever (until [`CredentialResolver::invalidate`]
//! or [`CredentialResolver::refresh`]); failed resolutions are never cached.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{Api, Client};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use mirrorwatch_common::{
    Error, CEPH_CLIENT_ID, CSI_CONFIG_KEY, CSI_CONFIG_MAP_NAME, MON_SECRET_KEY, MON_SECRET_NAME,
};

use crate::Result;

/// Credentials for one `rbd` invocation
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialInput {
    /// Monitor address, e.g. `10.0.0.1:6789`
    pub monitor: String,
    /// Ceph client id
    pub id: String,
    /// cephx key
    pub key: String,
}

impl CredentialInput {
    /// True when monitor, id, and key are all empty
    pub fn is_empty(&self) -> bool {
        self.monitor.is_empty() && self.id.is_empty() && self.key.is_empty()
    }
}

impl fmt::Debug for CredentialInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialInput")
            .field("monitor", &self.monitor)
            .field("id", &self.id)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// One entry of the CSI cluster config list
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ClusterConfigRecord {
    /// Ceph cluster fsid
    #[serde(rename = "clusterID", default)]
    pub cluster_id: String,
    /// Monitor addresses
    #[serde(default)]
    pub monitors: Vec<String>,
}

/// Source of the Secret and ConfigMap data the resolver reads
///
/// Errors are plain strings; the resolver wraps them with namespace and
/// object context.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Data of a Secret (absent secrets are an error)
    async fn secret_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> std::result::Result<BTreeMap<String, Vec<u8>>, String>;

    /// Data of a ConfigMap (absent config maps are an error)
    async fn config_map_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> std::result::Result<BTreeMap<String, String>, String>;
}

/// [`RecordSource`] backed by the Kubernetes API
pub struct KubeRecordSource {
    client: Client,
}

impl KubeRecordSource {
    /// Create a source using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RecordSource for KubeRecordSource {
    async fn secret_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> std::result::Result<BTreeMap<String, Vec<u8>>, String> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = secrets
            .get_opt(name)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| "not found".to_string())?;

        Ok(secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, v.0))
            .collect())
    }

    async fn config_map_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> std::result::Result<BTreeMap<String, String>, String> {
        let config_maps: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let config_map = config_maps
            .get_opt(name)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| "not found".to_string())?;

        Ok(config_map.data.unwrap_or_default())
    }
}

/// Resolves and caches [`CredentialInput`] per namespace
pub struct CredentialResolver {
    source: Arc<dyn RecordSource>,
    allowed_namespaces: HashSet<String>,
    cache: RwLock<HashMap<String, CredentialInput>>,
}

impl CredentialResolver {
    /// Create a resolver restricted to `allowed_namespaces`
    pub fn new<I, S>(source: Arc<dyn RecordSource>, allowed_namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            source,
            allowed_namespaces: allowed_namespaces.into_iter().map(Into::into).collect(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Whether `namespace` is in the allow-list
    pub fn is_allowed(&self, namespace: &str) -> bool {
        self.allowed_namespaces.contains(namespace)
    }

    /// Whether credentials for `namespace` are cached
    pub async fn is_cached(&self, namespace: &str) -> bool {
        self.cache.read().await.contains_key(namespace)
    }

    /// Credentials for `namespace`, from cache or by reading the cluster.
    pub async fn resolve(&self, namespace: &str) -> Result<CredentialInput> {
        if !self.is_allowed(namespace) {
            return Err(Error::not_allowed(namespace));
        }

        if let Some(input) = self.cache.read().await.get(namespace) {
            return Ok(input.clone());
        }

        self.refresh(namespace).await
    }

    /// Re-read credentials for `namespace`, replacing any cached value.
    ///
    /// The cache is only written on success, so a failed refresh keeps the
    /// previously resolved triple.
    pub async fn refresh(&self, namespace: &str) -> Result<CredentialInput> {
        if !self.is_allowed(namespace) {
            return Err(Error::not_allowed(namespace));
        }

        let input = self.lookup(namespace).await?;
        self.cache
            .write()
            .await
            .insert(namespace.to_string(), input.clone());
        info!(namespace = %namespace, monitor = %input.monitor, "Resolved rbd credentials");
        Ok(input)
    }

    /// Drop cached credentials for `namespace`. Returns whether any were cached.
    pub async fn invalidate(&self, namespace: &str) -> bool {
        let removed = self.cache.write().await.remove(namespace).is_some();
        if removed {
            debug!(namespace = %namespace, "Invalidated cached rbd credentials");
        }
        removed
    }

    async fn lookup(&self, namespace: &str) -> Result<CredentialInput> {
        let secret = self
            .source
            .secret_data(namespace, MON_SECRET_NAME)
            .await
            .map_err(|message| Error::SecretLookup {
                namespace: namespace.to_string(),
                name: MON_SECRET_NAME.to_string(),
                message,
            })?;
        let key = secret
            .get(MON_SECRET_KEY)
            .ok_or_else(|| Error::SecretFieldMissing {
                namespace: namespace.to_string(),
                name: MON_SECRET_NAME.to_string(),
                key: MON_SECRET_KEY.to_string(),
            })?;
        let key = String::from_utf8(key.clone()).map_err(|e| Error::SecretLookup {
            namespace: namespace.to_string(),
            name: MON_SECRET_NAME.to_string(),
            message: format!("{} is not valid UTF-8: {}", MON_SECRET_KEY, e),
        })?;

        let data = self
            .source
            .config_map_data(namespace, CSI_CONFIG_MAP_NAME)
            .await
            .map_err(|message| Error::ConfigLookup {
                namespace: namespace.to_string(),
                name: CSI_CONFIG_MAP_NAME.to_string(),
                message,
            })?;
        let raw = data
            .get(CSI_CONFIG_KEY)
            .ok_or_else(|| Error::ConfigFieldMissing {
                namespace: namespace.to_string(),
                name: CSI_CONFIG_MAP_NAME.to_string(),
                key: CSI_CONFIG_KEY.to_string(),
            })?;

        let monitor = first_monitor(namespace, raw)?;

        Ok(CredentialInput {
            monitor,
            id: CEPH_CLIENT_ID.to_string(),
            key,
        })
    }
}

/// First monitor of the first cluster in a CSI cluster config document
fn first_monitor(namespace: &str, raw: &str) -> Result<String> {
    let records: Vec<ClusterConfigRecord> =
        serde_json::from_str(raw).map_err(|e| Error::ConfigParse {
            namespace: namespace.to_string(),
            message: e.to_string(),
        })?;

    let first = records.first().ok_or_else(|| Error::NoClusterConfig {
        namespace: namespace.to_string(),
    })?;

    first
        .monitors
        .first()
        .cloned()
        .ok_or_else(|| Error::NoMonitors {
            namespace: namespace.to_string(),
            cluster_id: first.cluster_id.clone(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::*;

    const CLUSTER_CONFIG: &str = r#"[{"clusterID":"c1","monitors":["10.0.0.1:6789"]}]"#;

    fn secret(key: &str) -> BTreeMap<String, Vec<u8>> {
        BTreeMap::from([(MON_SECRET_KEY.to_string(), key.as_bytes().to_vec())])
    }

    fn config_map(json: &str) -> BTreeMap<String, String> {
        BTreeMap::from([(CSI_CONFIG_KEY.to_string(), json.to_string())])
    }

    fn mock_with(
        secret_data: BTreeMap<String, Vec<u8>>,
        config_data: BTreeMap<String, String>,
    ) -> MockRecordSource {
        let mut source = MockRecordSource::new();
        source
            .expect_secret_data()
            .returning(move |_, _| Ok(secret_data.clone()));
        source
            .expect_config_map_data()
            .returning(move |_, _| Ok(config_data.clone()));
        source
    }

    fn resolver(source: MockRecordSource) -> CredentialResolver {
        CredentialResolver::new(Arc::new(source), ["ns1"])
    }

    #[tokio::test]
    async fn resolves_and_caches_credentials() {
        let mut source = MockRecordSource::new();
        source
            .expect_secret_data()
            .with(eq("ns1"), eq(MON_SECRET_NAME))
            .times(1)
            .returning(|_, _| Ok(secret("AQABCDEF==")));
        source
            .expect_config_map_data()
            .with(eq("ns1"), eq(CSI_CONFIG_MAP_NAME))
            .times(1)
            .returning(|_, _| Ok(config_map(CLUSTER_CONFIG)));
        let resolver = resolver(source);

        let expected = CredentialInput {
            monitor: "10.0.0.1:6789".to_string(),
            id: "admin".to_string(),
            key: "AQABCDEF==".to_string(),
        };
        assert_eq!(resolver.resolve("ns1").await.unwrap(), expected);
        // Served from cache; the mock would panic on a second lookup
        assert_eq!(resolver.resolve("ns1").await.unwrap(), expected);
        assert!(resolver.is_cached("ns1").await);
    }

    #[tokio::test]
    async fn disallowed_namespace_performs_no_lookups() {
        let mut source = MockRecordSource::new();
        source.expect_secret_data().never();
        source.expect_config_map_data().never();
        let resolver = resolver(source);

        let err = resolver.resolve("other").await.unwrap_err();
        assert!(matches!(err, Error::NotAllowedNamespace { ref namespace } if namespace == "other"));

        let err = resolver.refresh("other").await.unwrap_err();
        assert!(matches!(err, Error::NotAllowedNamespace { .. }));
    }

    #[tokio::test]
    async fn secret_lookup_failure() {
        let mut source = MockRecordSource::new();
        source
            .expect_secret_data()
            .returning(|_, _| Err("not found".to_string()));
        source.expect_config_map_data().never();

        let err = resolver(source).resolve("ns1").await.unwrap_err();
        assert!(matches!(err, Error::SecretLookup { ref message, .. } if message == "not found"));
    }

    #[tokio::test]
    async fn secret_field_missing() {
        let source = mock_with(BTreeMap::new(), config_map(CLUSTER_CONFIG));
        let err = resolver(source).resolve("ns1").await.unwrap_err();
        assert!(matches!(err, Error::SecretFieldMissing { .. }));
    }

    #[tokio::test]
    async fn config_lookup_failure() {
        let mut source = MockRecordSource::new();
        source
            .expect_secret_data()
            .returning(|_, _| Ok(secret("AQABCDEF==")));
        source
            .expect_config_map_data()
            .returning(|_, _| Err("forbidden".to_string()));

        let err = resolver(source).resolve("ns1").await.unwrap_err();
        assert!(matches!(err, Error::ConfigLookup { .. }));
    }

    #[tokio::test]
    async fn config_field_missing() {
        let source = mock_with(secret("AQABCDEF=="), BTreeMap::new());
        let err = resolver(source).resolve("ns1").await.unwrap_err();
        assert!(matches!(err, Error::ConfigFieldMissing { .. }));
    }

    #[tokio::test]
    async fn config_parse_failure() {
        let source = mock_with(secret("AQABCDEF=="), config_map("{not json"));
        let err = resolver(source).resolve("ns1").await.unwrap_err();
        assert!(matches!(err, Error::ConfigParse { .. }));
    }

    #[tokio::test]
    async fn empty_cluster_config() {
        let source = mock_with(secret("AQABCDEF=="), config_map("[]"));
        let err = resolver(source).resolve("ns1").await.unwrap_err();
        assert!(matches!(err, Error::NoClusterConfig { .. }));
    }

    #[tokio::test]
    async fn empty_monitor_list() {
        let source = mock_with(
            secret("AQABCDEF=="),
            config_map(r#"[{"clusterID":"c1","monitors":[]}]"#),
        );
        let err = resolver(source).resolve("ns1").await.unwrap_err();
        assert!(matches!(err, Error::NoMonitors { ref cluster_id, .. } if cluster_id == "c1"));
    }

    #[tokio::test]
    async fn only_first_monitor_of_first_cluster_is_used() {
        let source = mock_with(
            secret("AQABCDEF=="),
            config_map(
                r#"[{"clusterID":"c1","monitors":["10.0.0.1:6789","10.0.0.2:6789"]},
                    {"clusterID":"c2","monitors":["10.1.0.1:6789"]}]"#,
            ),
        );
        let input = resolver(source).resolve("ns1").await.unwrap();
        assert_eq!(input.monitor, "10.0.0.1:6789");
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let mut source = MockRecordSource::new();
        source
            .expect_secret_data()
            .times(2)
            .returning(|_, _| Err("not found".to_string()));
        let resolver = resolver(source);

        assert!(resolver.resolve("ns1").await.is_err());
        assert!(resolver.resolve("ns1").await.is_err());
        assert!(!resolver.is_cached("ns1").await);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_credentials() {
        let mut source = MockRecordSource::new();
        let mut seq = mockall::Sequence::new();
        source
            .expect_secret_data()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(secret("AQABCDEF==")));
        source
            .expect_secret_data()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err("connection refused".to_string()));
        source
            .expect_config_map_data()
            .times(1)
            .returning(|_, _| Ok(config_map(CLUSTER_CONFIG)));
        let resolver = resolver(source);

        let first = resolver.resolve("ns1").await.unwrap();
        assert!(resolver.refresh("ns1").await.is_err());
        assert_eq!(resolver.resolve("ns1").await.unwrap(), first);
    }

    #[tokio::test]
    async fn invalidate_forces_relookup() {
        let mut source = MockRecordSource::new();
        source
            .expect_secret_data()
            .times(2)
            .returning(|_, _| Ok(secret("AQABCDEF==")));
        source
            .expect_config_map_data()
            .times(2)
            .returning(|_, _| Ok(config_map(CLUSTER_CONFIG)));
        let resolver = resolver(source);

        resolver.resolve("ns1").await.unwrap();
        assert!(resolver.invalidate("ns1").await);
        assert!(!resolver.invalidate("ns1").await);
        resolver.resolve("ns1").await.unwrap();
    }

    #[test]
    fn debug_redacts_key() {
        let input = CredentialInput {
            monitor: "10.0.0.1:6789".to_string(),
            id: "admin".to_string(),
            key: "AQABCDEF==".to_string(),
        };
        let rendered = format!("{:?}", input);
        assert!(rendered.contains("10.0.0.1:6789"));
        assert!(!rendered.contains("AQABCDEF=="));
    }

    #[test]
    fn empty_credentials() {
        let input = CredentialInput {
            monitor: String::new(),
            id: String::new(),
            key: String::new(),
        };
        assert!(input.is_empty());
    }
}
