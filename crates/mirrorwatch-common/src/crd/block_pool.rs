//! CephBlockPool CRD (ceph.rook.io/v1)

use kube::api::DynamicObject;
use kube::{CustomResource, Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Specification of a Rook CephBlockPool, reduced to the fields mirrorwatch reads.
///
/// Example:
/// ```yaml
/// apiVersion: ceph.rook.io/v1
/// kind: CephBlockPool
/// metadata:
///   name: replicapool
///   namespace: openshift-storage
/// spec:
///   mirroring:
///     enabled: true
///     mode: image
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "ceph.rook.io",
    version = "v1",
    kind = "CephBlockPool",
    namespaced,
    status = "CephBlockPoolStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct CephBlockPoolSpec {
    /// RBD mirroring settings for the pool
    #[serde(default)]
    pub mirroring: MirroringSpec,
}

/// Mirroring section of a CephBlockPool spec
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MirroringSpec {
    /// Whether RBD mirroring is enabled for the pool
    #[serde(default)]
    pub enabled: bool,

    /// Mirroring mode ("pool" or "image")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

/// Status reported by Rook for a CephBlockPool
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CephBlockPoolStatus {
    /// Rook's pool phase (e.g. "Ready", "Failure")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

impl CephBlockPool {
    /// Whether mirroring status should be tracked for this pool
    pub fn mirroring_enabled(&self) -> bool {
        self.spec.mirroring.enabled
    }

    /// `apiVersion/kind` string for this resource type
    pub fn type_name() -> String {
        format!("{}/{}", Self::api_version(&()), Self::kind(&()))
    }

    /// Convert an untyped object into a CephBlockPool.
    ///
    /// Fails with [`Error::TypeMismatch`] when the object's `apiVersion`/`kind`
    /// do not name a CephBlockPool or when its body does not decode as one.
    pub fn from_dynamic(obj: &DynamicObject) -> Result<Self, Error> {
        let found = match &obj.types {
            Some(types) => format!("{}/{} {:?}", types.api_version, types.kind, obj.name_any()),
            None => format!("untyped object {:?}", obj.name_any()),
        };

        let matches = obj.types.as_ref().is_some_and(|types| {
            types.api_version == Self::api_version(&()) && types.kind == Self::kind(&())
        });
        if !matches {
            return Err(Error::type_mismatch(Self::type_name(), found));
        }

        obj.clone()
            .try_parse::<CephBlockPool>()
            .map_err(|e| Error::type_mismatch(Self::type_name(), format!("{found}: {e}")))
    }
}
