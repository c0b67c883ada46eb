//! Generic resource-store contract
//!
//! Informer-style consumers hand the store untyped objects. [`ResourceStore`]
//! accepts [`DynamicObject`]s, converts them to [`CephBlockPool`] and
//! delegates to the typed [`MirrorStore`] operations. Anything that is not a
//! CephBlockPool is rejected with [`Error::TypeMismatch`](mirrorwatch_common::Error::TypeMismatch).

use async_trait::async_trait;
use kube::api::DynamicObject;

use mirrorwatch_common::crd::CephBlockPool;

use crate::store::MirrorStore;
use crate::Result;

/// Store operations over untyped Kubernetes objects
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Handle a created object
    async fn add(&self, obj: &DynamicObject) -> Result<()>;

    /// Handle a changed object
    async fn update(&self, obj: &DynamicObject) -> Result<()>;

    /// Handle a deleted object
    async fn delete(&self, obj: &DynamicObject) -> Result<()>;

    /// Replace the contents with `objects`, stopping at the first failure
    async fn replace(&self, objects: &[DynamicObject]) -> Result<()>;

    /// Refresh every entry from its source
    async fn resync(&self) -> Result<()>;

    /// Stored objects
    fn list(&self) -> Vec<DynamicObject>;

    /// Keys of stored objects
    fn list_keys(&self) -> Vec<String>;

    /// Look up the stored copy of `obj`
    fn get(&self, obj: &DynamicObject) -> Result<Option<DynamicObject>>;

    /// Look up a stored object by key
    fn get_by_key(&self, key: &str) -> Result<Option<DynamicObject>>;
}

#[async_trait]
impl ResourceStore for MirrorStore {
    async fn add(&self, obj: &DynamicObject) -> Result<()> {
        self.add_pool(&CephBlockPool::from_dynamic(obj)?).await
    }

    async fn update(&self, obj: &DynamicObject) -> Result<()> {
        self.update_pool(&CephBlockPool::from_dynamic(obj)?).await
    }

    async fn delete(&self, obj: &DynamicObject) -> Result<()> {
        self.delete_pool(&CephBlockPool::from_dynamic(obj)?).await
    }

    async fn replace(&self, objects: &[DynamicObject]) -> Result<()> {
        // Convert lazily so items before a bad object are still applied
        self.clear().await;
        for obj in objects {
            self.add_pool(&CephBlockPool::from_dynamic(obj)?).await?;
        }
        Ok(())
    }

    async fn resync(&self) -> Result<()> {
        MirrorStore::resync(self).await;
        Ok(())
    }

    // Reads go through MirrorStore::records; these stay empty.

    fn list(&self) -> Vec<DynamicObject> {
        Vec::new()
    }

    fn list_keys(&self) -> Vec<String> {
        Vec::new()
    }

    fn get(&self, _obj: &DynamicObject) -> Result<Option<DynamicObject>> {
        Ok(None)
    }

    fn get_by_key(&self, _key: &str) -> Result<Option<DynamicObject>> {
        Ok(None)
    }
}
