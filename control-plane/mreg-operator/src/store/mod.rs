//! Object store contract consumed by the reconciler.
//!
//! The store is versioned: every object carries a `resourceVersion` token and
//! `update`/`update_status` must be rejected with [`StoreError::Conflict`]
//! when the token passed in is stale. The reconciler never retries on its own;
//! conflicts surface to the dispatcher which re-delivers the key.

mod api_server;
mod error;
pub mod memory;

use std::fmt::{self, Debug};

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::{Resource, ResourceExt};
use serde::{Serialize, de::DeserializeOwned};

pub use api_server::KubeStore;
pub use error::*;
pub use memory::MemoryStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Namespace + name identity of a stored object.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn of<K: Resource>(obj: &K) -> Self {
        Self {
            namespace: obj.namespace().unwrap_or_else(|| "default".to_string()),
            name: obj.name_any(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Anything the store can hold: a namespaced, statically typed resource.
pub trait StoredObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> StoredObject for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

pub(crate) fn kind_of<K: StoredObject>() -> String {
    K::kind(&()).to_string()
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read the current object. Missing objects yield [`StoreError::NotFound`].
    async fn get<K: StoredObject>(&self, key: &ObjectKey) -> StoreResult<K>;

    /// Create a new object; the store ignores any status on the payload.
    async fn create<K: StoredObject>(&self, obj: &K) -> StoreResult<K>;

    /// Replace the main body (everything except status), compare-and-swap on
    /// `resourceVersion`.
    async fn update<K: StoredObject>(&self, obj: &K) -> StoreResult<K>;

    /// Replace only the status sub-object, compare-and-swap on
    /// `resourceVersion`.
    async fn update_status<K: StoredObject>(&self, obj: &K) -> StoreResult<K>;
}
