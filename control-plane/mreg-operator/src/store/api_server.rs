use async_trait::async_trait;
use kube::{
    Api, Client, ResourceExt,
    api::{Patch, PatchParams, PostParams},
};
use serde_json::{Value, json};
use tracing::trace;

use super::{ObjectKey, ObjectStore, StoreError, StoreResult, StoredObject, kind_of};

pub const FIELD_MANAGER: &str = "mreg-operator";

/// [`ObjectStore`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: StoredObject>(&self, ns: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), ns)
    }
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

fn describe<K: StoredObject>(key: &ObjectKey) -> String {
    format!("{} {}", kind_of::<K>(), key)
}

fn map_err<K: StoredObject>(key: &ObjectKey, err: kube::Error) -> StoreError {
    match &err {
        kube::Error::Api(resp) if resp.code == 404 => {
            StoreError::NotFound(describe::<K>(key))
        }
        kube::Error::Api(resp)
            if resp.code == 409 && resp.reason == "AlreadyExists" =>
        {
            StoreError::AlreadyExists(describe::<K>(key))
        }
        kube::Error::Api(resp) if resp.code == 409 => {
            StoreError::Conflict(describe::<K>(key))
        }
        _ => StoreError::Api(err),
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get<K: StoredObject>(&self, key: &ObjectKey) -> StoreResult<K> {
        self.api::<K>(&key.namespace)
            .get(&key.name)
            .await
            .map_err(|e| map_err::<K>(key, e))
    }

    async fn create<K: StoredObject>(&self, obj: &K) -> StoreResult<K> {
        let key = ObjectKey::of(obj);
        trace!(kind = %kind_of::<K>(), %key, "kube: create");
        self.api::<K>(&key.namespace)
            .create(&post_params(), obj)
            .await
            .map_err(|e| map_err::<K>(&key, e))
    }

    async fn update<K: StoredObject>(&self, obj: &K) -> StoreResult<K> {
        let key = ObjectKey::of(obj);
        trace!(kind = %kind_of::<K>(), %key, rv = ?obj.resource_version(), "kube: replace");
        self.api::<K>(&key.namespace)
            .replace(&key.name, &post_params(), obj)
            .await
            .map_err(|e| map_err::<K>(&key, e))
    }

    async fn update_status<K: StoredObject>(&self, obj: &K) -> StoreResult<K> {
        let key = ObjectKey::of(obj);
        let body = serde_json::to_value(obj)?;
        // resourceVersion in a merge patch turns it into a compare-and-swap
        let patch = json!({
            "metadata": { "resourceVersion": obj.resource_version() },
            "status": body.get("status").cloned().unwrap_or(Value::Null),
        });
        trace!(kind = %kind_of::<K>(), %key, "kube: patch status");
        self.api::<K>(&key.namespace)
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_err::<K>(&key, e))
    }
}
