#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentCondition, DeploymentStatus};
use kube::Resource;
use mreg_operator::controller::{
    Outcome, ReconcileCtx, Reconciler, ReconcilerSettings, RecordingNotifier,
};
use mreg_operator::crd::{
    ModelRegistry, ModelRegistrySpec, PostgresConfig, SecretKeyValue,
};
use mreg_operator::store::{
    MemoryStore, ObjectKey, ObjectStore, StoreError, StoreResult, StoredObject,
};

pub const NS: &str = "registries";

pub type TestReconciler = Reconciler<MemoryStore, RecordingNotifier>;

pub fn key(name: &str) -> ObjectKey {
    ObjectKey::new(NS, name)
}

pub fn reconciler() -> TestReconciler {
    reconciler_with(ReconcilerSettings::default())
}

pub fn reconciler_with(settings: ReconcilerSettings) -> TestReconciler {
    Reconciler::new(MemoryStore::new(), RecordingNotifier::new(), settings)
}

pub fn postgres_spec() -> ModelRegistrySpec {
    ModelRegistrySpec {
        postgres: Some(PostgresConfig {
            host: "postgres.db".into(),
            database: "model-registry".into(),
            username: "mlmd".into(),
            password_secret: Some(SecretKeyValue {
                name: "registry-db".into(),
                key: "password".into(),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Create a registry the way a user would: no finalizer, no status.
pub async fn seed<S: ObjectStore>(
    store: &S,
    name: &str,
    spec: ModelRegistrySpec,
) -> ModelRegistry {
    let mut registry = ModelRegistry::new(name, spec);
    registry.meta_mut().namespace = Some(NS.to_string());
    store.create(&registry).await.expect("seed registry")
}

pub async fn reconcile_once<S: ObjectStore>(
    r: &Reconciler<S, RecordingNotifier>,
    key: &ObjectKey,
) -> Outcome {
    r.reconcile(&ReconcileCtx::background(), key)
        .await
        .expect("reconcile")
}

/// Reconcile until an attempt reports nothing left to do.
pub async fn converge<S: ObjectStore>(
    r: &Reconciler<S, RecordingNotifier>,
    key: &ObjectKey,
) -> usize {
    for attempt in 1..=10 {
        if reconcile_once(r, key).await == Outcome::Done {
            return attempt;
        }
    }
    panic!("{key} did not converge in 10 attempts");
}

/// Stand in for the Deployment controller reporting availability.
pub async fn set_deployment_available<S: ObjectStore>(
    store: &S,
    key: &ObjectKey,
    available: bool,
) {
    let mut dep: Deployment = store.get(key).await.expect("deployment");
    dep.status = Some(DeploymentStatus {
        conditions: Some(vec![DeploymentCondition {
            type_: "Available".into(),
            status: if available { "True" } else { "False" }.into(),
            ..Default::default()
        }]),
        ..Default::default()
    });
    store.update_status(&dep).await.expect("deployment status");
}

/// Memory store whose Deployment reads start failing once a read budget is
/// spent. Everything else passes through.
pub struct BudgetedDeploymentReads {
    pub inner: MemoryStore,
    remaining: AtomicUsize,
}

impl BudgetedDeploymentReads {
    pub fn new(inner: MemoryStore, reads: usize) -> Self {
        Self {
            inner,
            remaining: AtomicUsize::new(reads),
        }
    }

    pub fn reset(&self, reads: usize) {
        self.remaining.store(reads, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for BudgetedDeploymentReads {
    async fn get<K: StoredObject>(&self, key: &ObjectKey) -> StoreResult<K> {
        if K::kind(&()) == "Deployment" {
            let spent = self
                .remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_err();
            if spent {
                return Err(StoreError::Backend(format!("Deployment {key}: read refused")));
            }
        }
        self.inner.get(key).await
    }

    async fn create<K: StoredObject>(&self, obj: &K) -> StoreResult<K> {
        self.inner.create(obj).await
    }

    async fn update<K: StoredObject>(&self, obj: &K) -> StoreResult<K> {
        self.inner.update(obj).await
    }

    async fn update_status<K: StoredObject>(&self, obj: &K) -> StoreResult<K> {
        self.inner.update_status(obj).await
    }
}
