pub mod apply;
pub mod conditions;
pub mod context;
pub mod events;
pub mod finalizer;
pub mod patch;
pub mod quantity;
pub mod reconcile;

use std::sync::Arc;

use futures_util::StreamExt;
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{Service, ServiceAccount},
};
use kube::{
    Client, ResourceExt,
    api::Api,
    runtime::{Controller, controller::Action, watcher},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use apply::OperationResult;
pub use context::ReconcileCtx;
pub use events::{KubeNotifier, Notifier, RecordingNotifier, Severity};
pub use reconcile::{Outcome, Reconciler, ReconcilerSettings};

use crate::config::OperatorConfig;
use crate::crd::ModelRegistry;
use crate::store::{KubeStore, ObjectKey, StoreError};
use crate::templates::TemplateError;

#[derive(thiserror::Error, Debug)]
pub enum ReconcileErr {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("render failed: {0}")]
    Render(#[from] TemplateError),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{0} has no uid; cannot own dependents")]
    MissingUid(String),
}

pub struct ControllerContext {
    pub reconciler: Reconciler<KubeStore, KubeNotifier>,
    pub cfg: OperatorConfig,
    pub shutdown: CancellationToken,
}

fn scoped<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Watch registries and their dependents until the process is told to stop.
pub async fn run_controller(
    client: Client,
    cfg: OperatorConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let ns = cfg.watch_namespace.clone();
    let registries: Api<ModelRegistry> = scoped(&client, ns.as_deref());
    let accounts: Api<ServiceAccount> = scoped(&client, ns.as_deref());
    let services: Api<Service> = scoped(&client, ns.as_deref());
    let deployments: Api<Deployment> = scoped(&client, ns.as_deref());

    let reconciler = Reconciler::new(
        KubeStore::new(client.clone()),
        KubeNotifier::new(client.clone()),
        ReconcilerSettings::from(&cfg),
    );
    let ctx = Arc::new(ControllerContext {
        reconciler,
        cfg,
        shutdown: shutdown.clone(),
    });

    info!(namespace = ?ns, "starting modelregistry controller");
    Controller::new(registries, watcher::Config::default())
        .owns(accounts, watcher::Config::default())
        .owns(services, watcher::Config::default())
        .owns(deployments, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj_ref, action)) => debug!(%obj_ref, ?action, "reconciled"),
                Err(e) => warn!(error = %e, "reconcile failed"),
            }
        })
        .await;

    info!("controller stopped");
    shutdown.cancel();
    Ok(())
}

async fn reconcile(
    obj: Arc<ModelRegistry>,
    ctx: Arc<ControllerContext>,
) -> Result<Action, ReconcileErr> {
    let key = ObjectKey::of(obj.as_ref());
    let attempt = ReconcileCtx::new(ctx.shutdown.child_token(), ctx.cfg.reconcile.timeout());
    Ok(match ctx.reconciler.reconcile(&attempt, &key).await? {
        Outcome::Requeue => Action::requeue(ctx.cfg.reconcile.requeue_after()),
        Outcome::Done => Action::await_change(),
    })
}

fn error_policy(
    obj: Arc<ModelRegistry>,
    err: &ReconcileErr,
    ctx: Arc<ControllerContext>,
) -> Action {
    warn!(name = %obj.name_any(), error = %err, "reconcile attempt failed; backing off");
    Action::requeue(ctx.cfg.reconcile.error_backoff())
}
