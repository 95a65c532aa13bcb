//! Finalizer lifecycle of a registry.
//!
//! The token is added before any dependent is created and removed only after
//! cleanup ran and the Degraded condition recorded it. Dependents themselves
//! are collected through their owner references once the token is gone.

use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use super::ReconcileErr;
use super::conditions::{self, conditions_mut, set_condition};
use super::context::ReconcileCtx;
use super::events::{self, Notifier, Severity};
use super::reconcile::Outcome;
use crate::crd::ModelRegistry;
use crate::store::{ObjectKey, ObjectStore, StoreError};

pub const FINALIZER: &str = "modelregistry.opendatahub.io/finalizer";

/// Position of a registry in its lifecycle, from (token present, deleting).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinalizerState {
    Absent,
    Active,
    Deleting,
    Finalized,
}

impl FinalizerState {
    pub fn of(registry: &ModelRegistry) -> Self {
        let deleting = registry.metadata.deletion_timestamp.is_some();
        match (has_finalizer(registry), deleting) {
            (false, false) => FinalizerState::Absent,
            (true, false) => FinalizerState::Active,
            (true, true) => FinalizerState::Deleting,
            (false, true) => FinalizerState::Finalized,
        }
    }
}

pub fn has_finalizer(registry: &ModelRegistry) -> bool {
    registry.finalizers().iter().any(|f| f == FINALIZER)
}

/// Returns false when the token was already there.
pub fn add_finalizer(registry: &mut ModelRegistry) -> bool {
    if has_finalizer(registry) {
        return false;
    }
    registry.finalizers_mut().push(FINALIZER.to_string());
    true
}

/// Returns false when the token was not there.
pub fn remove_finalizer(registry: &mut ModelRegistry) -> bool {
    let before = registry.finalizers().len();
    registry.finalizers_mut().retain(|f| f != FINALIZER);
    registry.finalizers().len() != before
}

/// Persist the token if missing and hand back the stored registry.
pub async fn ensure_finalizer<S: ObjectStore>(
    store: &S,
    ctx: &ReconcileCtx,
    mut registry: ModelRegistry,
) -> Result<ModelRegistry, ReconcileErr> {
    if !add_finalizer(&mut registry) {
        return Ok(registry);
    }
    info!(name = %registry.name_any(), "adding finalizer");
    Ok(ctx.run(store.update(&registry)).await?)
}

/// Drive a deleting registry to the point where the store may remove it.
#[instrument(skip_all, fields(key = %key))]
pub async fn finalize<S, N>(
    store: &S,
    notifier: &N,
    ctx: &ReconcileCtx,
    key: &ObjectKey,
    mut registry: ModelRegistry,
) -> Result<Outcome, ReconcileErr>
where
    S: ObjectStore,
    N: Notifier,
{
    info!("performing finalizer operations");
    set_condition(conditions_mut(&mut registry), conditions::finalizing(&key.name));
    if let Err(e) = ctx.run(store.update_status(&registry)).await {
        return settle(store, ctx, key, e).await;
    }

    cleanup(notifier, &registry).await;

    let mut registry: ModelRegistry = match ctx.run(store.get(key)).await {
        Ok(r) => r,
        Err(e) => return settle(store, ctx, key, e).await,
    };
    if !has_finalizer(&registry) {
        debug!("finalizer already removed");
        return Ok(Outcome::Done);
    }

    set_condition(conditions_mut(&mut registry), conditions::finalized(&key.name));
    let mut registry = match ctx.run(store.update_status(&registry)).await {
        Ok(r) => r,
        Err(e) => return settle(store, ctx, key, e).await,
    };

    remove_finalizer(&mut registry);
    if let Err(e) = ctx.run(store.update(&registry)).await {
        return settle(store, ctx, key, e).await;
    }
    info!("finalizer removed");
    Ok(Outcome::Done)
}

/// Cleanup hook. Dependents go away through owner references, so the only
/// work left is telling users about it.
async fn cleanup<N: Notifier>(notifier: &N, registry: &ModelRegistry) {
    notifier
        .notify(
            registry,
            Severity::Warning,
            events::REASON_DELETING,
            events::deleting_message(registry),
        )
        .await;
}

/// Classify a store failure hit while finalizing.
///
/// NotFound means the registry is gone. A conflict only ends the attempt
/// cleanly when a fresh read shows the deletion got there first; any other
/// conflict asks for another pass without reporting an error.
async fn settle<S: ObjectStore>(
    store: &S,
    ctx: &ReconcileCtx,
    key: &ObjectKey,
    err: StoreError,
) -> Result<Outcome, ReconcileErr> {
    if err.is_not_found() {
        debug!("registry already gone");
        return Ok(Outcome::Done);
    }
    if !err.is_conflict() {
        return Err(err.into());
    }
    match ctx.run(store.get::<ModelRegistry>(key)).await {
        Ok(fresh) if has_finalizer(&fresh) => {
            warn!(error = %err, "conflict while finalizing; retrying");
            Ok(Outcome::Requeue)
        }
        Ok(_) => Ok(Outcome::Done),
        Err(e) if e.is_not_found() => Ok(Outcome::Done),
        Err(e) => Err(e.into()),
    }
}
