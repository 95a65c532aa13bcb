use std::fmt;

use kube::{Resource, ResourceExt};
use tracing::{debug, info, instrument};

use super::ReconcileErr;
use super::context::ReconcileCtx;
use super::patch;
use crate::crd::ModelRegistry;
use crate::store::{ObjectKey, ObjectStore, StoredObject, kind_of};

/// What a single create-or-update did to the cluster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum OperationResult {
    #[default]
    Unchanged,
    Created,
    Updated,
}

impl OperationResult {
    pub fn is_significant(self) -> bool {
        !matches!(self, OperationResult::Unchanged)
    }

    /// Fold step for a sequence of applies: the latest significant result wins.
    pub fn then(self, next: OperationResult) -> OperationResult {
        if next.is_significant() { next } else { self }
    }
}

impl fmt::Display for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationResult::Unchanged => "unchanged",
            OperationResult::Created => "created",
            OperationResult::Updated => "updated",
        })
    }
}

/// Make `parent` the controlling owner of `child`, replacing any earlier
/// link to the same parent.
pub fn set_owner_link<K: Resource>(
    child: &mut K,
    parent: &ModelRegistry,
) -> Result<(), ReconcileErr> {
    let owner = parent
        .controller_owner_ref(&())
        .ok_or_else(|| ReconcileErr::MissingUid(ObjectKey::of(parent).to_string()))?;
    let refs = child.owner_references_mut();
    refs.retain(|r| r.uid != owner.uid);
    refs.push(owner);
    Ok(())
}

/// Link `intended` to its parent and converge the cluster onto it.
pub async fn apply_owned<S, K>(
    store: &S,
    ctx: &ReconcileCtx,
    parent: &ModelRegistry,
    mut intended: K,
) -> Result<OperationResult, ReconcileErr>
where
    S: ObjectStore,
    K: StoredObject,
{
    set_owner_link(&mut intended, parent)?;
    create_or_update(store, ctx, intended).await
}

/// Create `intended` when absent, replace it when the three-way diff finds
/// drift, and leave it alone otherwise.
#[instrument(skip_all, fields(kind = %kind_of::<K>(), key = %ObjectKey::of(&intended)))]
pub async fn create_or_update<S, K>(
    store: &S,
    ctx: &ReconcileCtx,
    mut intended: K,
) -> Result<OperationResult, ReconcileErr>
where
    S: ObjectStore,
    K: StoredObject,
{
    let key = ObjectKey::of(&intended);
    let live = match ctx.run(store.get::<K>(&key)).await {
        Ok(live) => live,
        Err(e) if e.is_not_found() => {
            info!("creating");
            patch::set_last_applied(&mut intended)?;
            ctx.run(store.create(&intended)).await?;
            return Ok(OperationResult::Created);
        }
        Err(e) => return Err(e.into()),
    };

    let diff = patch::calculate(
        &serde_json::to_value(&live)?,
        &serde_json::to_value(&intended)?,
    );
    if diff.is_empty() {
        debug!("up to date");
        return Ok(OperationResult::Unchanged);
    }

    info!("updating");
    debug!(patch = %diff, "drift");
    patch::set_last_applied(&mut intended)?;
    intended.meta_mut().resource_version = live.resource_version();
    ctx.run(store.update(&intended)).await?;
    Ok(OperationResult::Updated)
}
