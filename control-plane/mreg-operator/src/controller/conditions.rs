use chrono::{SecondsFormat, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use tracing::{debug, warn};

use super::ReconcileErr;
use super::apply::OperationResult;
use super::context::ReconcileCtx;
use crate::crd::{Condition, ConditionStatus, ConditionType, ModelRegistry};
use crate::store::{ObjectKey, ObjectStore, StoreError};

pub const REASON_CREATED: &str = "CreatedDeployment";
pub const REASON_CREATING: &str = "CreatingDeployment";
pub const REASON_UPDATING: &str = "UpdatingDeployment";
pub const REASON_AVAILABLE: &str = "DeploymentAvailable";
pub const REASON_UNAVAILABLE: &str = "DeploymentUnavailable";
pub const REASON_FINALIZING: &str = "Finalizing";

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn condition(
    type_: ConditionType,
    status: ConditionStatus,
    reason: &str,
    message: String,
) -> Condition {
    Condition {
        type_,
        status,
        reason: Some(reason.to_string()),
        message: Some(message),
        last_transition_time: None,
    }
}

pub fn progressing(result: OperationResult, name: &str) -> Condition {
    let (status, reason, message) = match result {
        OperationResult::Created => (
            ConditionStatus::False,
            REASON_CREATING,
            format!("Creating deployment for custom resource {name}"),
        ),
        OperationResult::Updated => (
            ConditionStatus::False,
            REASON_UPDATING,
            format!("Updating deployment for custom resource {name}"),
        ),
        OperationResult::Unchanged => (
            ConditionStatus::True,
            REASON_CREATED,
            format!("Deployment for custom resource {name} was successfully created"),
        ),
    };
    condition(ConditionType::Progressing, status, reason, message)
}

pub fn available(ready: bool, name: &str) -> Condition {
    if ready {
        condition(
            ConditionType::Available,
            ConditionStatus::True,
            REASON_AVAILABLE,
            format!("Deployment for custom resource {name} is available"),
        )
    } else {
        condition(
            ConditionType::Available,
            ConditionStatus::False,
            REASON_UNAVAILABLE,
            format!("Deployment for custom resource {name} is not available"),
        )
    }
}

pub fn finalizing(name: &str) -> Condition {
    condition(
        ConditionType::Degraded,
        ConditionStatus::Unknown,
        REASON_FINALIZING,
        format!("Performing finalizer operations for the custom resource: {name} "),
    )
}

pub fn finalized(name: &str) -> Condition {
    condition(
        ConditionType::Degraded,
        ConditionStatus::True,
        REASON_FINALIZING,
        format!(
            "Finalizer operations for custom resource {name} were successfully accomplished"
        ),
    )
}

/// True when the Deployment reports its own `Available` condition as True.
pub fn deployment_available(deployment: &Deployment) -> bool {
    deployment
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|cs| cs.iter().find(|c| c.type_ == "Available"))
        .is_some_and(|c| c.status == "True")
}

/// Insert or update a condition by type. `lastTransitionTime` only moves
/// when the status flips. Returns whether anything changed.
pub fn set_condition(conditions: &mut Vec<Condition>, new: Condition) -> bool {
    let Some(existing) = conditions.iter_mut().find(|c| c.type_ == new.type_) else {
        let mut new = new;
        new.last_transition_time.get_or_insert_with(now);
        conditions.push(new);
        return true;
    };
    let mut changed = false;
    if existing.status != new.status {
        existing.status = new.status;
        existing.last_transition_time = Some(new.last_transition_time.unwrap_or_else(now));
        changed = true;
    }
    if existing.reason != new.reason {
        existing.reason = new.reason;
        changed = true;
    }
    if existing.message != new.message {
        existing.message = new.message;
        changed = true;
    }
    changed
}

pub fn conditions_mut(registry: &mut ModelRegistry) -> &mut Vec<Condition> {
    &mut registry.status.get_or_insert_with(Default::default).conditions
}

/// Re-read the registry, derive Progressing and Available from the apply
/// result and the Deployment, then write status only.
pub async fn persist_status<S: ObjectStore>(
    store: &S,
    ctx: &ReconcileCtx,
    key: &ObjectKey,
    result: OperationResult,
) -> Result<ModelRegistry, ReconcileErr> {
    let mut registry: ModelRegistry = ctx.run(store.get(key)).await?;

    let ready = match ctx.run(store.get::<Deployment>(key)).await {
        Ok(deployment) => deployment_available(&deployment),
        Err(e @ StoreError::Cancelled(_)) => return Err(e.into()),
        Err(e) => {
            warn!(%key, error = %e, "deployment unreadable; reporting unavailable");
            false
        }
    };

    let conditions = conditions_mut(&mut registry);
    let mut changed = set_condition(conditions, progressing(result, &key.name));
    changed |= set_condition(conditions, available(ready, &key.name));
    debug!(%key, changed, ready, "status conditions derived");

    Ok(ctx.run(store.update_status(&registry)).await?)
}
