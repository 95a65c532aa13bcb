use tracing::{debug, error, info, instrument};

use super::ReconcileErr;
use super::apply::{self, OperationResult};
use super::conditions;
use super::context::ReconcileCtx;
use super::events::{self, Notifier, Severity};
use super::finalizer::{self, FinalizerState};
use crate::config::{ImageConfig, OperatorConfig};
use crate::crd::ModelRegistry;
use crate::store::{ObjectKey, ObjectStore, StoredObject};
use crate::templates::{RenderParams, Template, TemplateManager};

/// How the dispatcher should follow up on a finished attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing left to do until the registry or a dependent changes.
    Done,
    /// Run again after the configured short delay.
    Requeue,
}

#[derive(Clone, Debug, Default)]
pub struct ReconcilerSettings {
    /// Defaulting happens in an admission webhook; skip it here.
    pub enable_webhooks: bool,
    pub images: ImageConfig,
}

impl From<&OperatorConfig> for ReconcilerSettings {
    fn from(cfg: &OperatorConfig) -> Self {
        Self {
            enable_webhooks: cfg.enable_webhooks,
            images: cfg.images.clone(),
        }
    }
}

/// Converges one registry per call onto its ServiceAccount, Service and
/// Deployment.
pub struct Reconciler<S, N> {
    store: S,
    notifier: N,
    templates: TemplateManager,
    settings: ReconcilerSettings,
}

impl<S: ObjectStore, N: Notifier> Reconciler<S, N> {
    pub fn new(store: S, notifier: N, settings: ReconcilerSettings) -> Self {
        Self {
            store,
            notifier,
            templates: TemplateManager::new(),
            settings,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    #[instrument(skip_all, fields(ns = %key.namespace, name = %key.name))]
    pub async fn reconcile(
        &self,
        ctx: &ReconcileCtx,
        key: &ObjectKey,
    ) -> Result<Outcome, ReconcileErr> {
        let registry: ModelRegistry = match ctx.run(self.store.get(key)).await {
            Ok(r) => r,
            Err(e) if e.is_not_found() => {
                info!("modelregistry not found; ignoring since it must have been deleted");
                return Ok(Outcome::Done);
            }
            Err(e) => {
                error!(error = %e, "failed to get modelregistry");
                return Err(e.into());
            }
        };

        let mut registry = match FinalizerState::of(&registry) {
            FinalizerState::Absent => {
                finalizer::ensure_finalizer(&self.store, ctx, registry).await?
            }
            FinalizerState::Active => registry,
            FinalizerState::Deleting => {
                return finalizer::finalize(&self.store, &self.notifier, ctx, key, registry)
                    .await;
            }
            FinalizerState::Finalized => {
                debug!("deletion in progress and finalizer already removed");
                return Ok(Outcome::Done);
            }
        };

        if !self.settings.enable_webhooks {
            registry
                .spec
                .apply_defaults(&self.settings.images.as_defaults());
        }

        let result = self
            .apply_all(ctx, &registry, key)
            .await
            .inspect_err(|e| error!(error = %e, "service reconcile error"))?;
        info!(%result, "service reconciled");

        if let Some((reason, message)) = events::result_event(result, &registry) {
            self.notifier
                .notify(&registry, Severity::Normal, reason, message)
                .await;
        }

        conditions::persist_status(&self.store, ctx, key, result)
            .await
            .inspect_err(|e| error!(error = %e, "status reconcile error"))?;
        info!("status reconciled");

        Ok(if result.is_significant() {
            Outcome::Requeue
        } else {
            Outcome::Done
        })
    }

    /// ServiceAccount, Service, Deployment in that order; the first failure
    /// aborts the rest.
    async fn apply_all(
        &self,
        ctx: &ReconcileCtx,
        registry: &ModelRegistry,
        key: &ObjectKey,
    ) -> Result<OperationResult, ReconcileErr> {
        let params = RenderParams {
            name: &key.name,
            namespace: &key.namespace,
            spec: &registry.spec,
        };
        let templates = &self.templates;
        let mut result = OperationResult::Unchanged;
        result = result.then(
            self.render_and_apply(ctx, registry, templates.service_account(), &params)
                .await?,
        );
        result = result.then(
            self.render_and_apply(ctx, registry, templates.service(), &params)
                .await?,
        );
        result = result.then(
            self.render_and_apply(ctx, registry, templates.deployment(), &params)
                .await?,
        );
        Ok(result)
    }

    async fn render_and_apply<T>(
        &self,
        ctx: &ReconcileCtx,
        registry: &ModelRegistry,
        template: &T,
        params: &RenderParams<'_>,
    ) -> Result<OperationResult, ReconcileErr>
    where
        T: Template,
        T::Output: StoredObject,
    {
        ctx.check()?;
        let intended = template.render(params)?;
        let result = apply::apply_owned(&self.store, ctx, registry, intended).await?;
        debug!(template = template.name(), %result, "applied");
        Ok(result)
    }
}
