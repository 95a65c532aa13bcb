use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Service, ServiceAccount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use super::{DeploymentTemplate, ServiceAccountTemplate, ServiceTemplate};
use crate::crd::ModelRegistrySpec;

pub const COMPONENT_LABEL: &str = "component";
pub const COMPONENT: &str = "model-registry";

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("template {template}: {reason}")]
    InvalidParams {
        template: &'static str,
        reason: String,
    },
}

/// Typed renderer for one managed resource kind. Rendering is pure: the
/// same params always produce the same object.
pub trait Template: std::fmt::Debug + Send + Sync {
    type Output;

    fn name(&self) -> &'static str;

    fn render(
        &self,
        params: &RenderParams<'_>,
    ) -> Result<Self::Output, TemplateError>;
}

#[derive(Clone, Copy, Debug)]
pub struct RenderParams<'a> {
    pub name: &'a str,
    pub namespace: &'a str,
    pub spec: &'a ModelRegistrySpec,
}

/// The fixed set of templates a registry is rendered from, in apply order.
#[derive(Debug, Default)]
pub struct TemplateManager {
    service_account: ServiceAccountTemplate,
    service: ServiceTemplate,
    deployment: DeploymentTemplate,
}

impl TemplateManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn service_account(
        &self,
    ) -> &impl Template<Output = ServiceAccount> {
        &self.service_account
    }

    pub fn service(&self) -> &impl Template<Output = Service> {
        &self.service
    }

    pub fn deployment(&self) -> &impl Template<Output = Deployment> {
        &self.deployment
    }
}

pub(crate) fn selector_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), name.to_string()),
        (COMPONENT_LABEL.to_string(), COMPONENT.to_string()),
    ])
}

pub(crate) fn object_meta(params: &RenderParams<'_>) -> ObjectMeta {
    ObjectMeta {
        name: Some(params.name.to_string()),
        namespace: Some(params.namespace.to_string()),
        labels: Some(selector_labels(params.name)),
        ..Default::default()
    }
}

pub(crate) fn check_identity(
    template: &'static str,
    params: &RenderParams<'_>,
) -> Result<(), TemplateError> {
    if params.name.is_empty() || params.namespace.is_empty() {
        return Err(TemplateError::InvalidParams {
            template,
            reason: "name and namespace are required".into(),
        });
    }
    Ok(())
}

pub(crate) fn check_port(
    template: &'static str,
    field: &str,
    port: i32,
) -> Result<i32, TemplateError> {
    if (1..=65535).contains(&port) {
        Ok(port)
    } else {
        Err(TemplateError::InvalidParams {
            template,
            reason: format!("{field} {port} is not a valid port"),
        })
    }
}
