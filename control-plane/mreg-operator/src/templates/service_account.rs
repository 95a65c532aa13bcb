use k8s_openapi::api::core::v1::ServiceAccount;

use super::manager::{
    RenderParams, Template, TemplateError, check_identity, object_meta,
};

#[derive(Clone, Debug, Default)]
pub struct ServiceAccountTemplate;

impl Template for ServiceAccountTemplate {
    type Output = ServiceAccount;

    fn name(&self) -> &'static str {
        "serviceaccount.yaml.tmpl"
    }

    fn render(
        &self,
        params: &RenderParams<'_>,
    ) -> Result<ServiceAccount, TemplateError> {
        check_identity(self.name(), params)?;
        Ok(ServiceAccount {
            metadata: object_meta(params),
            ..Default::default()
        })
    }
}
