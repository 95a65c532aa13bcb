use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::manager::{
    RenderParams, Template, TemplateError, check_identity, check_port,
    object_meta, selector_labels,
};
use crate::crd::{DEFAULT_GRPC_PORT, DEFAULT_REST_PORT};

pub const REST_PORT_NAME: &str = "http-api";
pub const GRPC_PORT_NAME: &str = "grpc-api";

#[derive(Clone, Debug, Default)]
pub struct ServiceTemplate;

fn port(name: &str, port: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        protocol: Some("TCP".to_string()),
        target_port: Some(IntOrString::Int(port)),
        ..Default::default()
    }
}

impl Template for ServiceTemplate {
    type Output = Service;

    fn name(&self) -> &'static str {
        "service.yaml.tmpl"
    }

    fn render(&self, params: &RenderParams<'_>) -> Result<Service, TemplateError> {
        check_identity(self.name(), params)?;
        let rest_port = check_port(
            self.name(),
            "rest.port",
            params.spec.rest.port.unwrap_or(DEFAULT_REST_PORT),
        )?;
        let grpc_port = check_port(
            self.name(),
            "grpc.port",
            params.spec.grpc.port.unwrap_or(DEFAULT_GRPC_PORT),
        )?;
        Ok(Service {
            metadata: object_meta(params),
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".to_string()),
                selector: Some(selector_labels(params.name)),
                ports: Some(vec![
                    port(REST_PORT_NAME, rest_port),
                    port(GRPC_PORT_NAME, grpc_port),
                ]),
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}
