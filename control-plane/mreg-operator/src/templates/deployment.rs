use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec,
    ResourceRequirements, SecretKeySelector,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

use super::manager::{
    RenderParams, Template, TemplateError, check_identity, check_port,
    object_meta, selector_labels,
};
use super::service::{GRPC_PORT_NAME, REST_PORT_NAME};
use crate::config::{DEFAULT_GRPC_IMAGE, DEFAULT_REST_IMAGE};
use crate::crd::{
    DEFAULT_GRPC_PORT, DEFAULT_MYSQL_PORT, DEFAULT_POSTGRES_PORT,
    DEFAULT_REPLICAS, DEFAULT_REST_PORT, ResourceLimits, SecretKeyValue,
    StorageBackend,
};

pub const GRPC_CONTAINER: &str = "grpc-container";
pub const REST_CONTAINER: &str = "rest-container";

const DB_PASSWORD_ENV: &str = "DB_PASSWORD";

#[derive(Clone, Debug, Default)]
pub struct DeploymentTemplate;

fn resources(limits: Option<&ResourceLimits>) -> Option<ResourceRequirements> {
    let limits = limits?;
    if limits.requests.is_empty() && limits.limits.is_empty() {
        return None;
    }
    let to_quantities = |m: &std::collections::BTreeMap<String, String>| {
        (!m.is_empty()).then(|| {
            m.iter()
                .map(|(k, v)| (k.clone(), Quantity(v.clone())))
                .collect()
        })
    };
    Some(ResourceRequirements {
        requests: to_quantities(&limits.requests),
        limits: to_quantities(&limits.limits),
        ..Default::default()
    })
}

fn password_env(secret: Option<&SecretKeyValue>) -> Option<Vec<EnvVar>> {
    secret.map(|s| {
        vec![EnvVar {
            name: DB_PASSWORD_ENV.to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: s.name.clone(),
                    key: s.key.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]
    })
}

/// Command-line flags selecting the metadata store backend.
fn backend_args(backend: StorageBackend<'_>) -> Vec<String> {
    match backend {
        StorageBackend::Postgres(pg) => {
            let mut args = vec![
                "--metadata_source_config_type=postgresql".to_string(),
                format!("--postgres_config_host={}", pg.host),
                format!(
                    "--postgres_config_port={}",
                    pg.port.unwrap_or(DEFAULT_POSTGRES_PORT)
                ),
                format!("--postgres_config_dbname={}", pg.database),
                format!("--postgres_config_user={}", pg.username),
            ];
            if pg.password_secret.is_some() {
                args.push(format!(
                    "--postgres_config_password=$({DB_PASSWORD_ENV})"
                ));
            }
            if let Some(mode) = pg.ssl_mode.as_deref() {
                args.push(format!("--postgres_config_sslmode={mode}"));
            }
            args.push("--enable_database_upgrade=true".to_string());
            args
        }
        StorageBackend::MySql(my) => {
            let mut args = vec![
                format!("--mysql_config_host={}", my.host),
                format!(
                    "--mysql_config_port={}",
                    my.port.unwrap_or(DEFAULT_MYSQL_PORT)
                ),
                format!("--mysql_config_database={}", my.database),
                format!("--mysql_config_user={}", my.username),
            ];
            if my.password_secret.is_some() {
                args.push(format!("--mysql_config_password=$({DB_PASSWORD_ENV})"));
            }
            args.push("--enable_database_upgrade=true".to_string());
            args
        }
        StorageBackend::None => vec![],
    }
}

impl Template for DeploymentTemplate {
    type Output = Deployment;

    fn name(&self) -> &'static str {
        "deployment.yaml.tmpl"
    }

    fn render(
        &self,
        params: &RenderParams<'_>,
    ) -> Result<Deployment, TemplateError> {
        check_identity(self.name(), params)?;
        let spec = params.spec;
        let rest_port = check_port(
            self.name(),
            "rest.port",
            spec.rest.port.unwrap_or(DEFAULT_REST_PORT),
        )?;
        let grpc_port = check_port(
            self.name(),
            "grpc.port",
            spec.grpc.port.unwrap_or(DEFAULT_GRPC_PORT),
        )?;
        let replicas = spec.replicas.unwrap_or(DEFAULT_REPLICAS);
        if replicas < 0 {
            return Err(TemplateError::InvalidParams {
                template: self.name(),
                reason: format!("replicas must not be negative, got {replicas}"),
            });
        }

        let backend = spec.storage_backend();
        let secret = match backend {
            StorageBackend::Postgres(pg) => pg.password_secret.as_ref(),
            StorageBackend::MySql(my) => my.password_secret.as_ref(),
            StorageBackend::None => None,
        };
        let mut grpc_args = vec![format!("--grpc_port={grpc_port}")];
        grpc_args.extend(backend_args(backend));

        let grpc = Container {
            name: GRPC_CONTAINER.to_string(),
            image: Some(
                spec.grpc
                    .image
                    .clone()
                    .unwrap_or_else(|| DEFAULT_GRPC_IMAGE.to_string()),
            ),
            args: Some(grpc_args),
            env: password_env(secret),
            ports: Some(vec![ContainerPort {
                name: Some(GRPC_PORT_NAME.to_string()),
                container_port: grpc_port,
                ..Default::default()
            }]),
            resources: resources(spec.grpc.resources.as_ref()),
            ..Default::default()
        };

        let rest = Container {
            name: REST_CONTAINER.to_string(),
            image: Some(
                spec.rest
                    .image
                    .clone()
                    .unwrap_or_else(|| DEFAULT_REST_IMAGE.to_string()),
            ),
            command: Some(vec!["/model-registry".to_string()]),
            args: Some(vec![
                "proxy".to_string(),
                "--hostname=0.0.0.0".to_string(),
                format!("--port={rest_port}"),
                "--mlmd-hostname=localhost".to_string(),
                format!("--mlmd-port={grpc_port}"),
            ]),
            ports: Some(vec![ContainerPort {
                name: Some(REST_PORT_NAME.to_string()),
                container_port: rest_port,
                ..Default::default()
            }]),
            resources: resources(spec.rest.resources.as_ref()),
            ..Default::default()
        };

        let labels = selector_labels(params.name);
        Ok(Deployment {
            metadata: object_meta(params),
            spec: Some(DeploymentSpec {
                replicas: Some(replicas),
                selector: LabelSelector {
                    match_labels: Some(labels.clone()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        service_account_name: Some(params.name.to_string()),
                        containers: vec![grpc, rest],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}
