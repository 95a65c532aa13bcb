use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_REST_PORT: i32 = 8080;
pub const DEFAULT_GRPC_PORT: i32 = 9090;
pub const DEFAULT_POSTGRES_PORT: i32 = 5432;
pub const DEFAULT_MYSQL_PORT: i32 = 3306;
pub const DEFAULT_REPLICAS: i32 = 1;

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[kube(
    group = "modelregistry.opendatahub.io",
    version = "v1alpha1",
    kind = "ModelRegistry",
    plural = "modelregistries",
    shortname = "mr",
    namespaced,
    status = "ModelRegistryStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ModelRegistrySpec {
    /// REST proxy endpoint configuration
    #[serde(default)]
    pub rest: RestSpec,
    /// gRPC (ML Metadata) endpoint configuration
    #[serde(default)]
    pub grpc: GrpcSpec,
    /// Number of registry pods; defaults to 1
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    /// PostgreSQL storage backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postgres: Option<PostgresConfig>,
    /// MySQL storage backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mysql: Option<MySqlConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RestSpec {
    /// Listen port for the REST service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    /// Container image for the REST proxy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceLimits>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GrpcSpec {
    /// Listen port for the gRPC service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    /// Container image for the ML Metadata server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceLimits>,
}

/// Container resource requests/limits, passed through as quantity strings
/// (e.g. `{"cpu": "500m", "memory": "256Mi"}`).
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimits {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PostgresConfig {
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    pub database: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_secret: Option<SecretKeyValue>,
    /// libpq sslmode (disable, require, verify-full, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_mode: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MySqlConfig {
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    pub database: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_secret: Option<SecretKeyValue>,
}

/// Reference to a single key of a Secret in the registry namespace.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
pub struct SecretKeyValue {
    pub name: String,
    pub key: String,
}

/// Image defaults resolved from operator configuration.
#[derive(Clone, Debug)]
pub struct ImageDefaults<'a> {
    pub rest_image: &'a str,
    pub grpc_image: &'a str,
}

impl ModelRegistrySpec {
    /// Fill unset fields with their defaults. Mirrors what the admission
    /// webhook does when one is installed; explicit values are kept.
    pub fn apply_defaults(&mut self, images: &ImageDefaults<'_>) {
        self.rest.port.get_or_insert(DEFAULT_REST_PORT);
        self.rest
            .image
            .get_or_insert_with(|| images.rest_image.to_string());
        self.grpc.port.get_or_insert(DEFAULT_GRPC_PORT);
        self.grpc
            .image
            .get_or_insert_with(|| images.grpc_image.to_string());
        self.replicas.get_or_insert(DEFAULT_REPLICAS);
        if let Some(pg) = self.postgres.as_mut() {
            pg.port.get_or_insert(DEFAULT_POSTGRES_PORT);
        }
        if let Some(my) = self.mysql.as_mut() {
            my.port.get_or_insert(DEFAULT_MYSQL_PORT);
        }
    }

    pub fn storage_backend(&self) -> StorageBackend<'_> {
        // postgres wins when both are (incorrectly) set, matching webhook validation order
        match (self.postgres.as_ref(), self.mysql.as_ref()) {
            (Some(pg), _) => StorageBackend::Postgres(pg),
            (None, Some(my)) => StorageBackend::MySql(my),
            (None, None) => StorageBackend::None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StorageBackend<'a> {
    Postgres(&'a PostgresConfig),
    MySql(&'a MySqlConfig),
    None,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelRegistryStatus {
    /// Progressing / Available / Degraded plus any types other writers set,
    /// at most one entry per type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
pub struct Condition {
    #[serde(rename = "type")]
    #[schemars(with = "String")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(
        rename = "lastTransitionTime",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_transition_time: Option<String>,
}

/// Condition type as written on the wire. Types owned by other writers are
/// kept verbatim in `Other` so they survive a status round trip.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub enum ConditionType {
    Available,
    Progressing,
    Degraded,
    Other(String),
}

impl ConditionType {
    pub fn as_str(&self) -> &str {
        match self {
            ConditionType::Available => "Available",
            ConditionType::Progressing => "Progressing",
            ConditionType::Degraded => "Degraded",
            ConditionType::Other(other) => other,
        }
    }
}

impl From<String> for ConditionType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Available" => ConditionType::Available,
            "Progressing" => ConditionType::Progressing,
            "Degraded" => ConditionType::Degraded,
            _ => ConditionType::Other(value),
        }
    }
}

impl From<ConditionType> for String {
    fn from(value: ConditionType) -> Self {
        match value {
            ConditionType::Other(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ModelRegistryStatus {
    pub fn condition(&self, type_: &ConditionType) -> Option<&Condition> {
        self.conditions.iter().find(|c| &c.type_ == type_)
    }
}
