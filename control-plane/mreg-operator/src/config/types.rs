use std::time::Duration;

use envconfig::Envconfig;

use crate::crd::ImageDefaults;

pub const DEFAULT_REST_IMAGE: &str =
    "quay.io/opendatahub/model-registry:latest";
pub const DEFAULT_GRPC_IMAGE: &str =
    "gcr.io/tfx-oss-public/ml_metadata_store_server:1.14.0";

#[derive(Envconfig, Clone, Debug)]
pub struct OperatorConfig {
    #[envconfig(from = "HTTP_PORT", default = "8088")]
    pub http_port: u16,

    /// Restrict the watch to a single namespace; all namespaces when unset.
    /// Env: MREG_WATCH_NAMESPACE
    #[envconfig(from = "MREG_WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// When admission webhooks are installed they default the spec, so the
    /// reconciler must not do it a second time.
    /// Env: MREG_ENABLE_WEBHOOKS
    #[envconfig(from = "MREG_ENABLE_WEBHOOKS", default = "false")]
    pub enable_webhooks: bool,

    #[envconfig(nested)]
    pub reconcile: ReconcileConfig,

    #[envconfig(nested)]
    pub images: ImageConfig,
}

#[derive(Envconfig, Clone, Debug)]
pub struct ReconcileConfig {
    /// Delay before re-delivering a key whose cycle changed something.
    #[envconfig(from = "MREG_REQUEUE_SECS", default = "1")]
    pub requeue_secs: u64,

    /// Delay before re-delivering a key whose attempt failed.
    #[envconfig(from = "MREG_ERROR_BACKOFF_SECS", default = "10")]
    pub error_backoff_secs: u64,

    /// Deadline for a single reconcile attempt; 0 disables it.
    #[envconfig(from = "MREG_RECONCILE_TIMEOUT_SECS", default = "30")]
    pub timeout_secs: u64,
}

#[derive(Envconfig, Clone, Debug)]
pub struct ImageConfig {
    #[envconfig(
        from = "MREG_REST_IMAGE",
        default = "quay.io/opendatahub/model-registry:latest"
    )]
    pub rest_image: String,

    #[envconfig(
        from = "MREG_GRPC_IMAGE",
        default = "gcr.io/tfx-oss-public/ml_metadata_store_server:1.14.0"
    )]
    pub grpc_image: String,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            requeue_secs: 1,
            error_backoff_secs: 10,
            timeout_secs: 30,
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            rest_image: DEFAULT_REST_IMAGE.to_string(),
            grpc_image: DEFAULT_GRPC_IMAGE.to_string(),
        }
    }
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            http_port: 8088,
            watch_namespace: None,
            enable_webhooks: false,
            reconcile: ReconcileConfig::default(),
            images: ImageConfig::default(),
        }
    }
}

impl ReconcileConfig {
    pub fn requeue_after(&self) -> Duration {
        Duration::from_secs(self.requeue_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

impl ImageConfig {
    pub fn as_defaults(&self) -> ImageDefaults<'_> {
        ImageDefaults {
            rest_image: &self.rest_image,
            grpc_image: &self.grpc_image,
        }
    }
}

impl OperatorConfig {
    /// Treat an empty namespace value the same as an unset one.
    pub fn normalized(mut self) -> Self {
        if self
            .watch_namespace
            .as_deref()
            .is_some_and(|ns| ns.trim().is_empty())
        {
            self.watch_namespace = None;
        }
        self
    }
}
