use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kube::Client;
use kube::Resource;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use tracing::warn;

use super::apply::OperationResult;
use crate::crd::ModelRegistry;

pub const REASON_SERVICE_CREATED: &str = "ServiceCreated";
pub const REASON_SERVICE_UPDATED: &str = "ServiceUpdated";
pub const REASON_DELETING: &str = "Deleting";

const REPORTER: &str = "mreg-operator";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Normal,
    Warning,
}

/// Sink for user-visible notifications about a registry. Delivery is best
/// effort; implementations swallow their own failures.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        parent: &ModelRegistry,
        severity: Severity,
        reason: &str,
        message: String,
    );
}

/// Notification for a completed apply pass, if it changed anything.
pub fn result_event(
    result: OperationResult,
    parent: &ModelRegistry,
) -> Option<(&'static str, String)> {
    let name = parent.metadata.name.as_deref().unwrap_or_default();
    let ns = parent.metadata.namespace.as_deref().unwrap_or_default();
    match result {
        OperationResult::Created => Some((
            REASON_SERVICE_CREATED,
            format!("Created service for custom resource {name} in namespace {ns}"),
        )),
        OperationResult::Updated => Some((
            REASON_SERVICE_UPDATED,
            format!("Updated service for custom resource {name} in namespace {ns}"),
        )),
        OperationResult::Unchanged => None,
    }
}

pub fn deleting_message(parent: &ModelRegistry) -> String {
    format!(
        "Custom Resource {} is being deleted from the namespace {}",
        parent.metadata.name.as_deref().unwrap_or_default(),
        parent.metadata.namespace.as_deref().unwrap_or_default(),
    )
}

/// Publishes Kubernetes Events through the runtime [`Recorder`].
#[derive(Clone)]
pub struct KubeNotifier {
    recorder: Recorder,
}

impl KubeNotifier {
    pub fn new(client: Client) -> Self {
        let reporter = Reporter {
            controller: REPORTER.into(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl Notifier for KubeNotifier {
    async fn notify(
        &self,
        parent: &ModelRegistry,
        severity: Severity,
        reason: &str,
        message: String,
    ) {
        let event = Event {
            type_: match severity {
                Severity::Normal => EventType::Normal,
                Severity::Warning => EventType::Warning,
            },
            reason: reason.into(),
            note: Some(message),
            action: reason.into(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, &parent.object_ref(&())).await {
            warn!(error = %e, reason, "failed to publish event");
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedEvent {
    pub object: String,
    pub severity: Severity,
    pub reason: String,
    pub message: String,
}

/// Keeps notifications in memory. Pairs with the in-memory store for tests
/// and dry runs.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.reason).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        parent: &ModelRegistry,
        severity: Severity,
        reason: &str,
        message: String,
    ) {
        let event = RecordedEvent {
            object: parent.metadata.name.clone().unwrap_or_default(),
            severity,
            reason: reason.to_string(),
            message,
        };
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
