//! Kubernetes Events for rollout milestones
//!
//! Events show up in `kubectl describe workload`. Publishing is
//! fire-and-forget: a failed event is logged and never fails a reconcile pass.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Name reported as the event source
pub const CONTROLLER_NAME: &str = "kanari-controller";

/// Publishes Events about a workload
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        note: Option<String>,
    );
}

/// Publisher backed by `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    pub fn new(client: Client) -> Self {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.to_string(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: actions::RECONCILE.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Discards every event
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _note: Option<String>,
    ) {
    }
}

/// Keeps published reasons in memory so tests can assert on them
#[cfg(test)]
#[derive(Default)]
pub struct RecordingEventPublisher {
    reasons: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
impl RecordingEventPublisher {
    pub fn reasons(&self) -> Vec<String> {
        self.reasons.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        reason: &str,
        _note: Option<String>,
    ) {
        self.reasons.lock().unwrap().push(reason.to_string());
    }
}

/// Event reasons (REASON column of `kubectl get events`)
pub mod reasons {
    pub const GENERATION_CREATED: &str = "GenerationCreated";
    pub const GENERATION_DELETED: &str = "GenerationDeleted";
    pub const CANARY_STARTED: &str = "CanaryStarted";
    pub const CANARY_PROMOTED: &str = "CanaryPromoted";
    pub const CANARY_FAILED: &str = "CanaryFailed";
    pub const INSUFFICIENT_NODES: &str = "InsufficientNodes";
}

pub mod actions {
    pub const RECONCILE: &str = "Reconcile";
}
