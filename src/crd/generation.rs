use super::time::to_chrono;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Label linking a generation to the workload that owns it
pub const WORKLOAD_NAME_LABEL: &str = "kanari.io/workload";

/// Annotation carrying the template fingerprint of a generation
pub const FINGERPRINT_ANNOTATION: &str = "kanari.io/template-fingerprint";

/// Generation is an immutable snapshot of a workload's pod template
///
/// One generation exists per distinct template fingerprint. Its status
/// counters are written by the node-level pod controller.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "kanari.io",
    version = "v1alpha1",
    kind = "Generation",
    namespaced,
    status = "GenerationStatus",
    derive = "PartialEq",
    shortname = "wlgen",
    printcolumn = r#"{"name":"Desired", "type":"integer", "jsonPath":".status.desired"}"#,
    printcolumn = r#"{"name":"Available", "type":"integer", "jsonPath":".status.available"}"#,
    printcolumn = r#"{"name":"Ready", "type":"integer", "jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Fingerprint", "type":"string", "jsonPath":".spec.fingerprint"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct GenerationSpec {
    /// Content fingerprint of `template`
    pub fingerprint: String,

    /// Pod template snapshot
    pub template: PodTemplateSpec,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct GenerationStatus {
    /// Number of nodes that should run this generation
    #[serde(default)]
    pub desired: i32,

    /// Number of pods of this generation that exist
    #[serde(default)]
    pub current: i32,

    #[serde(default)]
    pub available: i32,

    #[serde(default)]
    pub ready: i32,
}

impl Generation {
    /// Status counters, zero when the pod controller has not reported yet
    pub fn counts(&self) -> GenerationStatus {
        self.status.clone().unwrap_or_default()
    }

    /// When the generation was created; the canary clock starts here
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.metadata.creation_timestamp.as_ref().and_then(to_chrono)
    }

    /// Whether the API server is already deleting this generation
    pub fn is_terminating(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Fingerprint recorded on the object, preferring the spec over the annotation
    pub fn fingerprint(&self) -> Option<&str> {
        if !self.spec.fingerprint.is_empty() {
            return Some(self.spec.fingerprint.as_str());
        }
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(FINGERPRINT_ANNOTATION))
            .map(String::as_str)
    }
}
