use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Annotation an operator (or automation) sets to the up-to-date generation's
/// name once its canary has been validated.
pub const CANARY_VALID_ANNOTATION: &str = "kanari.io/canary-valid";

/// Annotation that marks the in-flight canary as failed (`"true"`).
pub const CANARY_FAILED_ANNOTATION: &str = "kanari.io/canary-failed";

/// Workload runs one pod per node and rolls template changes out through
/// generations, optionally gated by a canary on a subset of nodes.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "kanari.io",
    version = "v1alpha1",
    kind = "Workload",
    namespaced,
    status = "WorkloadStatus",
    shortname = "wl",
    printcolumn = r#"{"name":"Desired", "type":"integer", "jsonPath":".status.desired"}"#,
    printcolumn = r#"{"name":"Ready", "type":"integer", "jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"UpToDate", "type":"integer", "jsonPath":".status.upToDate"}"#,
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Active", "type":"string", "jsonPath":".status.activeGeneration"}"#,
    printcolumn = r#"{"name":"Canary", "type":"string", "jsonPath":".status.canary.generation"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct WorkloadSpec {
    /// Label selector for the pods of every generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,

    /// Template of the pod to run on each node
    pub template: PodTemplateSpec,

    /// How template changes are rolled out
    #[serde(default)]
    pub strategy: WorkloadStrategy,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct WorkloadStrategy {
    /// Progressive replacement settings, consumed by the node-level pod controller
    #[serde(rename = "rollingUpdate", default)]
    pub rolling_update: RollingUpdate,

    /// Canary gate; when absent, template changes are promoted immediately
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canary: Option<CanaryStrategy>,
}

/// Rolling update configuration
///
/// Count fields accept an absolute number or a percentage ("25%").
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct RollingUpdate {
    /// Maximum number of pods that can be unavailable during the update
    #[serde(rename = "maxUnavailable", skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<IntOrString>,

    /// Maximum number of pods that may fail to be scheduled before the update stops
    #[serde(
        rename = "maxPodSchedulerFailure",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_pod_scheduler_failure: Option<IntOrString>,

    /// Maximum number of pods created in parallel
    #[serde(
        rename = "maxParallelPodCreation",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_parallel_pod_creation: Option<i32>,

    /// Interval between two slow-start increments (e.g., "1m")
    #[serde(
        rename = "slowStartIntervalDuration",
        skip_serializing_if = "Option::is_none"
    )]
    pub slow_start_interval_duration: Option<String>,

    /// Number of additional pods allowed per slow-start interval
    #[serde(
        rename = "slowStartAdditiveIncrease",
        skip_serializing_if = "Option::is_none"
    )]
    pub slow_start_additive_increase: Option<IntOrString>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct CanaryStrategy {
    /// Number of canary nodes, absolute or a percentage of the cluster
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<IntOrString>,

    /// How long the canary runs before promotion (e.g., "30s", "10m", "1h")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,

    /// Restrict canary nodes to a dedicated pool; every matching node is used
    #[serde(rename = "nodeSelector", skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<LabelSelector>,

    /// Node label keys whose combined values should differ across canary nodes
    #[serde(rename = "nodeAntiAffinityKeys", default, skip_serializing_if = "Vec::is_empty")]
    pub node_anti_affinity_keys: Vec<String>,
}

/// Externally visible rollout state
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum WorkloadState {
    /// A new generation is replacing the current one without a canary gate
    #[default]
    RollingUpdate,
    /// Every node runs the up-to-date generation
    Running,
    /// The up-to-date generation runs on the canary nodes only
    Canary,
    /// The canary was flagged as failed; nothing is promoted
    CanaryFailed,
}

/// Canary in flight: which generation, on which nodes
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct CanaryStatus {
    /// Name of the generation under canary
    pub generation: String,

    /// Names of the nodes selected to run it
    #[serde(default)]
    pub nodes: Vec<String>,

    /// Set while `kanari.io/canary-valid` names this generation
    #[serde(default)]
    pub validated: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct WorkloadStatus {
    /// Generation currently authoritative for non-canary nodes
    #[serde(rename = "activeGeneration", skip_serializing_if = "Option::is_none")]
    pub active_generation: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub canary: Option<CanaryStatus>,

    /// Generation whose canary was failed by `kanari.io/canary-failed`
    #[serde(rename = "failedGeneration", skip_serializing_if = "Option::is_none")]
    pub failed_generation: Option<String>,

    #[serde(default)]
    pub desired: i32,

    #[serde(default)]
    pub current: i32,

    #[serde(default)]
    pub available: i32,

    #[serde(default)]
    pub ready: i32,

    #[serde(rename = "upToDate", default)]
    pub up_to_date: i32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<WorkloadState>,

    /// When `state` last changed (RFC3339)
    #[serde(rename = "lastTransitionTime", skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,

    /// Human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
#[path = "workload_test.rs"]
mod tests;
