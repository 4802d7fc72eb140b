//! Defaulting for Workload specs
//!
//! A workload is reconciled only once every defaultable field is set. The
//! reconcile loop persists the defaulted spec and requeues, so later passes
//! (and `kubectl get -o yaml`) see the effective configuration.

use super::workload::{CanaryStrategy, RollingUpdate, WorkloadSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

/// Default rollingUpdate.maxUnavailable
pub const DEFAULT_MAX_UNAVAILABLE: i32 = 1;

/// Default rollingUpdate.maxPodSchedulerFailure
pub const DEFAULT_MAX_POD_SCHEDULER_FAILURE: i32 = 0;

/// Default rollingUpdate.maxParallelPodCreation
pub const DEFAULT_MAX_PARALLEL_POD_CREATION: i32 = 250;

/// Default rollingUpdate.slowStartIntervalDuration
pub const DEFAULT_SLOW_START_INTERVAL: &str = "1m";

/// Default rollingUpdate.slowStartAdditiveIncrease
pub const DEFAULT_SLOW_START_ADDITIVE_INCREASE: i32 = 5;

/// Default canary.replicas
pub const DEFAULT_CANARY_REPLICAS: i32 = 1;

/// Default canary.duration
pub const DEFAULT_CANARY_DURATION: &str = "10m";

/// Check whether every defaultable field of the spec is set
pub fn is_defaulted(spec: &WorkloadSpec) -> bool {
    let ru = &spec.strategy.rolling_update;
    let rolling_update_done = ru.max_unavailable.is_some()
        && ru.max_pod_scheduler_failure.is_some()
        && ru.max_parallel_pod_creation.is_some()
        && ru.slow_start_interval_duration.is_some()
        && ru.slow_start_additive_increase.is_some();

    let canary_done = spec
        .strategy
        .canary
        .as_ref()
        .map(|c| c.replicas.is_some() && c.duration.is_some())
        .unwrap_or(true);

    rolling_update_done && canary_done
}

/// Return a copy of the spec with defaults filled in
///
/// Fields that are already set are left untouched.
pub fn with_defaults(spec: &WorkloadSpec) -> WorkloadSpec {
    let mut spec = spec.clone();
    default_rolling_update(&mut spec.strategy.rolling_update);
    if let Some(canary) = spec.strategy.canary.as_mut() {
        default_canary(canary);
    }
    spec
}

fn default_rolling_update(ru: &mut RollingUpdate) {
    ru.max_unavailable
        .get_or_insert(IntOrString::Int(DEFAULT_MAX_UNAVAILABLE));
    ru.max_pod_scheduler_failure
        .get_or_insert(IntOrString::Int(DEFAULT_MAX_POD_SCHEDULER_FAILURE));
    ru.max_parallel_pod_creation
        .get_or_insert(DEFAULT_MAX_PARALLEL_POD_CREATION);
    ru.slow_start_interval_duration
        .get_or_insert_with(|| DEFAULT_SLOW_START_INTERVAL.to_string());
    ru.slow_start_additive_increase
        .get_or_insert(IntOrString::Int(DEFAULT_SLOW_START_ADDITIVE_INCREASE));
}

fn default_canary(canary: &mut CanaryStrategy) {
    canary
        .replicas
        .get_or_insert(IntOrString::Int(DEFAULT_CANARY_REPLICAS));
    canary
        .duration
        .get_or_insert_with(|| DEFAULT_CANARY_DURATION.to_string());
}
