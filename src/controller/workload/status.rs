use super::signals::{canary_failed_for, is_canary_failed, is_canary_valid, ExternalSignal};
use crate::crd::generation::Generation;
use crate::crd::workload::{CanaryStatus, Workload, WorkloadState, WorkloadStatus};
use chrono::{DateTime, SecondsFormat, Utc};
use kube::ResourceExt;

/// Compute the workload status from its current and up-to-date generations
///
/// Returns None when there is no current generation yet; the caller leaves
/// the stored status as is and does not requeue.
///
/// Counts: `desired`/`available` come from the current generation, `current`
/// and `ready` sum over the distinct {current, up-to-date} pair, `upToDate`
/// is the up-to-date generation's available count.
///
/// `CanaryFailed` is only reported while a canary of the up-to-date
/// generation is in flight and the failure applies to that generation. The
/// failed generation is kept in `failedGeneration` for as long as the
/// annotation stays set.
pub fn aggregate(
    workload: &Workload,
    current: Option<&Generation>,
    up_to_date: &Generation,
    signals: &[ExternalSignal],
    now: DateTime<Utc>,
) -> Option<WorkloadStatus> {
    let current = current?;
    let previous = workload.status.clone().unwrap_or_default();

    let current_name = current.name_any();
    let up_to_date_name = up_to_date.name_any();
    let same = current_name == up_to_date_name;
    let canary_configured = workload.spec.strategy.canary.is_some();

    let current_counts = current.counts();
    let up_to_date_counts = up_to_date.counts();

    let (pods, ready) = if same {
        (current_counts.current, current_counts.ready)
    } else {
        (
            current_counts.current + up_to_date_counts.current,
            current_counts.ready + up_to_date_counts.ready,
        )
    };

    let canary_failed = !same
        && canary_configured
        && canary_failed_for(signals, previous.failed_generation.as_deref(), &up_to_date_name);

    let failed_generation = if canary_failed {
        Some(up_to_date_name.clone())
    } else if is_canary_failed(signals) {
        previous.failed_generation.clone()
    } else {
        None
    };

    let (state, canary, message) = if canary_failed {
        (
            WorkloadState::CanaryFailed,
            None,
            format!("canary of {up_to_date_name} marked as failed"),
        )
    } else if !same && canary_configured {
        let mut canary = previous
            .canary
            .clone()
            .filter(|c| c.generation == up_to_date_name)
            .unwrap_or_else(|| CanaryStatus {
                generation: up_to_date_name.clone(),
                ..Default::default()
            });
        canary.validated = is_canary_valid(signals, &up_to_date_name);
        let message = if canary.validated {
            format!("canary of {up_to_date_name} validated, promoting at deadline")
        } else {
            format!("canary of {up_to_date_name} in progress")
        };
        (WorkloadState::Canary, Some(canary), message)
    } else if same && current_counts.available >= current_counts.desired {
        (
            WorkloadState::Running,
            None,
            format!("{current_name} available on all nodes"),
        )
    } else {
        (
            WorkloadState::RollingUpdate,
            None,
            format!("rolling out {up_to_date_name}"),
        )
    };

    let last_transition_time = if previous.state.as_ref() == Some(&state) {
        previous.last_transition_time.clone()
    } else {
        Some(now.to_rfc3339_opts(SecondsFormat::Secs, true))
    };

    Some(WorkloadStatus {
        active_generation: Some(current_name),
        canary,
        failed_generation,
        desired: current_counts.desired,
        current: pods,
        available: current_counts.available,
        ready,
        up_to_date: up_to_date_counts.available,
        state: Some(state),
        last_transition_time,
        message: Some(message),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::crd::generation::{GenerationSpec, GenerationStatus};
    use crate::crd::workload::{CanaryStrategy, WorkloadSpec, WorkloadStrategy};
    use chrono::TimeZone;
    use k8s_openapi::api::core::v1::PodTemplateSpec;
    use kube::api::ObjectMeta;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn generation(name: &str, desired: i32, available: i32, ready: i32) -> Generation {
        Generation {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: GenerationSpec {
                fingerprint: name.to_string(),
                template: PodTemplateSpec::default(),
            },
            status: Some(GenerationStatus {
                desired,
                current: available,
                available,
                ready,
            }),
        }
    }

    fn workload(canary: bool, status: Option<WorkloadStatus>) -> Workload {
        Workload {
            metadata: ObjectMeta {
                name: Some("agent".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: WorkloadSpec {
                selector: None,
                template: PodTemplateSpec::default(),
                strategy: WorkloadStrategy {
                    rolling_update: Default::default(),
                    canary: canary.then(CanaryStrategy::default),
                },
            },
            status,
        }
    }

    #[test]
    fn test_no_current_generation_means_no_update() {
        let up = generation("agent-new", 3, 0, 0);
        assert!(aggregate(&workload(false, None), None, &up, &[], now()).is_none());
    }

    #[test]
    fn test_single_generation_running() {
        let g = generation("agent-a", 3, 3, 2);
        let status = aggregate(&workload(false, None), Some(&g), &g, &[], now()).unwrap();

        assert_eq!(status.desired, 3);
        assert_eq!(status.current, 3);
        assert_eq!(status.available, 3);
        assert_eq!(status.ready, 2);
        assert_eq!(status.up_to_date, 3);
        assert_eq!(status.state, Some(WorkloadState::Running));
        assert_eq!(status.active_generation.as_deref(), Some("agent-a"));
        assert!(status.canary.is_none());
    }

    #[test]
    fn test_single_generation_not_fully_available_is_rolling_update() {
        let g = generation("agent-a", 3, 1, 1);
        let status = aggregate(&workload(false, None), Some(&g), &g, &[], now()).unwrap();
        assert_eq!(status.state, Some(WorkloadState::RollingUpdate));
    }

    #[test]
    fn test_canary_in_progress_keeps_matching_canary_status() {
        let old = generation("agent-old", 3, 2, 2);
        let new = generation("agent-new", 1, 1, 1);
        let previous = WorkloadStatus {
            canary: Some(CanaryStatus {
                generation: "agent-new".to_string(),
                nodes: vec!["n1".to_string()],
                ..Default::default()
            }),
            state: Some(WorkloadState::Canary),
            last_transition_time: Some("2024-01-01T11:00:00Z".to_string()),
            ..Default::default()
        };

        let status =
            aggregate(&workload(true, Some(previous)), Some(&old), &new, &[], now()).unwrap();

        assert_eq!(status.state, Some(WorkloadState::Canary));
        assert_eq!(status.canary.as_ref().unwrap().nodes, vec!["n1".to_string()]);
        assert_eq!(status.current, 3);
        assert_eq!(status.ready, 3);
        assert_eq!(status.up_to_date, 1);
        assert_eq!(
            status.last_transition_time.as_deref(),
            Some("2024-01-01T11:00:00Z")
        );
    }

    #[test]
    fn test_canary_status_reset_for_new_generation() {
        let old = generation("agent-old", 3, 3, 3);
        let newer = generation("agent-newer", 0, 0, 0);
        let previous = WorkloadStatus {
            canary: Some(CanaryStatus {
                generation: "agent-new".to_string(),
                nodes: vec!["n1".to_string()],
                ..Default::default()
            }),
            state: Some(WorkloadState::Canary),
            ..Default::default()
        };

        let status =
            aggregate(&workload(true, Some(previous)), Some(&old), &newer, &[], now()).unwrap();
        let canary = status.canary.unwrap();
        assert_eq!(canary.generation, "agent-newer");
        assert!(canary.nodes.is_empty());
    }

    #[test]
    fn test_failed_canary_clears_canary_status() {
        let old = generation("agent-old", 3, 3, 3);
        let new = generation("agent-new", 1, 1, 0);
        let previous = WorkloadStatus {
            canary: Some(CanaryStatus {
                generation: "agent-new".to_string(),
                nodes: vec!["n1".to_string()],
                ..Default::default()
            }),
            state: Some(WorkloadState::Canary),
            ..Default::default()
        };

        let status = aggregate(
            &workload(true, Some(previous)),
            Some(&old),
            &new,
            &[ExternalSignal::CanaryFailed],
            now(),
        )
        .unwrap();

        assert_eq!(status.state, Some(WorkloadState::CanaryFailed));
        assert!(status.canary.is_none());
        assert_eq!(status.failed_generation.as_deref(), Some("agent-new"));
        assert_eq!(status.last_transition_time.as_deref(), Some("2024-01-01T12:00:00Z"));
    }

    #[test]
    fn test_failure_signal_without_canary_in_flight_is_ignored() {
        let g = generation("agent-a", 3, 3, 3);
        let signals = [ExternalSignal::CanaryFailed];

        let status = aggregate(&workload(false, None), Some(&g), &g, &signals, now()).unwrap();
        assert_eq!(status.state, Some(WorkloadState::Running));
        assert!(status.failed_generation.is_none());

        let status = aggregate(&workload(true, None), Some(&g), &g, &signals, now()).unwrap();
        assert_eq!(status.state, Some(WorkloadState::Running));
    }

    #[test]
    fn test_stale_failure_starts_canary_of_new_generation() {
        let old = generation("agent-old", 3, 3, 3);
        let newer = generation("agent-newer", 0, 0, 0);
        let previous = WorkloadStatus {
            failed_generation: Some("agent-new".to_string()),
            state: Some(WorkloadState::CanaryFailed),
            ..Default::default()
        };

        let status = aggregate(
            &workload(true, Some(previous)),
            Some(&old),
            &newer,
            &[ExternalSignal::CanaryFailed],
            now(),
        )
        .unwrap();

        assert_eq!(status.state, Some(WorkloadState::Canary));
        assert_eq!(status.canary.unwrap().generation, "agent-newer");
        assert_eq!(status.failed_generation.as_deref(), Some("agent-new"));
    }

    #[test]
    fn test_failure_record_cleared_with_annotation() {
        let old = generation("agent-old", 3, 3, 3);
        let new = generation("agent-new", 1, 0, 0);
        let previous = WorkloadStatus {
            failed_generation: Some("agent-new".to_string()),
            state: Some(WorkloadState::CanaryFailed),
            ..Default::default()
        };

        let status = aggregate(&workload(true, Some(previous)), Some(&old), &new, &[], now()).unwrap();
        assert_eq!(status.state, Some(WorkloadState::Canary));
        assert!(status.failed_generation.is_none());
    }

    #[test]
    fn test_validated_canary_is_reported() {
        let old = generation("agent-old", 3, 3, 3);
        let new = generation("agent-new", 1, 1, 1);
        let signals = [ExternalSignal::CanaryValid {
            generation: "agent-new".to_string(),
        }];

        let status = aggregate(&workload(true, None), Some(&old), &new, &signals, now()).unwrap();
        assert!(status.canary.as_ref().unwrap().validated);
        assert_eq!(
            status.message.as_deref(),
            Some("canary of agent-new validated, promoting at deadline")
        );

        let other = [ExternalSignal::CanaryValid {
            generation: "agent-old".to_string(),
        }];
        let status = aggregate(&workload(true, None), Some(&old), &new, &other, now()).unwrap();
        assert!(!status.canary.unwrap().validated);
    }

    #[test]
    fn test_current_counts_existing_pods_not_available() {
        let mut g = generation("agent-a", 3, 1, 1);
        g.status = Some(GenerationStatus {
            desired: 3,
            current: 3,
            available: 1,
            ready: 1,
        });

        let status = aggregate(&workload(false, None), Some(&g), &g, &[], now()).unwrap();
        assert_eq!(status.current, 3);
        assert_eq!(status.available, 1);
        assert_eq!(status.state, Some(WorkloadState::RollingUpdate));
    }

    #[test]
    fn test_two_generations_without_canary_is_rolling_update() {
        let old = generation("agent-old", 3, 3, 3);
        let new = generation("agent-new", 3, 0, 0);
        let status = aggregate(&workload(false, None), Some(&old), &new, &[], now()).unwrap();
        assert_eq!(status.state, Some(WorkloadState::RollingUpdate));
        assert!(status.canary.is_none());
    }
}
