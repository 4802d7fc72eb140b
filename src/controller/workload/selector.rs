use super::signals::{canary_failed_for, is_canary_valid, ExternalSignal};
use super::validation::canary_duration;
use crate::crd::generation::Generation;
use crate::crd::workload::Workload;
use chrono::{DateTime, Duration, Utc};
use kube::ResourceExt;
use tracing::debug;

/// Which generation is authoritative now, and when to look again
#[derive(Debug, Clone, Copy)]
pub struct Selection<'a> {
    pub current: &'a Generation,
    /// Time until the canary deadline; zero or negative means already due
    pub requeue_after: Duration,
}

impl Selection<'_> {
    pub fn current_name(&self) -> String {
        self.current.name_any()
    }
}

/// Pick the current generation for a workload
///
/// Pure function of its inputs. The canary deadline is anchored at the
/// creation of the up-to-date generation, so promotion depends only on `now`,
/// the configured duration and the signals:
///
/// 1. active is up-to-date → up-to-date
/// 2. no canary strategy → up-to-date
/// 3. canary of the up-to-date generation failed → stay on active, no timer
/// 4. canary validated, or no signal: promote once `now >= deadline`,
///    otherwise stay on active until the deadline
pub fn select_current<'a>(
    workload: &Workload,
    active: &'a Generation,
    up_to_date: &'a Generation,
    signals: &[ExternalSignal],
    now: DateTime<Utc>,
) -> Selection<'a> {
    let name = workload.name_any();
    let up_to_date_name = up_to_date.name_any();

    if active.name_any() == up_to_date_name {
        return promote(up_to_date, Duration::zero());
    }

    let Some(canary) = &workload.spec.strategy.canary else {
        debug!(workload = ?name, generation = %up_to_date_name, "No canary configured, promoting");
        return promote(up_to_date, Duration::zero());
    };

    let recorded_failure = workload
        .status
        .as_ref()
        .and_then(|s| s.failed_generation.as_deref());
    if canary_failed_for(signals, recorded_failure, &up_to_date_name) {
        debug!(workload = ?name, generation = %up_to_date_name, "Canary failed, holding active generation");
        return Selection {
            current: active,
            requeue_after: Duration::zero(),
        };
    }

    let duration = Duration::from_std(canary_duration(canary)).unwrap_or(Duration::minutes(10));
    let started = up_to_date.created_at().unwrap_or(now);
    let remaining = (started + duration) - now;

    if is_canary_valid(signals, &up_to_date_name) {
        debug!(
            workload = ?name,
            generation = %up_to_date_name,
            remaining_secs = remaining.num_seconds(),
            "Canary validated"
        );
    }

    if remaining <= Duration::zero() {
        promote(up_to_date, remaining)
    } else {
        Selection {
            current: active,
            requeue_after: remaining,
        }
    }
}

fn promote(up_to_date: &Generation, requeue_after: Duration) -> Selection<'_> {
    Selection {
        current: up_to_date,
        requeue_after,
    }
}
