use crate::crd::defaults::DEFAULT_CANARY_DURATION;
use crate::crd::workload::{CanaryStrategy, Workload};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::time::Duration;

/// Validate a Workload specification
///
/// Checks the runtime constraints the CRD schema cannot express:
/// - rollingUpdate int|percent fields are non-negative integers or 0%-100%
/// - `slowStartIntervalDuration` and `canary.duration` parse (e.g. "30s", "5m")
/// - `maxParallelPodCreation` is at least 1
/// - `canary.replicas` is positive (absolute) or in 1%-100%
/// - `canary.nodeAntiAffinityKeys` entries are non-empty
pub fn validate_workload(workload: &Workload) -> Result<(), String> {
    let strategy = &workload.spec.strategy;
    let ru = &strategy.rolling_update;

    for (field, value) in [
        ("maxUnavailable", &ru.max_unavailable),
        ("maxPodSchedulerFailure", &ru.max_pod_scheduler_failure),
        ("slowStartAdditiveIncrease", &ru.slow_start_additive_increase),
    ] {
        if let Some(value) = value {
            if !is_valid_int_or_percent(value) {
                return Err(format!(
                    "spec.strategy.rollingUpdate.{field} invalid: {}",
                    int_or_string_display(value)
                ));
            }
        }
    }

    if let Some(parallel) = ru.max_parallel_pod_creation {
        if parallel < 1 {
            return Err(format!(
                "spec.strategy.rollingUpdate.maxParallelPodCreation must be >= 1, got {parallel}"
            ));
        }
    }

    if let Some(interval) = &ru.slow_start_interval_duration {
        if parse_duration(interval).is_none() {
            return Err(format!(
                "spec.strategy.rollingUpdate.slowStartIntervalDuration invalid: {interval}"
            ));
        }
    }

    if let Some(canary) = &strategy.canary {
        validate_canary(canary)?;
    }

    Ok(())
}

fn validate_canary(canary: &CanaryStrategy) -> Result<(), String> {
    if let Some(replicas) = &canary.replicas {
        let positive = match replicas {
            IntOrString::Int(n) => *n >= 1,
            IntOrString::String(s) => parse_percent(s).is_some_and(|p| p >= 1),
        };
        if !positive {
            return Err(format!(
                "spec.strategy.canary.replicas must select at least one node, got {}",
                int_or_string_display(replicas)
            ));
        }
    }

    if let Some(duration) = &canary.duration {
        if parse_duration(duration).is_none() {
            return Err(format!("spec.strategy.canary.duration invalid: {duration}"));
        }
    }

    for (i, key) in canary.node_anti_affinity_keys.iter().enumerate() {
        if key.trim().is_empty() {
            return Err(format!(
                "spec.strategy.canary.nodeAntiAffinityKeys[{i}] cannot be empty"
            ));
        }
    }

    Ok(())
}

/// Canary duration, falling back to the default when unset or unparsable
pub fn canary_duration(canary: &CanaryStrategy) -> Duration {
    canary
        .duration
        .as_deref()
        .and_then(parse_duration)
        .or_else(|| parse_duration(DEFAULT_CANARY_DURATION))
        .unwrap_or(Duration::from_secs(600))
}

/// Resolve an int|percent value against `total` (percentages round up)
///
/// Invalid values (negative, out of range, malformed) resolve to 0.
pub fn resolve_int_or_percent(value: &IntOrString, total: i32) -> i32 {
    match value {
        IntOrString::Int(n) if *n >= 0 => *n,
        IntOrString::Int(_) => 0,
        IntOrString::String(s) => match parse_percent(s) {
            Some(percent) => ((total as f64 * percent as f64) / 100.0).ceil() as i32,
            None => match s.trim().parse::<i32>() {
                Ok(n) if n >= 0 => n,
                _ => 0,
            },
        },
    }
}

fn parse_percent(value: &str) -> Option<i32> {
    let percent: i32 = value.trim().strip_suffix('%')?.parse().ok()?;
    (0..=100).contains(&percent).then_some(percent)
}

fn is_valid_int_or_percent(value: &IntOrString) -> bool {
    match value {
        IntOrString::Int(n) => *n >= 0,
        IntOrString::String(s) if s.trim().ends_with('%') => parse_percent(s).is_some(),
        IntOrString::String(s) => s.trim().parse::<i32>().is_ok_and(|n| n >= 0),
    }
}

fn int_or_string_display(value: &IntOrString) -> String {
    match value {
        IntOrString::Int(n) => n.to_string(),
        IntOrString::String(s) => s.clone(),
    }
}

/// Maximum accepted duration (1 week)
const MAX_DURATION_SECS: u64 = 168 * 3600;

/// Parse a duration string like "5m", "30s", "1h" into std::time::Duration
///
/// Compound forms as written by Kubernetes for `metav1.Duration` are
/// accepted too: "5m0s", "1h30m", "1h0m0s". Units appear at most once and in
/// h, m, s order.
///
/// Zero is rejected, as is anything above one week. Returns None if invalid
/// or out of range.
pub fn parse_duration(duration_str: &str) -> Option<Duration> {
    let mut rest = duration_str.trim();
    if rest.is_empty() {
        return None;
    }

    let mut total: u64 = 0;
    // Index into "hms" of the last unit seen
    let mut last_unit: Option<usize> = None;

    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit())?;
        if digits == 0 {
            return None;
        }
        let number: u64 = rest[..digits].parse().ok()?;
        let unit = rest[digits..].chars().next()?;

        let (order, secs) = match unit {
            'h' => (0, 3600),
            'm' => (1, 60),
            's' => (2, 1),
            _ => return None,
        };
        if last_unit.is_some_and(|last| order <= last) {
            return None;
        }
        last_unit = Some(order);

        total = total.checked_add(number.checked_mul(secs)?)?;
        rest = &rest[digits + unit.len_utf8()..];
    }

    if total == 0 || total > MAX_DURATION_SECS {
        return None;
    }
    Some(Duration::from_secs(total))
}
