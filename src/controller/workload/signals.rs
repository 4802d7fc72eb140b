use crate::crd::workload::{Workload, CANARY_FAILED_ANNOTATION, CANARY_VALID_ANNOTATION};
use kube::ResourceExt;

/// Operator or automation verdict on the in-flight canary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalSignal {
    /// The canary of the named generation was validated
    CanaryValid { generation: String },
    /// The canary was flagged as failed
    CanaryFailed,
}

/// Parse canary signals from workload annotations
///
/// Only `kanari.io/canary-failed: "true"` counts as a failure; an empty
/// `kanari.io/canary-valid` value is ignored.
pub fn signals_from_annotations(workload: &Workload) -> Vec<ExternalSignal> {
    let annotations = workload.annotations();
    let mut signals = Vec::new();

    if let Some(generation) = annotations.get(CANARY_VALID_ANNOTATION) {
        let generation = generation.trim();
        if !generation.is_empty() {
            signals.push(ExternalSignal::CanaryValid {
                generation: generation.to_string(),
            });
        }
    }

    if annotations
        .get(CANARY_FAILED_ANNOTATION)
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
    {
        signals.push(ExternalSignal::CanaryFailed);
    }

    signals
}

pub fn is_canary_failed(signals: &[ExternalSignal]) -> bool {
    signals.contains(&ExternalSignal::CanaryFailed)
}

/// Whether a failure signal applies to the canary of `generation`
///
/// `recorded` is the generation a failure was last recorded against. A record
/// naming another generation means the template changed after the failure,
/// so a leftover annotation does not fail the new canary.
pub fn canary_failed_for(signals: &[ExternalSignal], recorded: Option<&str>, generation: &str) -> bool {
    is_canary_failed(signals) && recorded.is_none_or(|failed| failed == generation)
}

/// Whether the canary of `generation` has been validated
pub fn is_canary_valid(signals: &[ExternalSignal], generation: &str) -> bool {
    signals.iter().any(|s| {
        matches!(s, ExternalSignal::CanaryValid { generation: g } if g == generation)
    })
}
