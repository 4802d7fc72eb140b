use super::fingerprint::fingerprint;
use super::reconcile::ReconcileError;
use crate::crd::generation::{
    Generation, GenerationSpec, FINGERPRINT_ANNOTATION, WORKLOAD_NAME_LABEL,
};
use crate::crd::workload::Workload;
use crate::store::{StoreError, WorkloadStore};
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Number of fingerprint characters used in generation names
const NAME_FINGERPRINT_LEN: usize = 10;

/// Deletions that failed while retiring superseded generations
#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("failed to delete {} generation(s)", .failures.len())]
    Partial {
        /// Generations that were deleted (or already gone)
        deleted: Vec<String>,
        failures: Vec<(String, StoreError)>,
    },
}

/// Deterministic generation name for a workload and fingerprint
pub fn generation_name(workload_name: &str, fingerprint: &str) -> String {
    let short = &fingerprint[..fingerprint.len().min(NAME_FINGERPRINT_LEN)];
    format!("{workload_name}-{short}")
}

/// Build the generation object for the workload's current template
pub fn build_generation(workload: &Workload, fingerprint: &str) -> Result<Generation, ReconcileError> {
    let namespace = workload
        .namespace()
        .ok_or(ReconcileError::MissingNamespace)?;
    let workload_name = workload.name_any();

    let labels = BTreeMap::from([(WORKLOAD_NAME_LABEL.to_string(), workload_name.clone())]);
    let annotations =
        BTreeMap::from([(FINGERPRINT_ANNOTATION.to_string(), fingerprint.to_string())]);

    Ok(Generation {
        metadata: ObjectMeta {
            name: Some(generation_name(&workload_name, fingerprint)),
            namespace: Some(namespace),
            labels: Some(labels),
            annotations: Some(annotations),
            owner_references: workload.controller_owner_ref(&()).map(|r| vec![r]),
            ..Default::default()
        },
        spec: GenerationSpec {
            fingerprint: fingerprint.to_string(),
            template: workload.spec.template.clone(),
        },
        status: None,
    })
}

/// Generation matching the workload's template
#[derive(Debug)]
pub enum UpToDate {
    /// Already listed
    Existing(Generation),
    /// Created by this pass. An `AlreadyExists` answer from the store counts
    /// too: an earlier pass (or a create whose response was lost) made it,
    /// and the next pass will list it.
    Created(Generation),
    /// The matching generation is still being deleted; it cannot be reused
    /// or recreated until it is gone
    Terminating(String),
}

/// Find or create the generation matching the workload's template
///
/// `existing` is the full listing, terminating generations included.
pub async fn ensure_up_to_date_generation(
    store: &dyn WorkloadStore,
    workload: &Workload,
    existing: &[Generation],
) -> Result<UpToDate, ReconcileError> {
    let fp = fingerprint(&workload.spec.template)?;
    let matching = existing.iter().find(|g| g.fingerprint() == Some(fp.as_str()));

    match matching {
        Some(found) if found.is_terminating() => {
            debug!(
                workload = ?workload.name_any(),
                generation = %found.name_any(),
                "Up-to-date generation is terminating"
            );
            return Ok(UpToDate::Terminating(found.name_any()));
        }
        Some(found) => {
            debug!(
                workload = ?workload.name_any(),
                generation = %found.name_any(),
                "Up-to-date generation exists"
            );
            return Ok(UpToDate::Existing(found.clone()));
        }
        None => {}
    }

    let generation = build_generation(workload, &fp)?;
    let name = generation.name_any();

    match store.create_generation(&generation).await {
        Ok(created) => {
            info!(
                workload = ?workload.name_any(),
                generation = %name,
                fingerprint = %fp,
                "Created generation"
            );
            Ok(UpToDate::Created(created))
        }
        Err(StoreError::AlreadyExists { .. }) => {
            debug!(generation = %name, "Generation already exists, will pick it up next pass");
            Ok(UpToDate::Created(generation))
        }
        Err(e) => Err(e.into()),
    }
}

/// Delete every generation except `current` and `up_to_date`
///
/// Each superseded generation is deleted once; a failure does not stop the
/// remaining deletions. A generation that is already gone counts as deleted.
pub async fn cleanup(
    store: &dyn WorkloadStore,
    existing: &[Generation],
    current: &str,
    up_to_date: &str,
) -> Result<Vec<String>, CleanupError> {
    let mut seen = HashSet::new();
    let mut deleted = Vec::new();
    let mut failures = Vec::new();

    for generation in existing {
        let name = generation.name_any();
        if name == current || name == up_to_date || !seen.insert(name.clone()) {
            continue;
        }
        let namespace = generation.namespace().unwrap_or_default();

        match store.delete_generation(&namespace, &name).await {
            Ok(()) => {
                info!(generation = %name, namespace = %namespace, "Deleted superseded generation");
                deleted.push(name);
            }
            Err(e) if e.is_not_found() => {
                debug!(generation = %name, "Generation already deleted");
                deleted.push(name);
            }
            Err(e) => {
                warn!(generation = %name, error = %e, "Failed to delete generation");
                failures.push((name, e));
            }
        }
    }

    if failures.is_empty() {
        Ok(deleted)
    } else {
        Err(CleanupError::Partial { deleted, failures })
    }
}
