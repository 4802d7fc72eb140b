use super::lifecycle::{cleanup, ensure_up_to_date_generation, CleanupError, UpToDate};
use super::nodes::select_nodes;
use super::selector::select_current;
use super::signals::signals_from_annotations;
use super::status::aggregate;
use super::validation::validate_workload;
use crate::config::ControllerConfig;
use crate::controller::clock::Clock;
use crate::controller::events::{reasons, EventPublisher};
use crate::crd::defaults::{is_defaulted, with_defaults};
use crate::crd::workload::{Workload, WorkloadState};
use crate::server::SharedMetrics;
use crate::store::{NodeInventory, StoreError, WorkloadStore};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Delay before looking again when the template's generation is terminating
const TERMINATING_REQUEUE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Write conflict: {0}")]
    Conflict(String),

    #[error("Not enough nodes for canary: required {required}, available {available}")]
    InsufficientNodes { required: usize, available: usize },

    #[error("Object store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Invalid Workload spec: {0}")]
    Validation(String),

    #[error("Failed to serialize PodTemplateSpec: {0}")]
    Serialization(String),

    #[error("Workload missing namespace")]
    MissingNamespace,
}

impl From<StoreError> for ReconcileError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { .. } | StoreError::AlreadyExists { .. } => {
                ReconcileError::Conflict(err.to_string())
            }
            StoreError::NotFound { .. } | StoreError::Unavailable(_) => {
                ReconcileError::StoreUnavailable(err.to_string())
            }
        }
    }
}

/// What the loop should do after a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Nothing scheduled; wait for the next watch event
    Done,
    /// Run again right away (defaults persisted or generation created)
    RequeueNow,
    /// Run again after a delay (canary deadline, terminating generation)
    RequeueAfter(Duration),
}

impl ReconcileOutcome {
    pub fn into_action(self) -> Action {
        match self {
            ReconcileOutcome::Done => Action::await_change(),
            ReconcileOutcome::RequeueNow => Action::requeue(Duration::ZERO),
            ReconcileOutcome::RequeueAfter(after) => Action::requeue(after),
        }
    }
}

pub struct Context {
    pub store: Arc<dyn WorkloadStore>,
    pub nodes: Arc<dyn NodeInventory>,
    pub clock: Arc<dyn Clock>,
    pub events: Arc<dyn EventPublisher>,
    /// When Some, records reconciliation counts and durations
    pub metrics: Option<SharedMetrics>,
    pub config: ControllerConfig,
}

impl Context {
    pub fn new(
        store: Arc<dyn WorkloadStore>,
        nodes: Arc<dyn NodeInventory>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventPublisher>,
        metrics: Option<SharedMetrics>,
        config: ControllerConfig,
    ) -> Self {
        Context {
            store,
            nodes,
            clock,
            events,
            metrics,
            config,
        }
    }

    /// Context over an in-memory store, without events or metrics
    #[cfg(test)]
    pub fn new_mock(store: crate::store::MemoryStore, clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(store);
        Context {
            store: store.clone(),
            nodes: store,
            clock,
            events: Arc::new(crate::controller::events::NoopEventPublisher),
            metrics: None,
            config: ControllerConfig::default(),
        }
    }

    async fn publish(&self, workload: &Workload, type_: EventType, reason: &str, note: String) {
        self.events
            .publish(&workload.object_ref(&()), type_, reason, Some(note))
            .await;
    }
}

/// Reconcile a Workload resource
///
/// Entry point for the kube-runtime controller. Runs one pass of
/// `reconcile_workload` against the latest stored object and maps the
/// outcome onto an `Action`.
pub async fn reconcile(workload: Arc<Workload>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    let start_time = Instant::now();
    let namespace = workload
        .namespace()
        .ok_or(ReconcileError::MissingNamespace)?;
    let name = workload.name_any();

    info!(workload = ?name, namespace = ?namespace, "Reconciling Workload");

    let result = reconcile_workload(&namespace, &name, &ctx).await;

    if let Some(ref metrics) = ctx.metrics {
        let duration_secs = start_time.elapsed().as_secs_f64();
        match &result {
            Ok(_) => metrics.record_reconciliation_success(duration_secs),
            Err(_) => metrics.record_reconciliation_error(duration_secs),
        }
    }

    result.map(ReconcileOutcome::into_action)
}

/// Error policy for the controller
///
/// Conflicts retry quickly; everything else backs off.
pub fn error_policy(workload: Arc<Workload>, error: &ReconcileError, ctx: Arc<Context>) -> Action {
    warn!(workload = ?workload.name_any(), error = %error, "Reconcile error (will retry)");

    match error {
        ReconcileError::Conflict(_) => Action::requeue(ctx.config.conflict_requeue),
        _ => Action::requeue(ctx.config.error_requeue),
    }
}

/// One reconciliation pass for a workload
///
/// 1. Load the workload (gone → done)
/// 2. Validate, then persist defaults if any are missing (requeue)
/// 3. Ensure a generation exists for the current template (created → requeue)
/// 4. Select the current generation and canary nodes
/// 5. Write the aggregated status, then retire superseded generations
pub async fn reconcile_workload(
    namespace: &str,
    name: &str,
    ctx: &Context,
) -> Result<ReconcileOutcome, ReconcileError> {
    let now = ctx.clock.now();

    let workload = match ctx.store.get_workload(namespace, name).await {
        Ok(w) => w,
        Err(e) if e.is_not_found() => {
            debug!(workload = ?name, namespace = ?namespace, "Workload deleted, nothing to do");
            if let Some(ref metrics) = ctx.metrics {
                metrics.forget_workload(namespace, name);
            }
            return Ok(ReconcileOutcome::Done);
        }
        Err(e) => {
            error!(workload = ?name, error = %e, "Failed to load Workload");
            return Err(e.into());
        }
    };

    if let Err(validation_error) = validate_workload(&workload) {
        error!(workload = ?name, error = %validation_error, "Workload spec validation failed");
        return Err(ReconcileError::Validation(validation_error));
    }

    if !is_defaulted(&workload.spec) {
        let mut defaulted = workload.clone();
        defaulted.spec = with_defaults(&workload.spec);
        ctx.store.replace_workload(&defaulted).await?;
        info!(workload = ?name, "Persisted Workload defaults");
        return Ok(ReconcileOutcome::RequeueNow);
    }

    let listed = ctx.store.list_generations(namespace, name).await?;
    let up_to_date = match ensure_up_to_date_generation(ctx.store.as_ref(), &workload, &listed).await? {
        UpToDate::Existing(generation) => generation,
        UpToDate::Created(generation) => {
            ctx.publish(
                &workload,
                EventType::Normal,
                reasons::GENERATION_CREATED,
                format!("Created generation {}", generation.name_any()),
            )
            .await;
            return Ok(ReconcileOutcome::RequeueNow);
        }
        UpToDate::Terminating(generation) => {
            info!(
                workload = ?name,
                generation = %generation,
                "Template matches a generation still being deleted, waiting"
            );
            return Ok(ReconcileOutcome::RequeueAfter(TERMINATING_REQUEUE));
        }
    };
    let up_to_date_name = up_to_date.name_any();

    // Generations already being deleted are retired
    let existing: Vec<_> = listed.into_iter().filter(|g| !g.is_terminating()).collect();

    let signals = signals_from_annotations(&workload);
    let previous = workload.status.clone().unwrap_or_default();

    // Without a recorded (and still existing) active generation, the
    // up-to-date one is authoritative
    let active = previous
        .active_generation
        .as_deref()
        .and_then(|active| existing.iter().find(|g| g.name_any() == active))
        .unwrap_or(&up_to_date);

    let selection = select_current(&workload, active, &up_to_date, &signals, now);
    let current_name = selection.current_name();

    let Some(mut status) = aggregate(&workload, Some(selection.current), &up_to_date, &signals, now)
    else {
        return Ok(ReconcileOutcome::Done);
    };

    if let (Some(strategy), Some(canary_status)) =
        (&workload.spec.strategy.canary, status.canary.as_mut())
    {
        let nodes = ctx.nodes.list_nodes().await?;
        if let Err(e) = select_nodes(strategy, &nodes, canary_status) {
            warn!(workload = ?name, error = %e, "Cannot select canary nodes");
            ctx.publish(&workload, EventType::Warning, reasons::INSUFFICIENT_NODES, e.to_string())
                .await;
            return Err(e);
        }
    }

    if workload.status.as_ref() != Some(&status) {
        ctx.store.update_workload_status(&workload, &status).await?;
        info!(
            workload = ?name,
            state = ?status.state,
            active_generation = %current_name,
            canary = ?status.canary,
            "Updated Workload status"
        );
        publish_transition(ctx, &workload, &previous.state, &status.state, &current_name, &up_to_date_name)
            .await;
    } else {
        debug!(workload = ?name, "Status unchanged");
    }

    if let Some(ref metrics) = ctx.metrics {
        let canary_nodes = status.canary.as_ref().map(|c| c.nodes.len()).unwrap_or(0);
        metrics.set_canary_nodes(namespace, name, canary_nodes);
    }

    match cleanup(ctx.store.as_ref(), &existing, &current_name, &up_to_date_name).await {
        Ok(deleted) => {
            for generation in deleted {
                ctx.publish(
                    &workload,
                    EventType::Normal,
                    reasons::GENERATION_DELETED,
                    format!("Deleted superseded generation {generation}"),
                )
                .await;
            }
        }
        Err(CleanupError::Partial { deleted, failures }) => {
            warn!(
                workload = ?name,
                deleted = ?deleted,
                failed = failures.len(),
                "Partial cleanup failure, will retry on a later pass"
            );
            if let Some(ref metrics) = ctx.metrics {
                metrics.record_cleanup_failures(failures.len());
            }
        }
    }

    if selection.requeue_after > chrono::Duration::zero() {
        let after = selection.requeue_after.to_std().unwrap_or_default();
        debug!(workload = ?name, requeue_secs = after.as_secs(), "Waiting for canary deadline");
        Ok(ReconcileOutcome::RequeueAfter(after))
    } else {
        Ok(ReconcileOutcome::Done)
    }
}

async fn publish_transition(
    ctx: &Context,
    workload: &Workload,
    from: &Option<WorkloadState>,
    to: &Option<WorkloadState>,
    current: &str,
    up_to_date: &str,
) {
    if from == to {
        return;
    }
    match (from, to) {
        (_, Some(WorkloadState::Canary)) => {
            ctx.publish(
                workload,
                EventType::Normal,
                reasons::CANARY_STARTED,
                format!("Canary of {up_to_date} started"),
            )
            .await
        }
        (_, Some(WorkloadState::CanaryFailed)) => {
            ctx.publish(
                workload,
                EventType::Warning,
                reasons::CANARY_FAILED,
                format!("Canary of {up_to_date} failed, keeping {current}"),
            )
            .await
        }
        (Some(WorkloadState::Canary), _) if current == up_to_date => {
            ctx.publish(
                workload,
                EventType::Normal,
                reasons::CANARY_PROMOTED,
                format!("Promoted {up_to_date}"),
            )
            .await
        }
        _ => {}
    }
}
