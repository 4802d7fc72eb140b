pub mod clock;
pub mod events;
pub mod workload;

pub use workload::{error_policy, reconcile, Context, ReconcileError, ReconcileOutcome};
