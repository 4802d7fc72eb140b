pub mod fingerprint;
pub mod lifecycle;
pub mod nodes;
pub mod reconcile;
pub mod selector;
pub mod signals;
pub mod status;
pub mod validation;

pub use fingerprint::*;
pub use lifecycle::*;
pub use nodes::*;
pub use reconcile::*;
pub use selector::*;
pub use signals::*;
pub use status::*;
pub use validation::*;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "workload_test.rs"]
mod tests;
