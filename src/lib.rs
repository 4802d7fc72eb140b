//! kanari: per-node workload rollout controller
//!
//! Materializes a `Generation` per distinct pod template of a `Workload`,
//! gates template changes behind a time-boxed canary on selected nodes and
//! reports rollout state in the workload status.

pub mod config;
pub mod controller;
pub mod crd;
pub mod server;
pub mod store;
