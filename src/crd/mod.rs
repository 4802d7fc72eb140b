pub mod defaults;
pub mod generation;
pub mod time;
pub mod workload;
