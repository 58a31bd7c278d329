pub mod approval;
pub mod config;
pub mod engine;
pub mod error;
pub mod flow;
pub mod graph;
pub mod mutator;
pub mod order;
pub mod principal;
pub mod sinks;
pub mod status;
pub mod store;
pub mod sweeper;
pub mod telemetry;
pub mod utils;
pub mod workflow;
