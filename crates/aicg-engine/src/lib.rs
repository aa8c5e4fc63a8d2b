//! Stage graph executor, task workers, polling sweeper and the `aicg`
//! CLI.

pub mod config;
pub mod context;
pub mod executor;
pub mod graph;
pub mod handlers;
pub mod planner;
pub mod service;
pub mod sweeper;

pub use config::{parse_kinds, EngineConfig};
pub use context::EngineContext;
pub use executor::Executor;
pub use planner::{
    accept_partial_materials, advance_job, cancel_job, on_transition_settled, submit_job,
    SubmitOptions, VideoSpec,
};
pub use sweeper::Sweeper;
