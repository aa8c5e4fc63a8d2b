//! HTTP controller for the production pipeline.
//!
//! Presentation is out of scope for the core; this crate is only the
//! operational `serve` surface: job submission/status/cancel, generation
//! history selection and health. Everything goes through the
//! [`PipelineService`] trait, implemented by the engine.

pub mod error;
pub mod routes;
pub mod service;

pub use error::{ApiError, ApiResult};
pub use routes::{router, SharedService};
pub use service::{
    HealthReport, HistoryQuery, JobView, PipelineService, SubmitJobRequest, VideoSettings,
};
