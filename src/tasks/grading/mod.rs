//! Grading orchestration: one cooperative task per submission, joined by a
//! per-batch supervisor.

mod board;
mod bulk;
mod job;
mod orchestrator;
mod policy;
mod worker;

pub use job::{GradingJob, JobFailure, JobState};
pub use orchestrator::{
    BatchHandle, BatchProgress, BatchReport, BatchRequest, GradingOrchestrator,
    PreconditionError, RegradeRequest,
};
pub use policy::RetryPolicy;
