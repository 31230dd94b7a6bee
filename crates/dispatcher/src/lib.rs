pub mod cancellation;
pub mod composite;
pub mod job;
pub mod scheduler;

pub use cancellation::CancellationFlag;
pub use composite::{RunInParallel, RunInSequence};
pub use job::{JobContext, JobHandle, JobRecord, JobSnapshot, Runnable};
pub use scheduler::Scheduler;

pub use ensemble_core::{EnsembleError, EnsembleResult};
