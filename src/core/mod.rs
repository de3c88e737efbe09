//! Core types for aint-queue.
//!
//! This module contains the job contract user code implements, the derived
//! status types reported by queue backends, and the clock used for every
//! delay and expiry calculation.

pub mod clock;
pub mod job;
pub mod job_state;

pub use clock::{Clock, ManualClock, SystemClock};
pub use job::{Job, JobCapability, JobContext, JobError};
pub use job_state::{FailedJob, FailureDiagnostic, JobMessage, JobStatus, QueueStatus};
