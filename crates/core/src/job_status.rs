//! Well-known job status name constants.
//!
//! These must match the status strings written by the job runner.

/// The job has been accepted but has not started.
pub const JOB_STATUS_PENDING: &str = "pending";

/// The job is executing.
pub const JOB_STATUS_RUNNING: &str = "running";

/// The job finished successfully.
pub const JOB_STATUS_COMPLETED: &str = "completed";

/// The job failed.
pub const JOB_STATUS_FAILED: &str = "failed";

/// The job was cancelled by a user or by the system.
pub const JOB_STATUS_CANCELLED: &str = "cancelled";

/// Statuses after which a job never reports again.
pub const TERMINAL_JOB_STATUSES: [&str; 3] =
    [JOB_STATUS_COMPLETED, JOB_STATUS_FAILED, JOB_STATUS_CANCELLED];

/// Whether `status` names a terminal outcome.
pub fn is_terminal_status(status: &str) -> bool {
    TERMINAL_JOB_STATUSES.contains(&status)
}
