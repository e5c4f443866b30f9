//! Terminal job status detection.

use crate::messages::JobStatus;

/// Whether a snapshot status ends the job for good.
///
/// `None` (no status reported) is never terminal.
pub fn is_terminal(status: Option<&JobStatus>) -> bool {
    status.is_some_and(JobStatus::is_terminal)
}
