//! Message type discriminators carried in the `type` field of job
//! status frames on `/ws/jobs/{job_id}`.

/// Append-only log line emitted by the job.
pub const MSG_TYPE_LOG: &str = "log";

/// Progress snapshot (percentage, message, optional status).
pub const MSG_TYPE_PROGRESS: &str = "progress";

/// Keep-alive frame sent by the backend. Never surfaced.
pub const MSG_TYPE_PING: &str = "ping";

/// Handshake acknowledgement sent once after the socket opens. Never surfaced.
pub const MSG_TYPE_CONNECTED: &str = "connected";

/// Path prefix of the per-job status socket.
pub const JOB_SOCKET_PATH_PREFIX: &str = "/ws/jobs/";
