//! Job status frame types and classifier.
//!
//! The backend sends JSON text frames discriminated by a `type` field:
//! `log`, `progress`, and the control frames `ping` / `connected`.
//! Older job runners send untagged status objects; those are classified
//! as [`ClassifiedMessage::Legacy`] and applied like progress.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use satdash_core::job_events::{MSG_TYPE_CONNECTED, MSG_TYPE_LOG, MSG_TYPE_PING, MSG_TYPE_PROGRESS};
use satdash_core::job_status::{
    is_terminal_status, JOB_STATUS_CANCELLED, JOB_STATUS_COMPLETED, JOB_STATUS_FAILED,
    JOB_STATUS_PENDING, JOB_STATUS_RUNNING,
};

/// Level assigned to log frames that omit one.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Status reported by a job.
///
/// Unknown strings are kept verbatim in [`JobStatus::Other`] and are
/// never terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Other(String),
}

impl JobStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => JOB_STATUS_PENDING,
            Self::Running => JOB_STATUS_RUNNING,
            Self::Completed => JOB_STATUS_COMPLETED,
            Self::Failed => JOB_STATUS_FAILED,
            Self::Cancelled => JOB_STATUS_CANCELLED,
            Self::Other(raw) => raw,
        }
    }

    pub fn is_terminal(&self) -> bool {
        is_terminal_status(self.as_str())
    }
}

impl From<String> for JobStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            JOB_STATUS_PENDING => Self::Pending,
            JOB_STATUS_RUNNING => Self::Running,
            JOB_STATUS_COMPLETED => Self::Completed,
            JOB_STATUS_FAILED => Self::Failed,
            JOB_STATUS_CANCELLED => Self::Cancelled,
            _ => Self::Other(raw),
        }
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest progress reported by a job. Each snapshot replaces the last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Completion percentage, nominally 0-100. Not clamped.
    pub progress: f64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
}

/// One line of job output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: String,
    pub message: String,
    pub timestamp: String,
}

/// Control frames are classified but never surfaced to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFrame {
    Ping,
    Connected,
}

/// Result of classifying one inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifiedMessage {
    Log(LogEntry),
    Progress(ProgressSnapshot),
    /// Untagged (or unrecognised `type`) status payload, applied as
    /// progress for compatibility with older job runners.
    Legacy(ProgressSnapshot),
    Control(ControlFrame),
}

impl ClassifiedMessage {
    /// The progress snapshot carried by this frame, typed or legacy.
    pub fn snapshot(&self) -> Option<&ProgressSnapshot> {
        match self {
            Self::Progress(snapshot) | Self::Legacy(snapshot) => Some(snapshot),
            Self::Log(_) | Self::Control(_) => None,
        }
    }
}

/// Why a frame could not be classified. The frame is dropped.
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("Frame is not valid JSON: {0}")]
    Json(#[source] serde_json::Error),

    #[error("Frame is JSON but not an object")]
    NotAnObject,

    #[error("Malformed {kind} frame: {source}")]
    Shape {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Classify a raw text frame, stamping defaulted log timestamps with
/// the current time.
pub fn classify(text: &str) -> Result<ClassifiedMessage, ClassifyError> {
    classify_at(text, Utc::now())
}

/// Classify a raw text frame using `now` for defaulted log timestamps.
pub fn classify_at(text: &str, now: DateTime<Utc>) -> Result<ClassifiedMessage, ClassifyError> {
    let value: Value = serde_json::from_str(text).map_err(ClassifyError::Json)?;
    let kind = match &value {
        Value::Object(fields) => FrameKind::of(fields),
        _ => return Err(ClassifyError::NotAnObject),
    };

    match kind {
        FrameKind::Log => {
            let raw: RawLog = from_value(value, MSG_TYPE_LOG)?;
            Ok(ClassifiedMessage::Log(raw.into_entry(now)))
        }
        FrameKind::Progress => {
            let raw: RawProgress = from_value(value, MSG_TYPE_PROGRESS)?;
            Ok(ClassifiedMessage::Progress(raw.into_snapshot()))
        }
        FrameKind::Control(frame) => Ok(ClassifiedMessage::Control(frame)),
        FrameKind::Untyped => {
            let raw: RawProgress = from_value(value, "untyped status")?;
            Ok(ClassifiedMessage::Legacy(raw.into_snapshot()))
        }
    }
}

// ---- wire shapes ----

enum FrameKind {
    Log,
    Progress,
    Control(ControlFrame),
    Untyped,
}

impl FrameKind {
    fn of(fields: &Map<String, Value>) -> Self {
        match fields.get("type").and_then(Value::as_str) {
            Some(MSG_TYPE_LOG) => Self::Log,
            Some(MSG_TYPE_PROGRESS) => Self::Progress,
            Some(MSG_TYPE_PING) => Self::Control(ControlFrame::Ping),
            Some(MSG_TYPE_CONNECTED) => Self::Control(ControlFrame::Connected),
            _ => Self::Untyped,
        }
    }
}

/// Missing and `null` fields are treated alike.
#[derive(Deserialize)]
struct RawLog {
    level: Option<String>,
    message: Option<String>,
    timestamp: Option<String>,
}

impl RawLog {
    fn into_entry(self, now: DateTime<Utc>) -> LogEntry {
        LogEntry {
            level: self.level.unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            message: self.message.unwrap_or_default(),
            timestamp: self
                .timestamp
                .unwrap_or_else(|| now.to_rfc3339_opts(SecondsFormat::Millis, true)),
        }
    }
}

#[derive(Deserialize)]
struct RawProgress {
    progress: Option<f64>,
    message: Option<String>,
    status: Option<JobStatus>,
}

impl RawProgress {
    fn into_snapshot(self) -> ProgressSnapshot {
        ProgressSnapshot {
            progress: self.progress.unwrap_or(0.0),
            message: self.message.unwrap_or_default(),
            status: self.status,
        }
    }
}

fn from_value<T: for<'de> Deserialize<'de>>(
    value: Value,
    kind: &'static str,
) -> Result<T, ClassifyError> {
    serde_json::from_value(value).map_err(|source| ClassifyError::Shape { kind, source })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    use super::*;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap()
    }

    #[test]
    fn parse_progress_frame() {
        let msg = classify(r#"{"type":"progress","progress":10,"message":"starting"}"#).unwrap();
        assert_eq!(
            msg,
            ClassifiedMessage::Progress(ProgressSnapshot {
                progress: 10.0,
                message: "starting".into(),
                status: None,
            })
        );
    }

    #[test]
    fn parse_progress_with_terminal_status() {
        let msg =
            classify(r#"{"type":"progress","progress":100,"message":"done","status":"completed"}"#)
                .unwrap();
        let snapshot = msg.snapshot().expect("progress carries a snapshot");
        assert_eq!(snapshot.status, Some(JobStatus::Completed));
    }

    #[test]
    fn parse_log_frame() {
        let msg = classify(
            r#"{"type":"log","level":"warn","message":"retry band C02","timestamp":"2026-03-14T09:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClassifiedMessage::Log(LogEntry {
                level: "warn".into(),
                message: "retry band C02".into(),
                timestamp: "2026-03-14T09:00:00Z".into(),
            })
        );
    }

    #[test]
    fn log_frame_defaults_level_and_timestamp() {
        let msg = classify_at(r#"{"type":"log","message":"tile 3/9"}"#, fixed_now()).unwrap();
        match msg {
            ClassifiedMessage::Log(entry) => {
                assert_eq!(entry.level, "info");
                assert_eq!(entry.message, "tile 3/9");
                assert_eq!(entry.timestamp, "2026-03-14T09:26:53.000Z");
            }
            other => panic!("Expected Log, got {other:?}"),
        }
    }

    #[test]
    fn null_log_fields_use_defaults() {
        let msg = classify_at(
            r#"{"type":"log","level":null,"message":"x","timestamp":null}"#,
            fixed_now(),
        )
        .unwrap();
        assert_matches!(msg, ClassifiedMessage::Log(entry) if entry.level == "info");
    }

    #[test]
    fn control_frames_are_classified() {
        assert_eq!(
            classify(r#"{"type":"ping"}"#).unwrap(),
            ClassifiedMessage::Control(ControlFrame::Ping)
        );
        assert_eq!(
            classify(r#"{"type":"connected","job_id":"j1"}"#).unwrap(),
            ClassifiedMessage::Control(ControlFrame::Connected)
        );
    }

    #[test]
    fn untyped_frame_is_legacy_progress() {
        let msg = classify(r#"{"progress":55,"message":"fetching tiles"}"#).unwrap();
        assert_eq!(
            msg,
            ClassifiedMessage::Legacy(ProgressSnapshot {
                progress: 55.0,
                message: "fetching tiles".into(),
                status: None,
            })
        );
    }

    #[test]
    fn unknown_type_is_legacy_progress() {
        let msg = classify(r#"{"type":"status","status":"failed"}"#).unwrap();
        assert_matches!(msg, ClassifiedMessage::Legacy(ref s) if s.status == Some(JobStatus::Failed));
        assert_eq!(msg.snapshot().map(|s| s.progress), Some(0.0));
    }

    #[test]
    fn non_string_type_is_legacy_progress() {
        let msg = classify(r#"{"type":7,"progress":1}"#).unwrap();
        assert_matches!(msg, ClassifiedMessage::Legacy(_));
    }

    #[test]
    fn unknown_status_is_kept_verbatim() {
        let msg = classify(r#"{"type":"progress","progress":5,"message":"","status":"queued"}"#)
            .unwrap();
        let status = msg.snapshot().and_then(|s| s.status.clone());
        assert_eq!(status, Some(JobStatus::Other("queued".into())));
        assert_eq!(String::from(JobStatus::Other("queued".into())), "queued");
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert_matches!(classify("{not json"), Err(ClassifyError::Json(_)));
        assert_matches!(classify(""), Err(ClassifyError::Json(_)));
    }

    #[test]
    fn non_object_json_is_rejected() {
        assert_matches!(classify("42"), Err(ClassifyError::NotAnObject));
        assert_matches!(classify(r#"["progress"]"#), Err(ClassifyError::NotAnObject));
    }

    #[test]
    fn wrongly_typed_fields_are_rejected() {
        assert_matches!(
            classify(r#"{"type":"progress","progress":"ten","message":"x"}"#),
            Err(ClassifyError::Shape { kind: "progress", .. })
        );
        assert_matches!(
            classify(r#"{"type":"log","message":12}"#),
            Err(ClassifyError::Shape { kind: "log", .. })
        );
    }
}
