//! Per-job socket lifecycle and reconnection state machine.
//!
//! [`ConnectionManager`] owns at most one live session. A session is one
//! channel instance: a driver task that connects, applies frames in
//! delivery order, and on close either schedules a single backoff timer
//! or stops for good. Consumers observe a [`ChannelView`] through a
//! [`tokio::sync::watch`] channel.
//!
//! Every mutation of session state happens under the session mutex and
//! is published while that lock is held. [`ConnectionManager::teardown`]
//! takes the same lock to mark the session released before cancelling
//! it, so a close handler racing with teardown observes the flag and
//! never schedules another attempt.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use satdash_core::types::JobId;

use crate::backoff::BackoffPolicy;
use crate::messages::{classify, ClassifiedMessage, JobStatus, LogEntry, ProgressSnapshot};
use crate::origin::PageOrigin;
use crate::terminal::is_terminal;
use crate::transport::{Connector, FrameStream};

/// Reconnect attempts allowed between two successful opens.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Per-acquisition channel settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelOptions {
    pub max_retries: u32,
    pub backoff: BackoffPolicy,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Where a channel instance is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    #[default]
    Idle,
    Connecting,
    Open,
    /// Socket closed; a backoff timer is pending.
    Reconnecting,
    /// No further activity: terminal status, exhausted budget, or released.
    ClosedTerminal,
}

/// Everything a consumer can observe about a channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelView {
    pub progress: Option<ProgressSnapshot>,
    /// Arrival-ordered, never deduplicated.
    pub logs: Vec<LogEntry>,
    pub connected: bool,
    pub reconnecting: bool,
    pub phase: ConnectionPhase,
    /// First terminal status the job reported. Later snapshots never
    /// clear or replace it.
    pub outcome: Option<JobStatus>,
}

// ---------------------------------------------------------------------------
// ConnectionState
// ---------------------------------------------------------------------------

/// Retry budget and terminal bookkeeping for one channel instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    attempts: u32,
    max_retries: u32,
    /// Monotonic: once set, no reconnect is ever scheduled.
    terminal: bool,
    /// Set by teardown; blocks every further mutation.
    released: bool,
}

/// What to do after a socket closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDecision {
    Reconnect { delay: Duration, attempt: u32 },
    Stop(StopReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    TerminalStatus,
    RetriesExhausted,
    Released,
}

impl ConnectionState {
    pub fn new(max_retries: u32) -> Self {
        Self {
            attempts: 0,
            max_retries,
            terminal: false,
            released: false,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn on_open(&mut self) {
        self.attempts = 0;
    }

    /// Record a snapshot status. Returns true the first time a terminal
    /// status is seen.
    pub fn observe_status(&mut self, status: Option<&JobStatus>) -> bool {
        if self.terminal || !is_terminal(status) {
            return false;
        }
        self.terminal = true;
        true
    }

    pub fn on_close(&mut self, backoff: &BackoffPolicy) -> CloseDecision {
        if self.released {
            return CloseDecision::Stop(StopReason::Released);
        }
        if self.terminal {
            return CloseDecision::Stop(StopReason::TerminalStatus);
        }
        if self.attempts >= self.max_retries {
            return CloseDecision::Stop(StopReason::RetriesExhausted);
        }

        let delay = backoff.delay(self.attempts);
        self.attempts += 1;
        CloseDecision::Reconnect {
            delay,
            attempt: self.attempts,
        }
    }

    /// Mark released (and terminal). Returns false if already released.
    pub fn release(&mut self) -> bool {
        self.terminal = true;
        !std::mem::replace(&mut self.released, true)
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// State shared between the manager and one driver task.
struct Session {
    job_id: JobId,
    url: String,
    /// Distinguishes channel instances for the same job in logs.
    session_id: Uuid,
    backoff: BackoffPolicy,
    state: Mutex<ConnectionState>,
    view: Arc<watch::Sender<ChannelView>>,
    cancel: CancellationToken,
}

impl Session {
    fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f` under the session lock unless the session was released.
    fn update(&self, f: impl FnOnce(&mut ConnectionState, &mut ChannelView)) -> bool {
        let mut state = self.lock();
        if state.released {
            return false;
        }
        self.view.send_modify(|view| f(&mut state, view));
        true
    }

    fn begin_attempt(&self) -> bool {
        self.update(|_, view| {
            view.connected = false;
            view.phase = ConnectionPhase::Connecting;
        })
    }

    fn handle_open(&self) -> bool {
        let live = self.update(|state, view| {
            state.on_open();
            view.connected = true;
            view.reconnecting = false;
            view.phase = ConnectionPhase::Open;
        });
        if live {
            tracing::info!(job_id = %self.job_id, session_id = %self.session_id, "Job socket open");
        }
        live
    }

    fn handle_frame(&self, text: &str) {
        let message = match classify(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(
                    job_id = %self.job_id,
                    error = %e,
                    raw_message = %text,
                    "Dropping malformed job frame",
                );
                return;
            }
        };

        match message {
            ClassifiedMessage::Log(entry) => {
                self.update(|_, view| view.logs.push(entry));
            }
            ClassifiedMessage::Progress(snapshot) => self.apply_snapshot(snapshot),
            ClassifiedMessage::Legacy(snapshot) => {
                tracing::debug!(job_id = %self.job_id, "Untyped status frame applied as progress");
                self.apply_snapshot(snapshot);
            }
            ClassifiedMessage::Control(frame) => {
                tracing::trace!(job_id = %self.job_id, ?frame, "Control frame");
            }
        }
    }

    fn apply_snapshot(&self, snapshot: ProgressSnapshot) {
        let mut outcome = None;
        self.update(|state, view| {
            if state.observe_status(snapshot.status.as_ref()) {
                view.outcome = snapshot.status.clone();
                outcome = snapshot.status.clone();
            }
            view.progress = Some(snapshot);
        });

        if let Some(status) = outcome {
            tracing::info!(
                job_id = %self.job_id,
                %status,
                "Job reached terminal status, reconnects disabled",
            );
        }
    }

    fn handle_close(&self) -> CloseDecision {
        let mut state = self.lock();
        let decision = state.on_close(&self.backoff);
        if decision == CloseDecision::Stop(StopReason::Released) {
            return decision;
        }

        self.view.send_modify(|view| {
            view.connected = false;
            match decision {
                CloseDecision::Reconnect { .. } => {
                    view.reconnecting = true;
                    view.phase = ConnectionPhase::Reconnecting;
                }
                CloseDecision::Stop(_) => {
                    view.reconnecting = false;
                    view.phase = ConnectionPhase::ClosedTerminal;
                }
            }
        });
        decision
    }

    fn release(&self) {
        let mut state = self.lock();
        if state.release() {
            self.view.send_modify(|view| {
                view.connected = false;
                view.reconnecting = false;
                view.phase = ConnectionPhase::ClosedTerminal;
            });
        }
        drop(state);
        self.cancel.cancel();
    }

    /// Apply frames until the socket closes. Returns false if cancelled.
    async fn pump(&self, mut frames: FrameStream) -> bool {
        if !self.handle_open() {
            return false;
        }

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return false,
                next = frames.next() => next,
            };

            match next {
                Some(Ok(text)) => self.handle_frame(&text),
                Some(Err(e)) => {
                    tracing::warn!(job_id = %self.job_id, error = %e, "Job socket error");
                    return true;
                }
                None => {
                    tracing::info!(job_id = %self.job_id, "Job socket closed");
                    return true;
                }
            }
        }
    }
}

/// Driver loop for one session: connect -> pump -> decide -> back off.
///
/// Runs until the session stops or is cancelled. Exactly one socket is
/// live at a time and at most one backoff sleep is pending.
async fn drive(session: Arc<Session>, connector: Arc<dyn Connector>) {
    loop {
        if !session.begin_attempt() {
            return;
        }

        tracing::debug!(job_id = %session.job_id, url = %session.url, "Connecting job socket");
        let connected = tokio::select! {
            biased;
            _ = session.cancel.cancelled() => return,
            result = connector.connect(&session.url) => result,
        };

        match connected {
            Ok(frames) => {
                if !session.pump(frames).await {
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(job_id = %session.job_id, error = %e, "Job socket failed to open");
            }
        }

        match session.handle_close() {
            CloseDecision::Reconnect { delay, attempt } => {
                tracing::info!(
                    job_id = %session.job_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling job socket reconnect",
                );
                tokio::select! {
                    biased;
                    _ = session.cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            CloseDecision::Stop(StopReason::TerminalStatus) => {
                tracing::info!(job_id = %session.job_id, "Job finished, channel closed");
                return;
            }
            CloseDecision::Stop(StopReason::RetriesExhausted) => {
                tracing::warn!(
                    job_id = %session.job_id,
                    "Reconnect budget exhausted, giving up on job socket",
                );
                return;
            }
            CloseDecision::Stop(StopReason::Released) => return,
        }
    }
}

// ---------------------------------------------------------------------------
// ConnectionManager
// ---------------------------------------------------------------------------

struct ActiveSession {
    session: Arc<Session>,
    task: Option<JoinHandle<()>>,
}

/// Owns the socket, the backoff timer and the observable view for one
/// job id at a time.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    origin: PageOrigin,
    options: ChannelOptions,
    view: Arc<watch::Sender<ChannelView>>,
    active: Option<ActiveSession>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, origin: PageOrigin, options: ChannelOptions) -> Self {
        let (view, _) = watch::channel(ChannelView::default());
        Self {
            connector,
            origin,
            options,
            view: Arc::new(view),
            active: None,
        }
    }

    /// Start a fresh channel instance for `job_id`.
    ///
    /// Any previous session is torn down first. The view, retry budget
    /// and terminal flag start from scratch. Must be called from within
    /// a tokio runtime.
    pub fn open(&mut self, job_id: JobId) {
        self.teardown();

        let url = self.origin.job_socket_url(&job_id);
        let session = Arc::new(Session {
            job_id,
            url,
            session_id: Uuid::new_v4(),
            backoff: self.options.backoff,
            state: Mutex::new(ConnectionState::new(self.options.max_retries)),
            view: Arc::clone(&self.view),
            cancel: CancellationToken::new(),
        });

        self.view.send_replace(ChannelView::default());

        tracing::info!(
            job_id = %session.job_id,
            session_id = %session.session_id,
            max_retries = self.options.max_retries,
            "Opening job status channel",
        );

        let task = tokio::spawn(drive(Arc::clone(&session), Arc::clone(&self.connector)));
        self.active = Some(ActiveSession {
            session,
            task: Some(task),
        });
    }

    /// Stop the current session: no further reconnects, state changes or
    /// socket activity. Idempotent.
    pub fn teardown(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let Some(task) = active.task.take() else {
            return;
        };

        active.session.release();
        task.abort();
        tracing::debug!(job_id = %active.session.job_id, "Job status channel torn down");
    }

    pub fn job_id(&self) -> Option<&JobId> {
        self.active.as_ref().map(|active| &active.session.job_id)
    }

    /// Reconnect attempts since the last successful open.
    pub fn retry_attempts(&self) -> u32 {
        self.active
            .as_ref()
            .map_or(0, |active| active.session.lock().attempts())
    }

    pub fn view(&self) -> ChannelView {
        self.view.borrow().clone()
    }

    /// Read the current view without cloning it.
    pub fn with_view<R>(&self, f: impl FnOnce(&ChannelView) -> R) -> R {
        f(&self.view.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<ChannelView> {
        self.view.subscribe()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff() -> BackoffPolicy {
        BackoffPolicy::default()
    }

    #[test]
    fn close_schedules_backoff_and_counts_attempts() {
        let mut state = ConnectionState::new(10);

        assert_eq!(
            state.on_close(&backoff()),
            CloseDecision::Reconnect {
                delay: Duration::from_secs(1),
                attempt: 1
            }
        );
        assert_eq!(
            state.on_close(&backoff()),
            CloseDecision::Reconnect {
                delay: Duration::from_secs(2),
                attempt: 2
            }
        );
        assert_eq!(state.attempts(), 2);
    }

    #[test]
    fn open_resets_budget() {
        let mut state = ConnectionState::new(10);
        state.on_close(&backoff());
        state.on_close(&backoff());

        state.on_open();

        assert_eq!(state.attempts(), 0);
        assert_eq!(
            state.on_close(&backoff()),
            CloseDecision::Reconnect {
                delay: Duration::from_secs(1),
                attempt: 1
            }
        );
    }

    #[test]
    fn exhausted_budget_stops() {
        let mut state = ConnectionState::new(3);
        for _ in 0..3 {
            assert!(matches!(
                state.on_close(&backoff()),
                CloseDecision::Reconnect { .. }
            ));
        }
        assert_eq!(
            state.on_close(&backoff()),
            CloseDecision::Stop(StopReason::RetriesExhausted)
        );
        // Exhaustion alone does not make the job terminal.
        assert!(!state.is_terminal());
    }

    #[test]
    fn zero_budget_never_reconnects() {
        let mut state = ConnectionState::new(0);
        assert_eq!(
            state.on_close(&backoff()),
            CloseDecision::Stop(StopReason::RetriesExhausted)
        );
    }

    #[test]
    fn terminal_status_is_monotonic_and_stops_reconnects() {
        let mut state = ConnectionState::new(10);

        assert!(!state.observe_status(Some(&JobStatus::Running)));
        assert!(state.observe_status(Some(&JobStatus::Completed)));
        // A later non-terminal status does not clear the flag.
        assert!(!state.observe_status(Some(&JobStatus::Running)));
        assert!(!state.observe_status(None));
        assert!(state.is_terminal());

        assert_eq!(
            state.on_close(&backoff()),
            CloseDecision::Stop(StopReason::TerminalStatus)
        );
    }

    #[test]
    fn release_is_idempotent_and_wins_over_everything() {
        let mut state = ConnectionState::new(10);

        assert!(state.release());
        assert!(!state.release());
        assert!(state.is_released());
        assert!(state.is_terminal());
        assert_eq!(
            state.on_close(&backoff()),
            CloseDecision::Stop(StopReason::Released)
        );
        assert_eq!(state.attempts(), 0);
    }

    #[test]
    fn default_options() {
        let options = ChannelOptions::default();
        assert_eq!(options.max_retries, 10);
        assert_eq!(options.backoff, BackoffPolicy::default());
    }
}
