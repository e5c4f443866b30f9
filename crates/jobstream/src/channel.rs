//! Consumer-facing handle for a job's live status.

use std::sync::Arc;

use tokio::sync::watch;

use satdash_core::types::JobId;

use crate::manager::{ChannelOptions, ChannelView, ConnectionManager, ConnectionPhase};
use crate::messages::{JobStatus, LogEntry, ProgressSnapshot};
use crate::origin::PageOrigin;
use crate::transport::{Connector, WebSocketConnector};

/// Live status of one backend job.
///
/// Acquiring the channel opens the job socket; dropping it (or calling
/// [`release`](Self::release)) tears the socket down and cancels any
/// pending reconnect. All accessors return copies of the latest state;
/// use [`subscribe`](Self::subscribe) to be notified of changes.
///
/// Must be acquired from within a tokio runtime.
pub struct LiveStatusChannel {
    manager: ConnectionManager,
}

impl LiveStatusChannel {
    /// Acquire a channel over a real WebSocket.
    pub fn acquire(job_id: JobId, origin: PageOrigin, options: ChannelOptions) -> Self {
        Self::acquire_with(Arc::new(WebSocketConnector), job_id, origin, options)
    }

    /// Acquire a channel over a caller-supplied transport.
    pub fn acquire_with(
        connector: Arc<dyn Connector>,
        job_id: JobId,
        origin: PageOrigin,
        options: ChannelOptions,
    ) -> Self {
        let mut manager = ConnectionManager::new(connector, origin, options);
        manager.open(job_id);
        Self { manager }
    }

    /// Point the channel at another job.
    ///
    /// A different id releases the current instance and starts a fresh
    /// one with empty state. The same id is a no-op.
    pub fn reacquire(&mut self, job_id: JobId) {
        if self.manager.job_id() == Some(&job_id) {
            return;
        }
        self.manager.open(job_id);
    }

    /// Tear the channel down. Equivalent to dropping it.
    pub fn release(mut self) {
        self.manager.teardown();
    }

    pub fn job_id(&self) -> Option<&JobId> {
        self.manager.job_id()
    }

    pub fn progress(&self) -> Option<ProgressSnapshot> {
        self.manager.with_view(|view| view.progress.clone())
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.manager.with_view(|view| view.logs.clone())
    }

    pub fn connected(&self) -> bool {
        self.manager.with_view(|view| view.connected)
    }

    pub fn reconnecting(&self) -> bool {
        self.manager.with_view(|view| view.reconnecting)
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.manager.with_view(|view| view.phase)
    }

    /// Terminal status of the job, once one has been reported.
    pub fn outcome(&self) -> Option<JobStatus> {
        self.manager.with_view(|view| view.outcome.clone())
    }

    /// Reconnect attempts since the last successful open.
    pub fn retry_attempts(&self) -> u32 {
        self.manager.retry_attempts()
    }

    /// Snapshot of the whole observable state.
    pub fn view(&self) -> ChannelView {
        self.manager.view()
    }

    /// Receive every subsequent state change.
    ///
    /// The receiver keeps working across [`reacquire`](Self::reacquire);
    /// it observes the reset to an empty view followed by the new job.
    pub fn subscribe(&self) -> watch::Receiver<ChannelView> {
        self.manager.subscribe()
    }
}
