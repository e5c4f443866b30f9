//! `satdash-watch` -- follow one satellite-frame job from the terminal.
//!
//! Acquires a live status channel for `JOB_ID`, logs every progress
//! change and job log line, and exits once the job reaches a terminal
//! status, the reconnect budget runs out, or Ctrl-C is pressed.
//!
//! Exit codes: `0` job completed, `2` job failed or was cancelled,
//! `3` gave up reconnecting, `130` interrupted, `1` bad configuration.
//!
//! See [`config::WatchConfig::from_env`] for the environment variables.

mod config;

use satdash_jobstream::{
    ChannelView, ConnectionPhase, JobStatus, LiveStatusChannel, LogEntry, ProgressSnapshot,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::WatchConfig;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "satdash_watch=info,satdash_jobstream=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WatchConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    tracing::info!(
        job_id = %config.job_id,
        url = %config.origin.job_socket_url(&config.job_id),
        max_retries = config.options.max_retries,
        "Starting satdash-watch",
    );

    let channel = LiveStatusChannel::acquire(config.job_id, config.origin, config.options);
    let code = follow(&channel).await;
    channel.release();

    std::process::exit(code);
}

/// Report state changes until the channel stops or the user interrupts.
async fn follow(channel: &LiveStatusChannel) -> i32 {
    let mut rx = channel.subscribe();
    let mut reporter = Reporter::default();

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    loop {
        // Copy out only what changed; the log grows for the whole job.
        let (update, finished) = {
            let view = rx.borrow_and_update();
            let finished =
                (view.phase == ConnectionPhase::ClosedTerminal).then(|| exit_code(&view));
            (reporter.diff(&view), finished)
        };
        update.emit();
        if let Some(code) = finished {
            return code;
        }

        tokio::select! {
            _ = &mut interrupt => {
                tracing::info!("Interrupted, releasing job channel");
                return 130;
            }
            changed = rx.changed() => {
                if changed.is_err() {
                    return exit_code(&rx.borrow());
                }
            }
        }
    }
}

fn exit_code(view: &ChannelView) -> i32 {
    match view.outcome {
        Some(JobStatus::Completed) => 0,
        Some(_) => 2,
        None => 3,
    }
}

/// Tracks what has already been reported.
#[derive(Default)]
struct Reporter {
    logs_seen: usize,
    connected: bool,
    reconnecting: bool,
    last_progress: Option<ProgressSnapshot>,
}

/// Changes since the previous view, ready to be logged.
#[derive(Debug, Default)]
struct Update {
    logs: Vec<LogEntry>,
    progress: Option<ProgressSnapshot>,
    connection: Option<(bool, bool, ConnectionPhase)>,
}

impl Reporter {
    fn diff(&mut self, view: &ChannelView) -> Update {
        let mut update = Update::default();

        // A shorter log means the channel was reset.
        if view.logs.len() < self.logs_seen {
            self.logs_seen = 0;
        }
        update.logs = view.logs[self.logs_seen..].to_vec();
        self.logs_seen = view.logs.len();

        if view.progress.is_some() && view.progress != self.last_progress {
            self.last_progress.clone_from(&view.progress);
            update.progress.clone_from(&view.progress);
        }

        if view.connected != self.connected || view.reconnecting != self.reconnecting {
            self.connected = view.connected;
            self.reconnecting = view.reconnecting;
            update.connection = Some((view.connected, view.reconnecting, view.phase));
        }

        update
    }
}

impl Update {
    fn emit(self) {
        for entry in self.logs {
            tracing::info!(
                level = %entry.level,
                at = %entry.timestamp,
                "job: {}",
                entry.message,
            );
        }

        if let Some(snapshot) = self.progress {
            tracing::info!(
                progress = snapshot.progress,
                status = %snapshot.status.as_ref().map(JobStatus::as_str).unwrap_or("-"),
                "{}",
                snapshot.message,
            );
        }

        match self.connection {
            Some((true, _, _)) => tracing::info!("Connected"),
            Some((false, true, _)) => tracing::warn!("Connection lost, reconnecting"),
            Some((false, false, phase)) => tracing::info!(?phase, "Disconnected"),
            None => {}
        }
    }
}
