//! Live job-status channel.
//!
//! Opens a WebSocket to a backend job, classifies the frames it sends
//! (progress snapshots, log lines, control frames), and keeps the
//! connection alive with bounded exponential backoff until the job
//! reports a terminal status or the consumer releases the channel.
//!
//! The consumer-facing entry point is [`LiveStatusChannel`].

pub mod backoff;
pub mod channel;
pub mod error;
pub mod manager;
pub mod messages;
pub mod origin;
pub mod terminal;
pub mod transport;

pub use backoff::BackoffPolicy;
pub use channel::LiveStatusChannel;
pub use error::JobStreamError;
pub use manager::{ChannelOptions, ChannelView, ConnectionManager, ConnectionPhase};
pub use messages::{ClassifiedMessage, JobStatus, LogEntry, ProgressSnapshot};
pub use origin::PageOrigin;
pub use satdash_core::types::JobId;
pub use transport::{Connector, FrameStream, TransportError, WebSocketConnector};
