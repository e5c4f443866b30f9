use satdash_core::error::CoreError;

/// Errors returned while setting up a job status channel.
///
/// Once a channel is acquired nothing is reported through this type;
/// transport failures and malformed frames degrade to observable state.
#[derive(Debug, thiserror::Error)]
pub enum JobStreamError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Invalid page origin '{origin}': {reason}")]
    InvalidOrigin { origin: String, reason: String },
}
