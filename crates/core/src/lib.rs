//! Shared domain vocabulary for the satdash services.
//!
//! Holds identifiers, wire constants and status names that more than one
//! crate needs to agree on.

pub mod error;
pub mod job_events;
pub mod job_status;
pub mod types;
