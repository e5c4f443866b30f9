//! Hosting page origin and job socket URL construction.

use tokio_tungstenite::tungstenite::http::Uri;

use satdash_core::job_events::JOB_SOCKET_PATH_PREFIX;
use satdash_core::types::JobId;

use crate::error::JobStreamError;

/// Protocol and host of the page hosting the dashboard.
///
/// The job socket lives on the same host; its scheme follows the page
/// (`https:` pages use `wss:`, everything else `ws:`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageOrigin {
    secure: bool,
    /// Host including an optional `:port`.
    host: String,
}

impl PageOrigin {
    /// Build from a browser-style protocol (`"https:"` or `"https"`) and host.
    pub fn new(protocol: &str, host: impl Into<String>) -> Self {
        Self {
            secure: protocol.trim_end_matches(':').eq_ignore_ascii_case("https"),
            host: host.into(),
        }
    }

    /// Parse an origin such as `https://dash.example.com:8443`.
    ///
    /// Only `http` and `https` origins are accepted; any path is ignored.
    pub fn parse(origin: &str) -> Result<Self, JobStreamError> {
        let invalid = |reason: &str| JobStreamError::InvalidOrigin {
            origin: origin.to_string(),
            reason: reason.to_string(),
        };

        let uri: Uri = origin.parse().map_err(|e| invalid(&format!("{e}")))?;
        let scheme = uri.scheme_str().ok_or_else(|| invalid("missing scheme"))?;
        if !matches!(scheme, "http" | "https") {
            return Err(invalid("scheme must be http or https"));
        }
        let authority = uri.authority().ok_or_else(|| invalid("missing host"))?;
        if authority.host().is_empty() {
            return Err(invalid("missing host"));
        }

        let host = match authority.port_u16() {
            Some(port) => format!("{}:{port}", authority.host()),
            None => authority.host().to_string(),
        };
        Ok(Self::new(scheme, host))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn socket_scheme(&self) -> &'static str {
        if self.secure {
            "wss"
        } else {
            "ws"
        }
    }

    /// `{ws|wss}://{host}/ws/jobs/{job_id}`
    pub fn job_socket_url(&self, job_id: &JobId) -> String {
        format!(
            "{}://{}{}{}",
            self.socket_scheme(),
            self.host,
            JOB_SOCKET_PATH_PREFIX,
            job_id
        )
    }
}
