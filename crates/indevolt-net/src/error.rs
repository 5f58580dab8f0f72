//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Fetch error taxonomy shared by transports."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Coarse classification used for logging, metrics and setup diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The device did not answer within the request timeout.
    Timeout,
    /// The request never completed at the transport level.
    NetworkError,
    /// The device answered, but not with something usable.
    ProtocolError,
}

impl ErrorKind {
    /// Stable snake_case label.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::ProtocolError => "protocol_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single fetch against a device.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// No complete response before the configured timeout elapsed.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// Connection refused, reset, DNS failure and similar transport faults.
    #[error("network error: {0}")]
    Network(String),
    /// The device answered with a non-success HTTP status.
    #[error("unexpected status code {0}")]
    Status(u16),
    /// The body was not a JSON object.
    #[error("malformed response body: {0}")]
    MalformedBody(String),
    /// Host, port or method do not form a valid URL.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    /// The client already released its resources.
    #[error("client closed")]
    Closed,
}

impl FetchError {
    /// Classify the failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Timeout(_) => ErrorKind::Timeout,
            FetchError::Network(_) | FetchError::InvalidEndpoint(_) | FetchError::Closed => {
                ErrorKind::NetworkError
            }
            FetchError::Status(_) | FetchError::MalformedBody(_) => ErrorKind::ProtocolError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(
            FetchError::Timeout(Duration::from_secs(60)).kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            FetchError::Network("refused".into()).kind(),
            ErrorKind::NetworkError
        );
        assert_eq!(FetchError::Closed.kind(), ErrorKind::NetworkError);
        assert_eq!(FetchError::Status(500).kind(), ErrorKind::ProtocolError);
        assert_eq!(
            FetchError::MalformedBody("eof".into()).kind(),
            ErrorKind::ProtocolError
        );
    }

    #[test]
    fn status_message_carries_code() {
        assert_eq!(
            FetchError::Status(503).to_string(),
            "unexpected status code 503"
        );
        assert_eq!(ErrorKind::ProtocolError.to_string(), "protocol_error");
    }
}
