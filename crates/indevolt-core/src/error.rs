//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Error types for coordinator lifecycle and connection registry."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use indevolt_net::FetchError;
use thiserror::Error;

/// Lifecycle errors raised by [`crate::PollingCoordinator::start`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    /// The first refresh failed; the connection is not ready.
    #[error("device not ready: {0}")]
    NotReady(#[source] FetchError),
    /// A zero poll interval cannot drive the periodic timer.
    #[error("poll interval must be greater than zero")]
    InvalidInterval,
    #[error("coordinator already started")]
    AlreadyStarted,
    #[error("coordinator start already in progress")]
    StartInProgress,
    #[error("coordinator has been shut down")]
    Stopped,
}

impl CoordinatorError {
    /// Underlying fetch failure, when there is one.
    pub fn fetch_error(&self) -> Option<&FetchError> {
        match self {
            CoordinatorError::NotReady(err) => Some(err),
            _ => None,
        }
    }
}

/// Errors raised while loading or unloading device connections.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("connection {0} is already loaded")]
    AlreadyLoaded(String),
    #[error("connection {id} has invalid configuration: {reason}")]
    InvalidConfig { id: String, reason: String },
    #[error("connection {id} could not be set up: {source}")]
    NotReady {
        id: String,
        #[source]
        source: CoordinatorError,
    },
    #[error("connection {id} could not build a device client: {source}")]
    Client {
        id: String,
        #[source]
        source: FetchError,
    },
}

impl RegistryError {
    /// Fetch failure that caused the setup to fail, if any.
    pub fn fetch_error(&self) -> Option<&FetchError> {
        match self {
            RegistryError::NotReady { source, .. } => source.fetch_error(),
            RegistryError::Client { source, .. } => Some(source),
            _ => None,
        }
    }
}
