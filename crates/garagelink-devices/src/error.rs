/*!
 * Error types for the garagelink devices crate.
 */
use thiserror::Error;

use garagelink_core::{error::Error as CoreError, types::Id};

/// Failure reported by the cloud session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CloudError {
    /// Credentials were rejected or the session expired
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// The device snapshot could not be fetched
    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    /// The service refused or failed a door command
    #[error("Command rejected: {0}")]
    CommandRejected(String),

    /// The request never reached the service
    #[error("Transport error: {0}")]
    Transport(String),
}

impl CloudError {
    /// Whether a retry within the same cycle could help
    pub fn is_transient(&self) -> bool {
        !matches!(self, CloudError::AuthFailed(_))
    }
}

/// Error type for controller lifecycle operations
///
/// Poll ticks and command handlers never return these; they log and carry
/// on. Only startup surfaces them to the caller.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// Login failed at startup
    #[error("Unable to login to the cloud service: {0}")]
    Auth(CloudError),

    /// The device list could not be retrieved
    #[error("Discovery failed: {0}")]
    Discovery(CloudError),

    /// Any other cloud failure
    #[error("Cloud error: {0}")]
    Cloud(#[from] CloudError),

    /// No door with this id is registered
    #[error("Device with ID {0} not found")]
    NotFound(Id),

    /// Core error, such as invalid configuration
    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

/// Result type for controller lifecycle operations
pub type Result<T> = std::result::Result<T, DeviceError>;
