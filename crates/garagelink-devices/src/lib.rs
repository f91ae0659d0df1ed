/*!
 * garagelink Devices
 *
 * This crate bridges garage doors on a vendor cloud account into a
 * home-automation hub: door state normalization, the controller that owns
 * discovery and polling, and the command handlers the hub invokes.
 */

#![warn(missing_docs)]

// Re-export core types
pub use garagelink_core::prelude;

pub mod cloud;
pub mod controller;
pub mod door;
pub mod error;
pub mod node;
pub mod scheduler;
pub mod simulated;
pub mod state;

pub use cloud::{CloudSession, DeviceDescriptor, RawDeviceRecord, SharedCloudSession, Snapshot};
pub use controller::{Controller, DoorEvent};
pub use door::{CommandOutcome, GarageDoor};
pub use error::{CloudError, DeviceError};
pub use node::{CommandName, NodeDescriptor, NodeHost, RecordingHost, SharedNodeHost};
pub use scheduler::{PollHandle, PollScheduler};
pub use simulated::SimulatedCloud;
pub use state::{Direction, DoorState, Notification, StateRead};

/// garagelink devices crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the device system
pub fn init() -> Result<(), garagelink_core::error::Error> {
    tracing::info!("garagelink devices {} initialized", VERSION);
    Ok(())
}
