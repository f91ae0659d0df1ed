/*!
 * Door state model.
 *
 * Vendor status strings are normalized into a closed set of door states,
 * each of which has a fixed numeric driver value understood by the hub.
 */
use std::fmt;

use serde::{Deserialize, Serialize};

/// Normalized position or motion of a garage door
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DoorState {
    /// Fully open
    Open,
    /// Fully closed
    Closed,
    /// Stopped part way
    Stopped,
    /// Moving towards open
    Opening,
    /// Moving towards closed
    Closing,
    /// No usable status
    Unknown,
}

impl DoorState {
    /// Every state, in driver value order
    pub const ALL: [DoorState; 6] = [
        DoorState::Closed,
        DoorState::Open,
        DoorState::Stopped,
        DoorState::Closing,
        DoorState::Opening,
        DoorState::Unknown,
    ];

    /// Map a raw vendor status string. Only exact lowercase matches count.
    pub fn from_vendor(raw: &str) -> Self {
        match raw {
            "open" => DoorState::Open,
            "closed" => DoorState::Closed,
            "stopped" => DoorState::Stopped,
            "opening" => DoorState::Opening,
            "closing" => DoorState::Closing,
            _ => DoorState::Unknown,
        }
    }

    /// Normalize the outcome of reading a device's status
    pub fn normalize(read: &StateRead) -> Self {
        match read {
            StateRead::Reported(raw) => Self::from_vendor(raw),
            StateRead::Unreadable(_) | StateRead::Missing => DoorState::Unknown,
        }
    }

    /// The hub driver value for this state
    pub fn driver_value(&self) -> u8 {
        match self {
            DoorState::Closed => 0,
            DoorState::Open => 1,
            DoorState::Stopped => 2,
            DoorState::Closing => 3,
            DoorState::Opening => 4,
            DoorState::Unknown => 5,
        }
    }

    /// Inverse of [`DoorState::driver_value`]
    pub fn from_driver_value(value: u8) -> Option<Self> {
        Self::ALL.get(usize::from(value)).copied()
    }

    /// Lowercase name, identical to the vendor string for known states
    pub fn as_str(&self) -> &'static str {
        match self {
            DoorState::Open => "open",
            DoorState::Closed => "closed",
            DoorState::Stopped => "stopped",
            DoorState::Opening => "opening",
            DoorState::Closing => "closing",
            DoorState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DoorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What came back when a device's status was read from a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateRead {
    /// The record carried a status string
    Reported(String),
    /// The record exists but its status could not be read
    Unreadable(String),
    /// The device has no record in the snapshot
    Missing,
}

/// Requested direction of travel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Open the door
    Open,
    /// Close the door
    Close,
}

impl Direction {
    /// Resting state reached when the movement completes
    pub fn terminal_state(&self) -> DoorState {
        match self {
            Direction::Open => DoorState::Open,
            Direction::Close => DoorState::Closed,
        }
    }

    /// State reported while the movement is under way
    pub fn in_progress_state(&self) -> DoorState {
        match self {
            Direction::Open => DoorState::Opening,
            Direction::Close => DoorState::Closing,
        }
    }

    /// Whether a door in `state` already is, or is becoming, what this direction asks for
    pub fn is_satisfied_by(&self, state: DoorState) -> bool {
        state == self.terminal_state() || state == self.in_progress_state()
    }

    /// Lowercase verb
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Open => "open",
            Direction::Close => "close",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A discrete announcement sent to the hub when a door settles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Notification {
    /// The door became open
    Opened,
    /// The door became closed
    Closed,
}

impl Notification {
    /// The notification warranted by moving from `previous` to `next`
    ///
    /// `previous` is `None` before the first observation, which counts as
    /// neither open nor closed.
    pub fn for_transition(previous: Option<DoorState>, next: DoorState) -> Option<Self> {
        match next {
            DoorState::Open if previous != Some(DoorState::Open) => Some(Notification::Opened),
            DoorState::Closed if previous != Some(DoorState::Closed) => Some(Notification::Closed),
            _ => None,
        }
    }
}
