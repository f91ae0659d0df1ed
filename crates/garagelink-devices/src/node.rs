/*!
 * Host plugin framework contract.
 *
 * The hub sees every door, and the controller itself, as an addressable
 * node with a single numeric status driver and a small set of named
 * commands. This module defines what the controller needs from the hub,
 * plus an in-memory host that records everything it is told.
 */
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::trace;

/// Name of the status driver every node reports
pub const STATUS_DRIVER: &str = "ST";

/// Node definition id of the controller node
pub const CONTROLLER_NODE_DEF: &str = "GARAGECTRL";

/// Node definition id of a door node
pub const DOOR_NODE_DEF: &str = "GARAGEDOOR";

/// Commands a node can receive from, or report to, the hub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CommandName {
    /// Re-read and re-report state
    Query,
    /// Open; also reported when a door becomes open
    Don,
    /// Close; also reported when a door becomes closed
    Dof,
    /// Look for new devices on the account
    Discover,
}

impl CommandName {
    /// Wire name used by the hub
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandName::Query => "QUERY",
            CommandName::Don => "DON",
            CommandName::Dof => "DOF",
            CommandName::Discover => "DISCOVER",
        }
    }

    /// Parse a wire name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "QUERY" => Some(CommandName::Query),
            "DON" => Some(CommandName::Don),
            "DOF" => Some(CommandName::Dof),
            "DISCOVER" => Some(CommandName::Discover),
            _ => None,
        }
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the hub needs to create a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Node address, unique within the hub
    pub address: String,
    /// Address of the node this one hangs under
    pub primary: String,
    /// Display name
    pub name: String,
    /// Node definition id
    pub node_def: String,
    /// Commands the node accepts
    pub commands: Vec<CommandName>,
}

/// The hub side of the plugin interface
pub trait NodeHost: Send + Sync + Debug {
    /// Create a node
    fn add_node(&self, node: &NodeDescriptor);

    /// Set a driver value; the hub reports it if it changed
    fn set_driver(&self, address: &str, driver: &str, value: u8);

    /// Report a driver value unconditionally
    fn report_driver(&self, address: &str, driver: &str, value: u8);

    /// Fire a discrete command event from a node
    fn report_command(&self, address: &str, command: CommandName);
}

/// A node host shared between the controller and its owner
pub type SharedNodeHost = Arc<dyn NodeHost>;

#[derive(Debug, Default)]
struct Recorded {
    nodes: Vec<NodeDescriptor>,
    drivers: HashMap<String, Vec<u8>>,
    reports: HashMap<String, Vec<u8>>,
    commands: HashMap<String, Vec<CommandName>>,
}

/// A host that keeps every call in memory
#[derive(Debug, Default)]
pub struct RecordingHost {
    recorded: Mutex<Recorded>,
}

impl RecordingHost {
    /// Create an empty recording host
    pub fn new() -> Self {
        Self::default()
    }

    fn recorded(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Nodes added so far, in order
    pub fn nodes(&self) -> Vec<NodeDescriptor> {
        self.recorded().nodes.clone()
    }

    /// The node with this address
    pub fn node(&self, address: &str) -> Option<NodeDescriptor> {
        self.recorded().nodes.iter().find(|n| n.address == address).cloned()
    }

    /// Last value set on a node's status driver
    pub fn driver(&self, address: &str) -> Option<u8> {
        self.recorded()
            .drivers
            .get(address)
            .and_then(|values| values.last().copied())
    }

    /// Every value set on a node's status driver, in order
    pub fn driver_history(&self, address: &str) -> Vec<u8> {
        self.recorded().drivers.get(address).cloned().unwrap_or_default()
    }

    /// Every unconditional driver report of a node
    pub fn reported_drivers(&self, address: &str) -> Vec<u8> {
        self.recorded().reports.get(address).cloned().unwrap_or_default()
    }

    /// Every command event a node fired
    pub fn reported_commands(&self, address: &str) -> Vec<CommandName> {
        self.recorded().commands.get(address).cloned().unwrap_or_default()
    }
}

impl NodeHost for RecordingHost {
    fn add_node(&self, node: &NodeDescriptor) {
        trace!("add node {} ({})", node.address, node.node_def);
        self.recorded().nodes.push(node.clone());
    }

    fn set_driver(&self, address: &str, driver: &str, value: u8) {
        trace!("{} {}={}", address, driver, value);
        self.recorded()
            .drivers
            .entry(address.to_string())
            .or_default()
            .push(value);
    }

    fn report_driver(&self, address: &str, driver: &str, value: u8) {
        trace!("{} report {}={}", address, driver, value);
        self.recorded()
            .reports
            .entry(address.to_string())
            .or_default()
            .push(value);
    }

    fn report_command(&self, address: &str, command: CommandName) {
        trace!("{} fired {}", address, command);
        self.recorded()
            .commands
            .entry(address.to_string())
            .or_default()
            .push(command);
    }
}
