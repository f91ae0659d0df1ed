/*!
 * Garage door device.
 *
 * A door keeps its last normalized state and the last driver value it
 * wrote to the hub. It reads its own record out of the controller's
 * snapshot and never talks to the cloud except to send a command it was
 * handed a session for.
 */
use std::collections::BTreeMap;
use std::fmt;

use futures::future::BoxFuture;
use tracing::{error, info, warn};

use garagelink_core::types::Id;
use garagelink_core::utils::{with_retry_if, RetryPolicy};

use crate::cloud::{CloudSession, Snapshot};
use crate::controller::Controller;
use crate::node::{CommandName, NodeDescriptor, NodeHost, DOOR_NODE_DEF, STATUS_DRIVER};
use crate::error::CloudError;
use crate::state::{Direction, DoorState, Notification, StateRead};

/// Result of a command handled by a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The vendor accepted the command
    Issued {
        /// Vendor invocations made
        attempts: usize,
    },
    /// The door already is, or is becoming, the requested state
    AlreadyInState(DoorState),
    /// Every attempt failed
    Failed {
        /// Vendor invocations made
        attempts: usize,
        /// Error of the last attempt
        reason: String,
    },
    /// A query or discovery finished
    Completed,
    /// The address or command is not known
    Rejected(String),
}

impl CommandOutcome {
    /// Whether the command did what was asked, including redundant requests
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            CommandOutcome::Issued { .. } | CommandOutcome::AlreadyInState(_) | CommandOutcome::Completed
        )
    }
}

/// Handler for a command addressed to a door
pub type DoorHandler = for<'a> fn(&'a Controller, &'a Id) -> BoxFuture<'a, CommandOutcome>;

/// Command name to handler mapping held by each door
pub type CommandTable = BTreeMap<CommandName, DoorHandler>;

fn handle_query<'a>(controller: &'a Controller, id: &'a Id) -> BoxFuture<'a, CommandOutcome> {
    Box::pin(controller.query_door(id))
}

fn handle_open<'a>(controller: &'a Controller, id: &'a Id) -> BoxFuture<'a, CommandOutcome> {
    Box::pin(controller.request_transition(id, Direction::Open))
}

fn handle_close<'a>(controller: &'a Controller, id: &'a Id) -> BoxFuture<'a, CommandOutcome> {
    Box::pin(controller.request_transition(id, Direction::Close))
}

fn handle_discover<'a>(controller: &'a Controller, _id: &'a Id) -> BoxFuture<'a, CommandOutcome> {
    Box::pin(controller.discover_command())
}

/// The four commands every door accepts
pub fn door_command_table() -> CommandTable {
    let mut table: CommandTable = BTreeMap::new();
    table.insert(CommandName::Query, handle_query);
    table.insert(CommandName::Don, handle_open);
    table.insert(CommandName::Dof, handle_close);
    table.insert(CommandName::Discover, handle_discover);
    table
}

/// One garage door
pub struct GarageDoor {
    id: Id,
    name: String,
    primary: String,
    state: Option<DoorState>,
    driver: Option<u8>,
    retry_in_flight: bool,
    commands: CommandTable,
}

impl fmt::Debug for GarageDoor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GarageDoor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("driver", &self.driver)
            .field("retry_in_flight", &self.retry_in_flight)
            .field("commands", &self.commands.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl GarageDoor {
    /// Create a door that hangs under the node at `primary`
    pub fn new(id: Id, name: impl Into<String>, primary: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            primary: primary.into(),
            state: None,
            driver: None,
            retry_in_flight: false,
            commands: door_command_table(),
        }
    }

    /// Cloud id
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Node address in the hub
    pub fn address(&self) -> &str {
        self.id.as_str()
    }

    /// Latest known display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last normalized state, `None` before the first observation
    pub fn state(&self) -> Option<DoorState> {
        self.state
    }

    /// Last driver value written to the hub
    pub fn driver(&self) -> Option<u8> {
        self.driver
    }

    /// Whether a retry is under way
    pub fn retry_in_flight(&self) -> bool {
        self.retry_in_flight
    }

    /// The handler registered for `command`
    pub fn handler(&self, command: CommandName) -> Option<DoorHandler> {
        self.commands.get(&command).copied()
    }

    /// Names of the accepted commands
    pub fn commands(&self) -> Vec<CommandName> {
        self.commands.keys().copied().collect()
    }

    /// Node creation request for the hub
    pub fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            address: self.address().to_string(),
            primary: self.primary.clone(),
            name: self.name.clone(),
            node_def: DOOR_NODE_DEF.to_string(),
            commands: self.commands(),
        }
    }

    fn write_driver(&mut self, host: &dyn NodeHost, value: u8) {
        host.set_driver(self.address(), STATUS_DRIVER, value);
        self.driver = Some(value);
    }

    /// Report the current driver value to the hub unconditionally
    pub fn report(&self, host: &dyn NodeHost) {
        let value = self.driver.unwrap_or(DoorState::Unknown.driver_value());
        host.report_driver(self.address(), STATUS_DRIVER, value);
    }

    /// Recompute state from the snapshot and announce it
    ///
    /// The driver is written on every call. A notification fires only when
    /// the door enters open or closed.
    pub fn observe(&mut self, snapshot: &Snapshot, host: &dyn NodeHost) -> Option<Notification> {
        if let Some(record) = snapshot.record(&self.id) {
            if !record.name.is_empty() && record.name != self.name {
                info!("{} is now called {}", self.name, record.name);
                self.name = record.name.clone();
            }
        }

        let read = snapshot.read_state(&self.id);
        match &read {
            StateRead::Unreadable(reason) => {
                warn!("Unable to update the {} status: {}", self.name, reason);
            }
            StateRead::Missing => {
                warn!("{} is missing from the latest device data", self.name);
            }
            StateRead::Reported(_) => {}
        }

        let next = DoorState::normalize(&read);
        self.write_driver(host, next.driver_value());

        let notification = Notification::for_transition(self.state, next);
        if let Some(notification) = notification {
            let command = match notification {
                Notification::Opened => CommandName::Don,
                Notification::Closed => CommandName::Dof,
            };
            info!("{} is {}", self.name, next);
            host.report_command(self.address(), command);
        }

        self.state = Some(next);
        notification
    }

    /// Send an open or close command unless the door is already there
    ///
    /// Expects [`GarageDoor::observe`] to have run against fresh data. On
    /// success the in-progress driver value is written right away; the
    /// normalized state waits for the next observation.
    pub async fn execute_transition(
        &mut self,
        direction: Direction,
        cloud: &dyn CloudSession,
        host: &dyn NodeHost,
        policy: RetryPolicy,
    ) -> CommandOutcome {
        let current = self.state.unwrap_or(DoorState::Unknown);
        if direction.is_satisfied_by(current) {
            warn!("{} is already {}", self.name, current);
            self.retry_in_flight = false;
            return CommandOutcome::AlreadyInState(current);
        }

        info!("Requesting {} for {}", direction, self.name);
        let what = format!("{} {}", direction, self.name);
        let id = &self.id;
        let guard = &mut self.retry_in_flight;
        let attempted = with_retry_if(policy, &what, CloudError::is_transient, move |attempt| {
            if attempt > 1 {
                *guard = true;
            }
            cloud.send_command(id, direction)
        })
        .await;
        self.retry_in_flight = false;

        match attempted.result {
            Ok(()) => {
                self.write_driver(host, direction.in_progress_state().driver_value());
                CommandOutcome::Issued {
                    attempts: attempted.attempts,
                }
            }
            Err(e) => {
                error!("Unable to {} the door {}: {}", direction, self.name, e);
                CommandOutcome::Failed {
                    attempts: attempted.attempts,
                    reason: e.to_string(),
                }
            }
        }
    }
}
