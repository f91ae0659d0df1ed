/*!
 * Garage door controller.
 *
 * The controller owns the cloud session, the latest snapshot and every
 * door. All of that lives behind one async mutex, so a poll tick and a
 * command never interleave. Nothing below a tick or a command handler
 * returns an error to the hub: failures are logged and left visible
 * through stale or unknown driver values.
 */
use std::collections::BTreeMap;
use std::fmt;

use futures::future::BoxFuture;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn, Instrument};

use garagelink_core::config::Config;
use garagelink_core::logging::{component_span, operation_span, Span};
use garagelink_core::types::Id;
use garagelink_core::utils::{with_retry_if, Attempted, RetryPolicy};

use crate::cloud::{CloudSession, DeviceDescriptor, SharedCloudSession, Snapshot};
use crate::door::{CommandOutcome, GarageDoor};
use crate::error::{CloudError, DeviceError, Result};
use crate::node::{
    CommandName, NodeDescriptor, NodeHost, SharedNodeHost, CONTROLLER_NODE_DEF, STATUS_DRIVER,
};
use crate::state::{Direction, DoorState, Notification};

const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Something that happened to a door, for in-process subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DoorEvent {
    /// A door was discovered and registered
    Added {
        /// Door id
        id: Id,
        /// Name at discovery
        name: String,
    },
    /// A door became open
    Opened {
        /// Door id
        id: Id,
    },
    /// A door became closed
    Closed {
        /// Door id
        id: Id,
    },
    /// A command failed on every attempt
    CommandFailed {
        /// Door id
        id: Id,
        /// What was asked
        direction: Direction,
        /// Vendor invocations made
        attempts: usize,
    },
}

/// Handler for a command addressed to the controller node
pub type ControllerHandler = for<'a> fn(&'a Controller) -> BoxFuture<'a, CommandOutcome>;

fn handle_query_all(controller: &Controller) -> BoxFuture<'_, CommandOutcome> {
    Box::pin(controller.query_all())
}

fn handle_discover(controller: &Controller) -> BoxFuture<'_, CommandOutcome> {
    Box::pin(controller.discover_command())
}

fn controller_command_table() -> BTreeMap<CommandName, ControllerHandler> {
    let mut table: BTreeMap<CommandName, ControllerHandler> = BTreeMap::new();
    table.insert(CommandName::Query, handle_query_all);
    table.insert(CommandName::Discover, handle_discover);
    table
}

#[derive(Debug, Default)]
struct ControllerState {
    snapshot: Snapshot,
    doors: BTreeMap<Id, GarageDoor>,
    // last ST value written for the controller node
    status: Option<u8>,
}

/// Discovers doors, keeps their state current and runs their commands
pub struct Controller {
    address: String,
    name: String,
    cloud: SharedCloudSession,
    host: SharedNodeHost,
    policy: RetryPolicy,
    state: Mutex<ControllerState>,
    events: broadcast::Sender<DoorEvent>,
    commands: BTreeMap<CommandName, ControllerHandler>,
    span: Span,
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("address", &self.address)
            .field("name", &self.name)
            .field("cloud", &self.cloud)
            .field("policy", &self.policy)
            .finish()
    }
}

impl Controller {
    /// Create a controller at the default address
    pub fn new(cloud: SharedCloudSession, host: SharedNodeHost) -> Self {
        Self::with_address("garagectrl", "Garage Controller", cloud, host)
    }

    /// Create a controller at a specific node address
    pub fn with_address(
        address: impl Into<String>,
        name: impl Into<String>,
        cloud: SharedCloudSession,
        host: SharedNodeHost,
    ) -> Self {
        let address = address.into();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            span: component_span("controller", Some(&address)),
            address,
            name: name.into(),
            cloud,
            host,
            policy: RetryPolicy::default(),
            state: Mutex::new(ControllerState::default()),
            events,
            commands: controller_command_table(),
        }
    }

    /// Create a controller from a validated configuration
    pub fn from_config(
        config: &Config,
        cloud: SharedCloudSession,
        host: SharedNodeHost,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_address(
            config.controller.address.clone(),
            config.controller.name.clone(),
            cloud,
            host,
        )
        .with_retry_policy(RetryPolicy::new(config.polling.max_attempts)))
    }

    /// Override the attempt limit for fetches and commands
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Node address of the controller
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Subscribe to door events
    pub fn subscribe(&self) -> broadcast::Receiver<DoorEvent> {
        self.events.subscribe()
    }

    /// Node creation request for the controller itself
    pub fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            address: self.address.clone(),
            primary: self.address.clone(),
            name: self.name.clone(),
            node_def: CONTROLLER_NODE_DEF.to_string(),
            commands: self.commands.keys().copied().collect(),
        }
    }

    fn cloud(&self) -> &dyn CloudSession {
        self.cloud.as_ref()
    }

    fn host(&self) -> &dyn NodeHost {
        self.host.as_ref()
    }

    fn publish(&self, event: DoorEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Register the controller node, log in and discover doors
    ///
    /// This is the only operation that fails outward: a rejected login or
    /// an unreachable device list stops startup. Returns the number of
    /// doors found.
    pub async fn start(&self) -> Result<usize> {
        async {
            info!("Started {}", self.name);
            self.host().add_node(&self.descriptor());

            if let Err(e) = self.cloud().login().await {
                error!("Unable to login to the cloud service: {}", e);
                return Err(DeviceError::Auth(e));
            }
            info!("Login successful");
            self.set_status(1).await;

            let added = self.discover().await?;
            self.poll().await;
            Ok(added)
        }
        .instrument(self.span.clone())
        .await
    }

    /// Mark the controller node as stopped
    pub async fn stop(&self) {
        async {
            info!("{} is stopping", self.name);
            self.set_status(0).await;
        }
        .instrument(self.span.clone())
        .await
    }

    async fn set_status(&self, value: u8) {
        let mut state = self.state.lock().await;
        self.host().set_driver(&self.address, STATUS_DRIVER, value);
        state.status = Some(value);
    }

    async fn list_devices(&self) -> Attempted<Vec<DeviceDescriptor>, CloudError> {
        let cloud = self.cloud();
        with_retry_if(
            self.policy,
            "device listing",
            CloudError::is_transient,
            move |_| cloud.list_devices(),
        )
        .await
    }

    async fn register(&self, devices: Vec<DeviceDescriptor>) -> usize {
        let mut state = self.state.lock().await;
        let mut added = 0;
        for device in devices {
            if state.doors.contains_key(&device.id) {
                debug!("{} ({}) already registered", device.name, device.id);
                continue;
            }
            let door = GarageDoor::new(device.id.clone(), device.name.clone(), self.address.clone());
            self.host().add_node(&door.descriptor());
            info!("Adding {} with ID {}", device.name, device.id);
            state.doors.insert(device.id.clone(), door);
            self.publish(DoorEvent::Added {
                id: device.id,
                name: device.name,
            });
            added += 1;
        }
        added
    }

    /// Register doors the account has that the controller does not know yet
    ///
    /// Known doors keep their history; doors gone from the account stay.
    pub async fn discover(&self) -> Result<usize> {
        let listed = self.list_devices().await;
        let devices = listed.result.map_err(DeviceError::Discovery)?;
        Ok(self.register(devices).await)
    }

    pub(crate) async fn discover_command(&self) -> CommandOutcome {
        let listed = self.list_devices().await;
        match listed.result {
            Ok(devices) => {
                let added = self.register(devices).await;
                info!("Discovery added {} doors", added);
                CommandOutcome::Completed
            }
            Err(e) => {
                error!("Discovery failed: {}", e);
                CommandOutcome::Failed {
                    attempts: listed.attempts,
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn refresh(&self, state: &mut ControllerState) -> bool {
        let cloud = self.cloud();
        let fetched = with_retry_if(
            self.policy,
            "snapshot refresh",
            CloudError::is_transient,
            move |_| cloud.fetch_all(),
        )
        .await;
        match fetched.result {
            Ok(snapshot) => {
                debug!("Fetched {} device records", snapshot.len());
                state.snapshot = snapshot;
                true
            }
            Err(e) => {
                warn!(
                    "Keeping device data from {:?} after {} failed fetches: {}",
                    state.snapshot.fetched_at(),
                    fetched.attempts,
                    e
                );
                false
            }
        }
    }

    fn announce(&self, id: &Id, notification: Option<Notification>) {
        match notification {
            Some(Notification::Opened) => self.publish(DoorEvent::Opened { id: id.clone() }),
            Some(Notification::Closed) => self.publish(DoorEvent::Closed { id: id.clone() }),
            None => {}
        }
    }

    /// Refresh the snapshot once and update every door from it
    pub async fn poll(&self) {
        async {
            let mut guard = self.state.lock().await;
            self.refresh(&mut guard).await;

            let ControllerState { snapshot, doors, .. } = &mut *guard;
            for (id, door) in doors.iter_mut() {
                let notification = door.observe(snapshot, self.host());
                self.announce(id, notification);
            }
        }
        .instrument(operation_span("poll", &self.address))
        .instrument(self.span.clone())
        .await
    }

    /// Check that the cloud session is still valid
    pub async fn long_poll(&self) {
        async {
            info!("Refreshing token");
            match self.cloud().login().await {
                Ok(()) => info!("Token ok"),
                Err(e) => error!("Token refresh failure: {}", e),
            }
        }
        .instrument(self.span.clone())
        .await
    }

    /// Re-report every node's driver without contacting the cloud
    ///
    /// The controller's own driver is skipped until start or stop set it.
    pub(crate) async fn query_all(&self) -> CommandOutcome {
        let state = self.state.lock().await;
        if let Some(status) = state.status {
            self.host().report_driver(&self.address, STATUS_DRIVER, status);
        }
        for door in state.doors.values() {
            door.report(self.host());
        }
        CommandOutcome::Completed
    }

    /// Refresh one door from fresh data and report it
    pub(crate) async fn query_door(&self, id: &Id) -> CommandOutcome {
        let mut guard = self.state.lock().await;
        if !guard.doors.contains_key(id) {
            return CommandOutcome::Rejected(format!("unknown door {}", id));
        }
        self.refresh(&mut guard).await;

        let ControllerState { snapshot, doors, .. } = &mut *guard;
        if let Some(door) = doors.get_mut(id) {
            let notification = door.observe(snapshot, self.host());
            door.report(self.host());
            self.announce(id, notification);
        }
        CommandOutcome::Completed
    }

    /// Open or close a door
    ///
    /// Refreshes the snapshot, re-observes the door, then sends the command
    /// unless the door already is, or is heading to, the requested state.
    pub async fn request_transition(&self, id: &Id, direction: Direction) -> CommandOutcome {
        let mut guard = self.state.lock().await;
        if !guard.doors.contains_key(id) {
            warn!("No door with ID {}", id);
            return CommandOutcome::Rejected(format!("unknown door {}", id));
        }
        self.refresh(&mut guard).await;

        let ControllerState { snapshot, doors, .. } = &mut *guard;
        let Some(door) = doors.get_mut(id) else {
            return CommandOutcome::Rejected(format!("unknown door {}", id));
        };
        let notification = door.observe(snapshot, self.host());
        self.announce(id, notification);

        let outcome = door
            .execute_transition(direction, self.cloud(), self.host(), self.policy)
            .await;
        if let CommandOutcome::Failed { attempts, .. } = &outcome {
            self.publish(DoorEvent::CommandFailed {
                id: id.clone(),
                direction,
                attempts: *attempts,
            });
        }
        outcome
    }

    /// Route a hub command to the node at `address`
    pub async fn dispatch(&self, address: &str, command: &str) -> CommandOutcome {
        async {
            let Some(name) = CommandName::from_name(command) else {
                warn!("Unknown command {} for {}", command, address);
                return CommandOutcome::Rejected(format!("unknown command {}", command));
            };

            if address == self.address {
                return match self.commands.get(&name) {
                    Some(handler) => handler(self).await,
                    None => {
                        warn!("{} does not accept {}", self.address, name);
                        CommandOutcome::Rejected(format!("{} not accepted by controller", name))
                    }
                };
            }

            let id = Id::from(address);
            let handler = {
                let state = self.state.lock().await;
                match state.doors.get(&id) {
                    Some(door) => door.handler(name),
                    None => {
                        warn!("No node at address {}", address);
                        return CommandOutcome::Rejected(format!("unknown address {}", address));
                    }
                }
            };

            match handler {
                Some(handler) => handler(self, &id).await,
                None => CommandOutcome::Rejected(format!("{} not accepted by {}", name, address)),
            }
        }
        .instrument(operation_span(command, address))
        .instrument(self.span.clone())
        .await
    }

    /// Ids of all registered doors
    pub async fn door_ids(&self) -> Vec<Id> {
        self.state.lock().await.doors.keys().cloned().collect()
    }

    /// Last normalized state of a door
    pub async fn door_state(&self, id: &Id) -> Option<DoorState> {
        self.state.lock().await.doors.get(id).and_then(GarageDoor::state)
    }

    /// Last driver value written for a door
    pub async fn door_driver(&self, id: &Id) -> Option<u8> {
        self.state.lock().await.doors.get(id).and_then(GarageDoor::driver)
    }

    /// Current display name of a door
    pub async fn door_name(&self, id: &Id) -> Option<String> {
        self.state
            .lock()
            .await
            .doors
            .get(id)
            .map(|door| door.name().to_string())
    }

    /// Whether a door has a retry under way
    pub async fn retry_in_flight(&self, id: &Id) -> Result<bool> {
        self.state
            .lock()
            .await
            .doors
            .get(id)
            .map(GarageDoor::retry_in_flight)
            .ok_or_else(|| DeviceError::NotFound(id.clone()))
    }

    /// Commands accepted by the node at `address`
    pub async fn commands_for(&self, address: &str) -> Vec<CommandName> {
        if address == self.address {
            return self.commands.keys().copied().collect();
        }
        self.state
            .lock()
            .await
            .doors
            .get(address)
            .map(GarageDoor::commands)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::RecordingHost;
    use crate::simulated::SimulatedCloud;
    use std::sync::Arc;

    fn setup(cloud: SimulatedCloud) -> (Arc<SimulatedCloud>, Arc<RecordingHost>, Controller) {
        let cloud = Arc::new(cloud);
        let host = Arc::new(RecordingHost::new());
        let controller = Controller::new(cloud.clone(), host.clone());
        (cloud, host, controller)
    }

    #[test_log::test(tokio::test)]
    async fn test_start_registers_and_polls() {
        let (cloud, host, controller) = setup(
            SimulatedCloud::new()
                .with_door("A1", "Left", "closed")
                .with_door("B2", "Right", "open"),
        );

        let added = controller.start().await.unwrap();

        assert_eq!(added, 2);
        assert_eq!(cloud.login_calls(), 1);
        assert_eq!(host.nodes().len(), 3);
        assert_eq!(host.node("garagectrl").map(|n| n.node_def), Some(CONTROLLER_NODE_DEF.to_string()));
        assert_eq!(host.driver("garagectrl"), Some(1));
        assert_eq!(host.driver("A1"), Some(0));
        assert_eq!(host.driver("B2"), Some(1));
    }

    #[tokio::test]
    async fn test_login_failure_is_fatal() {
        let (cloud, host, controller) = setup(SimulatedCloud::new().with_door("A1", "Left", "open"));
        cloud.fail_logins(1);

        let result = controller.start().await;

        assert!(matches!(result, Err(DeviceError::Auth(CloudError::AuthFailed(_)))));
        assert!(controller.door_ids().await.is_empty());
        assert_eq!(cloud.fetch_calls(), 0);
        assert_eq!(host.driver("garagectrl"), None);
    }

    #[tokio::test]
    async fn test_discovery_failure_at_start() {
        let (cloud, _host, controller) = setup(SimulatedCloud::new().with_door("A1", "Left", "open"));
        cloud.fail_listings(2);

        assert!(matches!(controller.start().await, Err(DeviceError::Discovery(_))));
    }

    #[tokio::test]
    async fn test_from_config_rejects_invalid_config() {
        let cloud = Arc::new(SimulatedCloud::new());
        let host = Arc::new(RecordingHost::new());
        let result = Controller::from_config(&Config::default(), cloud, host);
        assert!(matches!(result, Err(DeviceError::Core(_))));
    }

    #[tokio::test]
    async fn test_rediscovery_only_adds() {
        let (cloud, host, controller) = setup(SimulatedCloud::new().with_door("A1", "Left", "open"));
        controller.start().await.unwrap();
        let mut events = controller.subscribe();

        cloud.add_door("C3", "Shed", Some("closed"));
        cloud.remove_door(&"A1".into());
        assert_eq!(controller.discover().await.unwrap(), 1);

        assert_eq!(controller.door_ids().await, vec![Id::from("A1"), Id::from("C3")]);
        assert_eq!(host.nodes().len(), 3);
        assert_eq!(
            events.try_recv().unwrap(),
            DoorEvent::Added {
                id: "C3".into(),
                name: "Shed".into()
            }
        );
    }

    #[tokio::test]
    async fn test_poll_publishes_transitions() {
        let (cloud, _host, controller) = setup(SimulatedCloud::new().with_door("A1", "Left", "closing"));
        controller.start().await.unwrap();
        let mut events = controller.subscribe();

        cloud.set_state(&"A1".into(), Some("closed"));
        controller.poll().await;
        controller.poll().await;

        assert_eq!(events.try_recv().unwrap(), DoorEvent::Closed { id: "A1".into() });
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_request_transition_refreshes_first() {
        let (cloud, host, controller) = setup(SimulatedCloud::new().with_door("A1", "Left", "closed"));
        controller.start().await.unwrap();

        // the door opened outside the hub since the last poll
        cloud.set_state(&"A1".into(), Some("open"));
        let fetches = cloud.fetch_calls();
        let outcome = controller.request_transition(&"A1".into(), Direction::Open).await;

        assert_eq!(outcome, CommandOutcome::AlreadyInState(DoorState::Open));
        assert_eq!(cloud.fetch_calls(), fetches + 1);
        assert_eq!(cloud.command_calls(), 0);
        assert_eq!(host.reported_commands("A1"), vec![CommandName::Dof, CommandName::Don]);
    }

    #[tokio::test]
    async fn test_request_transition_with_failed_refresh_uses_old_data() {
        let (cloud, host, controller) = setup(SimulatedCloud::new().with_door("A1", "Left", "closed"));
        controller.start().await.unwrap();
        cloud.fail_fetches(2);

        let outcome = controller.request_transition(&"A1".into(), Direction::Open).await;

        assert_eq!(outcome, CommandOutcome::Issued { attempts: 1 });
        assert_eq!(host.driver("A1"), Some(4));
    }

    #[tokio::test]
    async fn test_failed_command_event() {
        let (cloud, host, controller) = setup(SimulatedCloud::new().with_door("A1", "Left", "open"));
        controller.start().await.unwrap();
        let mut events = controller.subscribe();
        cloud.fail_commands(2);

        let outcome = controller.request_transition(&"A1".into(), Direction::Close).await;

        assert!(matches!(outcome, CommandOutcome::Failed { attempts: 2, .. }));
        assert_eq!(host.driver("A1"), Some(1));
        assert!(!controller.retry_in_flight(&"A1".into()).await.unwrap());
        assert_eq!(
            events.try_recv().unwrap(),
            DoorEvent::CommandFailed {
                id: "A1".into(),
                direction: Direction::Close,
                attempts: 2
            }
        );
    }

    #[tokio::test]
    async fn test_retry_policy_from_config_is_used() {
        let mut config = Config::default();
        config.account.username = "me".into();
        config.account.password = "pw".into();
        config.account.brand = "merlin".into();
        config.polling.max_attempts = 3;

        let cloud = Arc::new(SimulatedCloud::new().with_door("A1", "Left", "closed"));
        let host = Arc::new(RecordingHost::new());
        let controller = Controller::from_config(&config, cloud.clone(), host).unwrap();
        controller.start().await.unwrap();
        cloud.fail_commands(2);

        let outcome = controller.request_transition(&"A1".into(), Direction::Open).await;
        assert_eq!(outcome, CommandOutcome::Issued { attempts: 3 });
    }

    #[tokio::test]
    async fn test_long_poll_never_fails_outward() {
        let (cloud, _host, controller) = setup(SimulatedCloud::new());
        controller.start().await.unwrap();
        cloud.fail_logins(1);

        controller.long_poll().await;
        controller.long_poll().await;
        assert_eq!(cloud.login_calls(), 3);
    }

    #[tokio::test]
    async fn test_stop_clears_controller_driver() {
        let (_cloud, host, controller) = setup(SimulatedCloud::new());
        controller.start().await.unwrap();
        controller.stop().await;
        assert_eq!(host.driver_history("garagectrl"), vec![1, 0]);
    }

    #[tokio::test]
    async fn test_unknown_door_lookups() {
        let (_cloud, _host, controller) = setup(SimulatedCloud::new());
        assert!(matches!(
            controller.retry_in_flight(&"Z9".into()).await,
            Err(DeviceError::NotFound(_))
        ));
        assert_eq!(
            controller.request_transition(&"Z9".into(), Direction::Open).await,
            CommandOutcome::Rejected("unknown door Z9".into())
        );
    }
}
