/*!
 * Simulated cloud account.
 *
 * An in-memory [`CloudSession`] holding a set of doors whose raw states can
 * be scripted, with queued failures for each operation and counters for
 * every call. Successful commands move the door the way the real service
 * does: to "opening" or "closing".
 */
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use garagelink_core::types::Id;

use crate::cloud::{CloudSession, DeviceDescriptor, RawDeviceRecord, Snapshot};
use crate::error::CloudError;
use crate::state::Direction;

/// A scriptable in-memory cloud account
#[derive(Debug, Default)]
pub struct SimulatedCloud {
    doors: Mutex<BTreeMap<Id, RawDeviceRecord>>,
    sent: Mutex<Vec<(Id, Direction)>>,
    login_failures: AtomicUsize,
    list_failures: AtomicUsize,
    fetch_failures: AtomicUsize,
    command_failures: AtomicUsize,
    expired: AtomicBool,
    logins: AtomicUsize,
    fetches: AtomicUsize,
    commands: AtomicUsize,
}

fn take_failure(queued: &AtomicUsize) -> bool {
    queued
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl SimulatedCloud {
    /// An account with no doors
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`SimulatedCloud::add_door`]
    pub fn with_door(self, id: impl Into<Id>, name: &str, state: &str) -> Self {
        self.add_door(id, name, Some(state));
        self
    }

    fn doors(&self) -> MutexGuard<'_, BTreeMap<Id, RawDeviceRecord>> {
        self.doors.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a door, or replace one with the same id
    pub fn add_door(&self, id: impl Into<Id>, name: &str, state: Option<&str>) {
        let record = RawDeviceRecord::new(id, name, state);
        self.doors().insert(record.id.clone(), record);
    }

    /// Drop a door's record from the account
    pub fn remove_door(&self, id: &Id) {
        self.doors().remove(id);
    }

    /// Set the raw state string the service reports for a door
    pub fn set_state(&self, id: &Id, state: Option<&str>) {
        if let Some(record) = self.doors().get_mut(id) {
            record.state = state.map(str::to_string);
        }
    }

    /// Rename a door
    pub fn rename(&self, id: &Id, name: &str) {
        if let Some(record) = self.doors().get_mut(id) {
            record.name = name.to_string();
        }
    }

    /// Make the next `n` logins fail
    pub fn fail_logins(&self, n: usize) {
        self.login_failures.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` device listings fail
    pub fn fail_listings(&self, n: usize) {
        self.list_failures.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` snapshot fetches fail
    pub fn fail_fetches(&self, n: usize) {
        self.fetch_failures.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` door commands fail
    pub fn fail_commands(&self, n: usize) {
        self.command_failures.store(n, Ordering::SeqCst);
    }

    /// Reject every call but login until the next successful login
    pub fn expire_session(&self) {
        self.expired.store(true, Ordering::SeqCst);
    }

    fn check_session(&self) -> Result<(), CloudError> {
        if self.expired.load(Ordering::SeqCst) {
            return Err(CloudError::AuthFailed("session expired".to_string()));
        }
        Ok(())
    }

    /// Login calls so far
    pub fn login_calls(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    /// Snapshot fetches so far
    pub fn fetch_calls(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Door command calls so far, failed ones included
    pub fn command_calls(&self) -> usize {
        self.commands.load(Ordering::SeqCst)
    }

    /// Commands the service accepted, in order
    pub fn accepted_commands(&self) -> Vec<(Id, Direction)> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl CloudSession for SimulatedCloud {
    async fn login(&self) -> Result<(), CloudError> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.login_failures) {
            return Err(CloudError::AuthFailed("invalid credentials".to_string()));
        }
        self.expired.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, CloudError> {
        self.check_session()?;
        if take_failure(&self.list_failures) {
            return Err(CloudError::Transport("device list unavailable".to_string()));
        }
        Ok(self
            .doors()
            .values()
            .map(|record| DeviceDescriptor {
                id: record.id.clone(),
                name: record.name.clone(),
            })
            .collect())
    }

    async fn fetch_all(&self) -> Result<Snapshot, CloudError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.check_session()?;
        if take_failure(&self.fetch_failures) {
            return Err(CloudError::FetchFailed("service unavailable".to_string()));
        }
        Ok(Snapshot::new(self.doors().values().cloned()))
    }

    async fn send_command(&self, id: &Id, action: Direction) -> Result<(), CloudError> {
        self.commands.fetch_add(1, Ordering::SeqCst);
        self.check_session()?;
        if take_failure(&self.command_failures) {
            return Err(CloudError::CommandRejected(format!("{} {} failed", action, id)));
        }

        let mut doors = self.doors();
        let record = doors
            .get_mut(id)
            .ok_or_else(|| CloudError::CommandRejected(format!("no device {}", id)))?;
        record.state = Some(action.in_progress_state().as_str().to_string());
        drop(doors);

        debug!("simulated {} for {}", action, id);
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((id.clone(), action));
        Ok(())
    }
}
