/*!
 * Cloud session contract.
 *
 * The vendor cloud client is an external collaborator. This module defines
 * the operations the controller needs from it and the raw data it returns.
 */
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use garagelink_core::types::Id;

use crate::error::CloudError;
use crate::state::{Direction, StateRead};

/// A device as listed by the cloud account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Cloud-assigned identifier
    pub id: Id,
    /// Label shown in the vendor app
    pub name: String,
}

/// One device's record in a snapshot, as sent by the vendor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDeviceRecord {
    /// Cloud-assigned identifier
    pub id: Id,
    /// Label shown in the vendor app
    #[serde(default)]
    pub name: String,
    /// Raw door status string, absent when the service could not report one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Remaining vendor fields, kept verbatim
    #[serde(flatten)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl RawDeviceRecord {
    /// A record with a status string and no extra attributes
    pub fn new(id: impl Into<Id>, name: impl Into<String>, state: Option<&str>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            state: state.map(str::to_string),
            attributes: serde_json::Map::new(),
        }
    }
}

/// All device records fetched by one refresh call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    records: HashMap<Id, RawDeviceRecord>,
    fetched_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    /// Build a snapshot stamped with the current time
    pub fn new<I>(records: I) -> Self
    where
        I: IntoIterator<Item = RawDeviceRecord>,
    {
        Self {
            records: records
                .into_iter()
                .map(|record| (record.id.clone(), record))
                .collect(),
            fetched_at: Some(Utc::now()),
        }
    }

    /// The snapshot held before the first successful refresh
    pub fn empty() -> Self {
        Self::default()
    }

    /// When the data was fetched, `None` for the initial empty snapshot
    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.fetched_at
    }

    /// The raw record of a device
    pub fn record(&self, id: &Id) -> Option<&RawDeviceRecord> {
        self.records.get(id)
    }

    /// Read a device's status out of the snapshot
    pub fn read_state(&self, id: &Id) -> StateRead {
        match self.records.get(id) {
            Some(RawDeviceRecord {
                state: Some(raw), ..
            }) => StateRead::Reported(raw.clone()),
            Some(_) => StateRead::Unreadable(format!("record for {} carries no state", id)),
            None => StateRead::Missing,
        }
    }

    /// Number of device records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the snapshot holds no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// The vendor cloud session
///
/// Implementations own authentication tokens and any transport timeouts.
#[async_trait]
pub trait CloudSession: Send + Sync + Debug {
    /// Log in, or check that the current session is still valid
    async fn login(&self) -> Result<(), CloudError>;

    /// List the garage doors tied to the account
    async fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, CloudError>;

    /// Fetch the current records of every device
    async fn fetch_all(&self) -> Result<Snapshot, CloudError>;

    /// Ask a door to open or close
    async fn send_command(&self, id: &Id, action: Direction) -> Result<(), CloudError>;
}

/// A cloud session shared between the controller and its owner
pub type SharedCloudSession = Arc<dyn CloudSession>;
