/*!
 * Core data types for garagelink.
 */
use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// An opaque identifier assigned by the cloud service.
///
/// Ids are compared byte for byte and are never generated locally. The
/// same string doubles as the node address reported to the hub.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(String);

impl Id {
    /// Create an ID from a string
    pub fn from_string<S: AsRef<str>>(s: S) -> Self {
        Self(s.as_ref().to_string())
    }

    /// Get the string representation of the ID
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is the empty string
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Self::from_string(s)
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<u64> for Id {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl Borrow<str> for Id {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Id {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_id_creation() {
        let id = Id::from_string("A1");
        assert_eq!(id.as_str(), "A1");

        let id: Id = "B2".into();
        assert_eq!(id.as_str(), "B2");

        let id: Id = String::from("C3").into();
        assert_eq!(id.as_str(), "C3");

        // numeric vendor ids become their decimal address
        let id: Id = 4711u64.into();
        assert_eq!(id.as_str(), "4711");
        assert!(!id.is_empty());
    }

    #[test]
    fn test_id_display() {
        let id = Id::from_string("garage-1");
        assert_eq!(format!("{}", id), "garage-1");
    }

    #[test]
    fn test_id_map_lookup_by_str() {
        let mut map = HashMap::new();
        map.insert(Id::from("A1"), 1);
        assert_eq!(map.get("A1"), Some(&1));
    }

    #[test]
    fn test_id_serde_is_transparent() {
        let json = serde_json::to_string(&Id::from("A1")).unwrap();
        assert_eq!(json, "\"A1\"");
        let back: Id = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Id::from("A1"));
    }
}
