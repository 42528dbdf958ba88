use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

/// Stable identity of a portal, assigned by the daemon and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortalId(pub String);

impl PortalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PortalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PortalId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A locally exposed service.
/// This is the canonical data model shared by the daemon, the API, and the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalRecord {
    pub id: PortalId,

    /// Display label, e.g. "db"
    pub name: String,

    /// Host or IP the service is bound to, e.g. "127.0.0.1"
    pub address: String,

    pub port: u16,

    /// URL scheme, e.g. "http". Without one the portal cannot be opened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
}

impl PortalRecord {
    /// `address:port`, never prefixed with a scheme
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// `scheme://address:port`, if the portal has a scheme
    pub fn url(&self) -> Option<String> {
        self.scheme
            .as_deref()
            .map(|scheme| format!("{}://{}", scheme, self.socket_address()))
    }

    /// The URL when there is one, otherwise the socket address
    pub fn display_address(&self) -> String {
        self.url().unwrap_or_else(|| self.socket_address())
    }
}

/// A record together with the daemon stamp of its last change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedPortal {
    #[serde(flatten)]
    pub record: PortalRecord,
    pub version: u64,
    pub created_at: DateTime<Utc>,
}

/// Full daemon listing. `version` is the daemon's current global stamp;
/// portals are in creation order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalListing {
    pub version: u64,
    pub portals: Vec<VersionedPortal>,
}

/// Incremental change to the daemon's portal set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PortalEvent {
    Added { record: PortalRecord, version: u64 },
    Modified { record: PortalRecord, version: u64 },
    Removed { id: PortalId, version: u64 },
}

impl PortalEvent {
    pub fn id(&self) -> &PortalId {
        match self {
            PortalEvent::Added { record, .. } | PortalEvent::Modified { record, .. } => &record.id,
            PortalEvent::Removed { id, .. } => id,
        }
    }

    pub fn version(&self) -> u64 {
        match self {
            PortalEvent::Added { version, .. }
            | PortalEvent::Modified { version, .. }
            | PortalEvent::Removed { version, .. } => *version,
        }
    }
}

/// Request body for provisioning a portal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPortal {
    pub name: String,
    pub address: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
}

/// Opaque invitation handle scoped to one portal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteToken {
    pub token: String,
    pub portal_id: PortalId,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(scheme: Option<&str>) -> PortalRecord {
        PortalRecord {
            id: PortalId::from("2"),
            name: "web".to_string(),
            address: "10.0.0.5".to_string(),
            port: 8080,
            scheme: scheme.map(str::to_string),
        }
    }

    #[test]
    fn test_addresses_with_scheme() {
        let r = record(Some("http"));
        assert_eq!(r.socket_address(), "10.0.0.5:8080");
        assert_eq!(r.url().as_deref(), Some("http://10.0.0.5:8080"));
        assert_eq!(r.display_address(), "http://10.0.0.5:8080");
    }

    #[test]
    fn test_addresses_without_scheme() {
        let r = record(None);
        assert_eq!(r.socket_address(), "10.0.0.5:8080");
        assert!(r.url().is_none());
        assert_eq!(r.display_address(), "10.0.0.5:8080");
    }

    #[test]
    fn test_event_wire_format() {
        let event = PortalEvent::Removed { id: PortalId::from("abc"), version: 7 };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"kind":"removed","id":"abc","version":7}"#);
        assert_eq!(event.id().as_str(), "abc");
        assert_eq!(event.version(), 7);
    }

    #[test]
    fn test_versioned_portal_is_flat() {
        let vp = VersionedPortal {
            record: record(None),
            version: 3,
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(&vp).unwrap();
        assert_eq!(value["name"], "web");
        assert_eq!(value["version"], 3);
        assert!(value.get("scheme").is_none());

        let back: VersionedPortal = serde_json::from_value(value).unwrap();
        assert_eq!(back, vp);
    }
}
