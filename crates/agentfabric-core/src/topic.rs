//! Three-segment topics: `org/namespace/name`.
//!
//! A topic doubles as the routing subject for pub/sub transports and as the
//! authenticated principal for identity checks. Segments must be non-empty;
//! the name segment of a display name is mangled by replacing spaces with
//! underscores so that agent names like "Weather Agent" stay addressable.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::FabricError;

/// Routing subject and identity: `org/namespace/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    org: String,
    namespace: String,
    name: String,
}

impl Topic {
    /// Build a topic from three pre-validated segments.
    pub fn new(
        org: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Self, FabricError> {
        let topic = Self {
            org: org.into(),
            namespace: namespace.into(),
            name: name.into(),
        };
        topic.validate()?;
        Ok(topic)
    }

    /// Build a topic whose name segment is mangled from a display name
    /// (spaces become underscores).
    pub fn from_display_name(
        org: impl Into<String>,
        namespace: impl Into<String>,
        display_name: &str,
    ) -> Result<Self, FabricError> {
        Self::new(org, namespace, display_name.replace(' ', "_"))
    }

    fn validate(&self) -> Result<(), FabricError> {
        for (label, segment) in [
            ("org", &self.org),
            ("namespace", &self.namespace),
            ("name", &self.name),
        ] {
            if segment.is_empty() {
                return Err(FabricError::protocol(format!(
                    "topic {label} segment must be non-empty"
                )));
            }
            if segment.contains('/') || segment.contains('.') {
                return Err(FabricError::protocol(format!(
                    "topic {label} segment '{segment}' contains a separator"
                )));
            }
        }
        Ok(())
    }

    pub fn org(&self) -> &str {
        &self.org
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dotted form used as a NATS subject.
    pub fn nats_subject(&self) -> String {
        format!("{}.{}.{}", self.org, self.namespace, self.name)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.org, self.namespace, self.name)
    }
}

impl FromStr for Topic {
    type Err = FabricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(org), Some(ns), Some(name), None) => Self::new(org, ns, name),
            _ => Err(FabricError::protocol(format!(
                "topic '{s}' is not of the form org/namespace/name"
            ))),
        }
    }
}

impl Serialize for Topic {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Topic {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
