//! Component descriptors: which pluggable capability a plugin provides.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// The capability kinds a plugin process may implement.
///
/// The string tag of each kind is stable: it appears in derived socket paths
/// and in log messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ComponentKind {
    State,
    PubSub,
    InputBinding,
    OutputBinding,
    SecretStore,
    Lock,
    NameResolution,
    HttpMiddleware,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 8] = [
        ComponentKind::State,
        ComponentKind::PubSub,
        ComponentKind::InputBinding,
        ComponentKind::OutputBinding,
        ComponentKind::SecretStore,
        ComponentKind::Lock,
        ComponentKind::NameResolution,
        ComponentKind::HttpMiddleware,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::State => "state",
            ComponentKind::PubSub => "pubsub",
            ComponentKind::InputBinding => "bindings.input",
            ComponentKind::OutputBinding => "bindings.output",
            ComponentKind::SecretStore => "secretstores",
            ComponentKind::Lock => "lock",
            ComponentKind::NameResolution => "nameresolution",
            ComponentKind::HttpMiddleware => "middleware.http",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComponentKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or_else(|| ConfigError::UnknownKind(s.to_string()))
    }
}

impl TryFrom<String> for ComponentKind {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ComponentKind> for String {
    fn from(kind: ComponentKind) -> String {
        kind.as_str().to_string()
    }
}

/// Identifies one discovered plugin capability. Immutable once discovered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub kind: ComponentKind,
    pub name: String,
    pub version: String,
}

impl Descriptor {
    pub fn new(kind: ComponentKind, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.kind, self.name, self.version)
    }
}
