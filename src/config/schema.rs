use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::component::{ComponentKind, Descriptor};
use crate::connector::DialOptions;

/// Default folder for plugin sockets. Overridable with the
/// `CAPSOCK_SOCKETS_FOLDER` environment variable.
pub const DEFAULT_SOCKETS_FOLDER: &str = "/var/run";

fn default_sockets_folder() -> PathBuf {
    PathBuf::from(DEFAULT_SOCKETS_FOLDER)
}

fn default_dial_timeout_ms() -> u64 {
    30_000
}

/// Host-level configuration for loading pluggable components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Where plugin sockets are created.
    #[serde(default = "default_sockets_folder")]
    pub sockets_folder: PathBuf,

    /// Upper bound on waiting for a plugin socket to become connectable.
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,

    /// Configured components: instance names and init properties keyed to
    /// discovered descriptors.
    #[serde(default)]
    pub components: Vec<ComponentSpec>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            sockets_folder: default_sockets_folder(),
            dial_timeout_ms: default_dial_timeout_ms(),
            components: Vec::new(),
        }
    }
}

impl HostConfig {
    pub fn dial_options(&self) -> DialOptions {
        DialOptions {
            ready_timeout: Duration::from_millis(self.dial_timeout_ms),
        }
    }

    /// The descriptors of every configured component, in config order.
    pub fn descriptors(&self) -> Vec<Descriptor> {
        self.components.iter().map(ComponentSpec::descriptor).collect()
    }
}

/// One configured component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub kind: ComponentKind,
    pub name: String,
    pub version: String,

    /// Capability instance name; defaults to the plugin name.
    #[serde(default)]
    pub instance: Option<String>,

    /// Static key/value pairs sent in the init handshake.
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl ComponentSpec {
    pub fn descriptor(&self) -> Descriptor {
        Descriptor::new(self.kind, self.name.clone(), self.version.clone())
    }

    pub fn instance_name(&self) -> &str {
        self.instance.as_deref().unwrap_or(&self.name)
    }
}
