//! Folds resolved components into the host's active configuration.

use tracing::{info, warn};

use crate::component::{ComponentKind, Descriptor};
use crate::connector::clients::{
    InputBindingClient, LockClient, NameResolutionClient, OutputBindingClient, PubSubClient,
    SecretStoreClient, StateStoreClient,
};
use crate::connector::{Connector, PluggableClient};
use crate::error::Result;
use crate::middleware::PluggableMiddleware;
use crate::registry::Registry;

/// A capability object built from a descriptor: the named instance plus the
/// connector that exclusively owns its channel.
pub struct LoadedComponent<C: PluggableClient> {
    name: String,
    connector: Connector<C>,
}

impl<C: PluggableClient> LoadedComponent<C> {
    pub fn new(name: impl Into<String>, connector: Connector<C>) -> Self {
        Self {
            name: name.into(),
            connector,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// All capability calls route through this client; no second channel is
    /// ever dialed for the same plugin instance. `None` only for a component
    /// assembled around an undialed connector.
    pub fn client(&self) -> Option<&C> {
        self.connector.client()
    }

    pub async fn close(self) {
        self.connector.close().await;
    }
}

/// A constructed capability of any kind.
pub enum Component {
    State(LoadedComponent<StateStoreClient>),
    PubSub(LoadedComponent<PubSubClient>),
    InputBinding(LoadedComponent<InputBindingClient>),
    OutputBinding(LoadedComponent<OutputBindingClient>),
    SecretStore(LoadedComponent<SecretStoreClient>),
    Lock(LoadedComponent<LockClient>),
    NameResolution(LoadedComponent<NameResolutionClient>),
    HttpMiddleware(PluggableMiddleware),
}

impl Component {
    pub fn kind(&self) -> ComponentKind {
        match self {
            Component::State(_) => ComponentKind::State,
            Component::PubSub(_) => ComponentKind::PubSub,
            Component::InputBinding(_) => ComponentKind::InputBinding,
            Component::OutputBinding(_) => ComponentKind::OutputBinding,
            Component::SecretStore(_) => ComponentKind::SecretStore,
            Component::Lock(_) => ComponentKind::Lock,
            Component::NameResolution(_) => ComponentKind::NameResolution,
            Component::HttpMiddleware(_) => ComponentKind::HttpMiddleware,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Component::State(c) => c.name(),
            Component::PubSub(c) => c.name(),
            Component::InputBinding(c) => c.name(),
            Component::OutputBinding(c) => c.name(),
            Component::SecretStore(c) => c.name(),
            Component::Lock(c) => c.name(),
            Component::NameResolution(c) => c.name(),
            Component::HttpMiddleware(m) => m.name(),
        }
    }
}

/// The host's active capability sets. Multiple components of the same kind
/// coexist (e.g. several distinct state stores).
#[derive(Default)]
pub struct RuntimeOptions {
    pub states: Vec<LoadedComponent<StateStoreClient>>,
    pub pubsubs: Vec<LoadedComponent<PubSubClient>>,
    pub input_bindings: Vec<LoadedComponent<InputBindingClient>>,
    pub output_bindings: Vec<LoadedComponent<OutputBindingClient>>,
    pub secret_stores: Vec<LoadedComponent<SecretStoreClient>>,
    pub locks: Vec<LoadedComponent<LockClient>>,
    pub name_resolutions: Vec<LoadedComponent<NameResolutionClient>>,
    pub http_middleware: Vec<PluggableMiddleware>,
}

impl RuntimeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one constructed component to the set of its kind.
    pub fn apply(&mut self, component: Component) {
        match component {
            Component::State(c) => self.states.push(c),
            Component::PubSub(c) => self.pubsubs.push(c),
            Component::InputBinding(c) => self.input_bindings.push(c),
            Component::OutputBinding(c) => self.output_bindings.push(c),
            Component::SecretStore(c) => self.secret_stores.push(c),
            Component::Lock(c) => self.locks.push(c),
            Component::NameResolution(c) => self.name_resolutions.push(c),
            Component::HttpMiddleware(m) => self.http_middleware.push(m),
        }
    }

    pub fn with_state(mut self, c: LoadedComponent<StateStoreClient>) -> Self {
        self.states.push(c);
        self
    }

    pub fn with_pubsub(mut self, c: LoadedComponent<PubSubClient>) -> Self {
        self.pubsubs.push(c);
        self
    }

    pub fn with_http_middleware(mut self, m: PluggableMiddleware) -> Self {
        self.http_middleware.push(m);
        self
    }

    pub fn component_count(&self) -> usize {
        self.states.len()
            + self.pubsubs.len()
            + self.input_bindings.len()
            + self.output_bindings.len()
            + self.secret_stores.len()
            + self.locks.len()
            + self.name_resolutions.len()
            + self.http_middleware.len()
    }
}

/// Summary of one discovery batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub applied: usize,
    pub skipped: usize,
}

/// Resolves each discovered descriptor and folds the result into `options`.
///
/// Unsupported kinds are skipped and counted; a builder failure is returned
/// to the caller with everything already applied left in place. The caller
/// decides whether one bad plugin aborts startup.
pub async fn load_pluggables(
    registry: &Registry,
    descriptors: &[Descriptor],
    options: &mut RuntimeOptions,
) -> Result<LoadReport> {
    let mut report = LoadReport::default();

    for descriptor in descriptors {
        match registry.resolve(descriptor).await {
            None => {
                warn!(
                    component = %descriptor,
                    "no loader registered for component kind, skipping"
                );
                report.skipped += 1;
            }
            Some(Ok(component)) => {
                info!(component = %descriptor, "pluggable component loaded");
                options.apply(component);
                report.applied += 1;
            }
            Some(Err(e)) => return Err(e),
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectorError;

    fn stub_state(name: &str) -> Component {
        let descriptor = Descriptor::new(ComponentKind::State, name, "v1");
        Component::State(LoadedComponent::new(name, Connector::new(descriptor, "/var/run")))
    }

    #[tokio::test]
    async fn loader_skips_unknown_kinds_and_applies_the_rest() {
        let mut registry = Registry::new();
        registry.register(ComponentKind::State, |d: Descriptor| async move {
            Ok(stub_state(&d.name))
        });

        let descriptors = vec![
            Descriptor::new(ComponentKind::State, "a", "v1"),
            Descriptor::new(ComponentKind::PubSub, "b", "v1"),
            Descriptor::new(ComponentKind::State, "c", "v1"),
        ];

        let mut options = RuntimeOptions::new();
        let report = load_pluggables(&registry, &descriptors, &mut options)
            .await
            .unwrap();

        assert_eq!(report, LoadReport { applied: 2, skipped: 1 });
        let names: Vec<&str> = options.states.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert!(options.pubsubs.is_empty());
    }

    #[tokio::test]
    async fn builder_failure_keeps_prior_components_applied() {
        let mut registry = Registry::new();
        registry.register(ComponentKind::State, |d: Descriptor| async move {
            if d.name == "bad" {
                Err(ConnectorError::Closed.into())
            } else {
                Ok(stub_state(&d.name))
            }
        });

        let descriptors = vec![
            Descriptor::new(ComponentKind::State, "good", "v1"),
            Descriptor::new(ComponentKind::State, "bad", "v1"),
            Descriptor::new(ComponentKind::State, "never-reached", "v1"),
        ];

        let mut options = RuntimeOptions::new();
        let result = load_pluggables(&registry, &descriptors, &mut options).await;

        assert!(result.is_err());
        // No rollback: the first component stays applied.
        assert_eq!(options.states.len(), 1);
        assert_eq!(options.states[0].name(), "good");
    }

    #[tokio::test]
    async fn multiple_components_of_one_kind_coexist() {
        let mut options = RuntimeOptions::new();
        options.apply(stub_state("primary"));
        options.apply(stub_state("cache"));

        assert_eq!(options.states.len(), 2);
        assert_eq!(options.component_count(), 2);
    }
}
