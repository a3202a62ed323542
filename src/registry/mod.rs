//! Kind-indexed table of component builders.
//!
//! The registry decouples "a descriptor of kind K was discovered" from "how
//! to turn it into a usable capability". It is populated during
//! single-threaded startup and read-only afterwards; the table is
//! type-erased at its boundary and type-safe inside each registered builder.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use crate::component::{ComponentKind, Descriptor};
use crate::config::HostConfig;
use crate::connector::{Connector, DialOptions, PluggableClient};
use crate::error::Result;
use crate::middleware::PluggableMiddleware;
use crate::runtime::{Component, LoadedComponent};

type Builder = Box<dyn Fn(Descriptor) -> BoxFuture<'static, Result<Component>> + Send + Sync>;

#[derive(Default)]
pub struct Registry {
    builders: HashMap<ComponentKind, Builder>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the builder for `kind`. Last registration wins, which keeps
    /// test stubbing cheap; registration is a startup-only activity.
    pub fn register<F, Fut>(&mut self, kind: ComponentKind, builder: F)
    where
        F: Fn(Descriptor) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Component>> + Send + 'static,
    {
        self.builders
            .insert(kind, Box::new(move |d| Box::pin(builder(d))));
    }

    pub fn is_registered(&self, kind: ComponentKind) -> bool {
        self.builders.contains_key(&kind)
    }

    /// Runs the builder for the descriptor's kind.
    ///
    /// `None` means the kind is not supported by this host build — a
    /// degraded case the caller skips, not an error. A `Some(Err(_))` is the
    /// builder's own failure, which the caller must surface.
    pub async fn resolve(&self, descriptor: &Descriptor) -> Option<Result<Component>> {
        let builder = self.builders.get(&descriptor.kind)?;
        Some(builder(descriptor.clone()).await)
    }

    /// A registry with the default builder for every supported kind: dial
    /// the plugin socket, ping, and run the init handshake.
    pub fn with_defaults(config: &HostConfig) -> Self {
        let settings = Arc::new(LoadSettings::from_config(config));
        let mut registry = Self::new();

        registry.register_connector_kind(ComponentKind::State, settings.clone(), Component::State);
        registry.register_connector_kind(
            ComponentKind::PubSub,
            settings.clone(),
            Component::PubSub,
        );
        registry.register_connector_kind(
            ComponentKind::InputBinding,
            settings.clone(),
            Component::InputBinding,
        );
        registry.register_connector_kind(
            ComponentKind::OutputBinding,
            settings.clone(),
            Component::OutputBinding,
        );
        registry.register_connector_kind(
            ComponentKind::SecretStore,
            settings.clone(),
            Component::SecretStore,
        );
        registry.register_connector_kind(ComponentKind::Lock, settings.clone(), Component::Lock);
        registry.register_connector_kind(
            ComponentKind::NameResolution,
            settings.clone(),
            Component::NameResolution,
        );

        let middleware_settings = settings;
        registry.register(ComponentKind::HttpMiddleware, move |descriptor| {
            let settings = middleware_settings.clone();
            async move {
                let instance = settings.instance_for(&descriptor);
                let properties = settings.properties_for(&descriptor);
                let middleware = PluggableMiddleware::load(
                    descriptor,
                    &instance,
                    properties,
                    &settings.sockets_folder,
                    settings.dial.clone(),
                )
                .await?;
                Ok(Component::HttpMiddleware(middleware))
            }
        });

        registry
    }

    fn register_connector_kind<C>(
        &mut self,
        kind: ComponentKind,
        settings: Arc<LoadSettings>,
        wrap: fn(LoadedComponent<C>) -> Component,
    ) where
        C: PluggableClient,
    {
        self.register(kind, move |descriptor| {
            let settings = settings.clone();
            async move {
                let instance = settings.instance_for(&descriptor);
                let properties = settings.properties_for(&descriptor);

                let mut connector: Connector<C> =
                    Connector::new(descriptor, &settings.sockets_folder);
                connector.dial(&instance, settings.dial.clone()).await?;
                if let Err(e) = connector.init(properties).await {
                    connector.close().await;
                    return Err(e);
                }

                Ok(wrap(LoadedComponent::new(instance, connector)))
            }
        });
    }
}

/// Per-host settings the default builders capture: where sockets live, how
/// long a dial may wait for readiness, and each component's configured
/// instance name and init properties.
struct LoadSettings {
    sockets_folder: PathBuf,
    dial: DialOptions,
    entries: HashMap<(ComponentKind, String), (String, HashMap<String, String>)>,
}

impl LoadSettings {
    fn from_config(config: &HostConfig) -> Self {
        let entries = config
            .components
            .iter()
            .map(|spec| {
                (
                    (spec.kind, spec.name.clone()),
                    (spec.instance_name().to_string(), spec.properties.clone()),
                )
            })
            .collect();
        Self {
            sockets_folder: config.sockets_folder.clone(),
            dial: config.dial_options(),
            entries,
        }
    }

    fn instance_for(&self, descriptor: &Descriptor) -> String {
        self.entries
            .get(&(descriptor.kind, descriptor.name.clone()))
            .map(|(instance, _)| instance.clone())
            .unwrap_or_else(|| descriptor.name.clone())
    }

    fn properties_for(&self, descriptor: &Descriptor) -> HashMap<String, String> {
        self.entries
            .get(&(descriptor.kind, descriptor.name.clone()))
            .map(|(_, properties)| properties.clone())
            .unwrap_or_default()
    }
}
