//! Connection lifetime management for one plugin instance.
//!
//! A `Connector` is the exclusive owner of one RPC channel to one plugin
//! process. It is created once when the component is loaded and reused for
//! the lifetime of the host process; closing it cancels every call still in
//! flight on that channel.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::component::Descriptor;
use crate::error::{ConnectorError, Result};

pub mod channel;
pub mod clients;

pub use channel::{RpcChannel, RpcStream, StreamEvent};
pub use clients::PluggableClient;

/// Socket file name prefix and suffix for derived addresses.
const SOCKET_PREFIX: &str = "capsock";
const SOCKET_SUFFIX: &str = "sock";

/// Derives the unique local address for a component instance.
///
/// The path is a pure function of its inputs: identical
/// `(kind, name, version, instance)` always yield the same path, and any
/// difference yields a distinct one.
pub fn socket_path_for(folder: &Path, descriptor: &Descriptor, instance: &str) -> PathBuf {
    folder.join(format!(
        "{}-{}.{}-{}-{}.{}",
        SOCKET_PREFIX,
        descriptor.kind,
        descriptor.name,
        descriptor.version,
        instance,
        SOCKET_SUFFIX,
    ))
}

/// Options applied when dialing a plugin.
#[derive(Debug, Clone)]
pub struct DialOptions {
    /// Upper bound on waiting for the socket to become connectable. Plugin
    /// and host startup ordering is not guaranteed, so the dial tolerates
    /// the address not being bound yet.
    pub ready_timeout: Duration,
}

impl Default for DialOptions {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(30),
        }
    }
}

/// Owns one RPC channel to one plugin instance and the typed client on top
/// of it.
pub struct Connector<C: PluggableClient> {
    descriptor: Descriptor,
    sockets_folder: PathBuf,
    token: CancellationToken,
    channel: Option<Arc<RpcChannel>>,
    client: Option<C>,
}

impl<C: PluggableClient> Connector<C> {
    pub fn new(descriptor: Descriptor, sockets_folder: impl Into<PathBuf>) -> Self {
        Self {
            descriptor,
            sockets_folder: sockets_folder.into(),
            token: CancellationToken::new(),
            channel: None,
            client: None,
        }
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// The typed client stub. `None` until `dial` has succeeded.
    pub fn client(&self) -> Option<&C> {
        self.client.as_ref()
    }

    /// Opens the channel at the derived address, attaches the typed client,
    /// and verifies liveness with a ping. Blocks until the plugin is
    /// reachable, the ready timeout elapses, or the connector is closed.
    pub async fn dial(&mut self, instance: &str, opts: DialOptions) -> Result<()> {
        let socket = socket_path_for(&self.sockets_folder, &self.descriptor, instance);
        debug!(socket = %socket.display(), component = %self.descriptor, "dialing plugin");

        let channel = self.connect_when_ready(&socket, opts.ready_timeout).await?;
        let client = C::attach(channel.clone());
        if let Err(e) = client.ping().await {
            // Nobody holds a handle to this channel once the error returns,
            // so its reader task and socket must come down here.
            channel.shutdown().await;
            return Err(ConnectorError::PingFailed {
                component: self.descriptor.to_string(),
                reason: e.to_string(),
            }
            .into());
        }

        self.channel = Some(channel);
        self.client = Some(client);
        Ok(())
    }

    /// Wait-for-ready connect: transient refusals (plugin still starting,
    /// socket not yet bound) are retried with capped backoff rather than
    /// surfaced immediately.
    async fn connect_when_ready(
        &self,
        socket: &Path,
        ready_timeout: Duration,
    ) -> Result<Arc<RpcChannel>> {
        let deadline = tokio::time::Instant::now() + ready_timeout;
        let mut backoff = Duration::from_millis(20);
        let mut last_reason = String::from("socket not ready");

        loop {
            match RpcChannel::connect(socket, self.token.child_token()).await {
                Ok(channel) => return Ok(channel),
                Err(e) => last_reason = e.to_string(),
            }

            let now = tokio::time::Instant::now();
            if now + backoff >= deadline {
                return Err(ConnectorError::DialFailed {
                    socket: socket.to_path_buf(),
                    reason: last_reason,
                }
                .into());
            }

            tokio::select! {
                _ = self.token.cancelled() => return Err(ConnectorError::Cancelled.into()),
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(Duration::from_secs(1));
        }
    }

    /// No-payload liveness call against the already-dialed plugin.
    pub async fn ping(&self) -> Result<()> {
        match self.client.as_ref() {
            Some(client) => client.ping().await,
            None => Err(ConnectorError::NotConnected.into()),
        }
    }

    /// Performs the one-time initialization handshake with static metadata.
    pub async fn init(&self, metadata: HashMap<String, String>) -> Result<()> {
        let client = self.client.as_ref().ok_or(ConnectorError::NotConnected)?;
        client.init(metadata).await.map_err(|e| {
            ConnectorError::InitFailed {
                component: self.descriptor.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Cancels the connector's scope, aborting calls still in flight, and
    /// closes the channel. Consumes the connector: close happens at most
    /// once.
    pub async fn close(mut self) {
        self.token.cancel();
        if let Some(channel) = self.channel.take() {
            channel.shutdown().await;
        }
    }
}
