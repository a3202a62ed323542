//! Typed client stubs layered over an [`RpcChannel`].
//!
//! Every pluggable service exposes at least `ping` (liveness) and `init`
//! (metadata handshake). The capability-specific surface of the simple kinds
//! is a passthrough `invoke`; their business operations are defined by the
//! capability contracts, not by this crate.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::channel::{RpcChannel, RpcStream};
use crate::error::Result;

/// Minimum contract every plugin client supports.
#[async_trait]
pub trait PluggableClient: Send + Sync + Sized + 'static {
    /// Builds the typed stub over an open channel.
    fn attach(channel: Arc<RpcChannel>) -> Self;

    fn channel(&self) -> &Arc<RpcChannel>;

    /// Liveness probe. No payload.
    async fn ping(&self) -> Result<()> {
        self.channel().call("ping", Value::Null).await?;
        Ok(())
    }

    /// One-time initialization handshake with static metadata.
    async fn init(&self, metadata: HashMap<String, String>) -> Result<()> {
        self.channel()
            .call("init", json!({ "metadata": metadata }))
            .await?;
        Ok(())
    }

    /// Capability-specific passthrough call.
    async fn invoke(&self, method: &str, params: Value) -> Result<Value> {
        self.channel().call(method, params).await
    }
}

macro_rules! plain_client {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone)]
        pub struct $name {
            channel: Arc<RpcChannel>,
        }

        #[async_trait]
        impl PluggableClient for $name {
            fn attach(channel: Arc<RpcChannel>) -> Self {
                Self { channel }
            }

            fn channel(&self) -> &Arc<RpcChannel> {
                &self.channel
            }
        }
    };
}

plain_client!(
    /// Client for state store plugins.
    StateStoreClient
);
plain_client!(
    /// Client for publish/subscribe plugins.
    PubSubClient
);
plain_client!(
    /// Client for input binding plugins.
    InputBindingClient
);
plain_client!(
    /// Client for output binding plugins.
    OutputBindingClient
);
plain_client!(
    /// Client for secret store plugins.
    SecretStoreClient
);
plain_client!(
    /// Client for distributed lock plugins.
    LockClient
);
plain_client!(
    /// Client for name resolution plugins.
    NameResolutionClient
);

/// Client for HTTP middleware plugins. On top of the common contract it
/// opens one `handle` command stream per in-flight request.
#[derive(Clone)]
pub struct HttpMiddlewareClient {
    channel: Arc<RpcChannel>,
}

#[async_trait]
impl PluggableClient for HttpMiddlewareClient {
    fn attach(channel: Arc<RpcChannel>) -> Self {
        Self { channel }
    }

    fn channel(&self) -> &Arc<RpcChannel> {
        &self.channel
    }
}

impl HttpMiddlewareClient {
    /// Opens a fresh duplex command stream for one request.
    pub async fn handle(&self) -> Result<RpcStream> {
        self.channel.open_stream("handle", Value::Null).await
    }
}
