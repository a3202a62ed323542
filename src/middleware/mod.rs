//! Pluggable HTTP middleware: an out-of-process plugin participates in
//! per-request processing through a command stream per request.

use http::StatusCode;
use std::collections::HashMap;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::component::Descriptor;
use crate::connector::clients::HttpMiddlewareClient;
use crate::connector::{Connector, DialOptions};
use crate::error::Result;

pub mod command;
pub mod context;
pub mod session;

pub use command::{Command, CommandResponse, HeaderPairs};
pub use context::HttpContext;
pub use session::{CommandExchange, Next, Session, SessionOutcome, StreamExchange};

/// One loaded middleware plugin. Created once at load time; opens a fresh
/// command stream for every request routed through it.
pub struct PluggableMiddleware {
    name: String,
    connector: Connector<HttpMiddlewareClient>,
}

impl PluggableMiddleware {
    /// Dials the plugin and performs the one-time init handshake with its
    /// static configuration properties. Failure here is fatal to this
    /// capability's construction only.
    pub async fn load(
        descriptor: Descriptor,
        instance: &str,
        properties: HashMap<String, String>,
        sockets_folder: &Path,
        opts: DialOptions,
    ) -> Result<Self> {
        let mut connector = Connector::new(descriptor, sockets_folder);
        connector.dial(instance, opts).await?;
        if let Err(e) = connector.init(properties).await {
            connector.close().await;
            return Err(e);
        }
        Ok(Self {
            name: instance.to_string(),
            connector,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs one request through the plugin. Any protocol failure or timeout
    /// is absorbed into a synthesized error response; the host process never
    /// fails because of a misbehaving plugin.
    pub async fn handle(
        &self,
        ctx: &mut HttpContext,
        next: Next<'_>,
        cancel: &CancellationToken,
    ) {
        let Some(client) = self.connector.client() else {
            ctx.error_response(StatusCode::INTERNAL_SERVER_ERROR, "middleware is not connected");
            return;
        };
        let stream = match client.handle().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(plugin = %self.name, error = %e, "failed to open middleware stream");
                ctx.error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
                return;
            }
        };

        let exchange = StreamExchange::new(stream, self.name.clone());
        let session = Session::new(self.name.clone(), exchange, ctx, next);
        match session.run(cancel).await {
            SessionOutcome::Completed => {}
            SessionOutcome::Failed(e) => {
                warn!(plugin = %self.name, error = %e, "middleware session failed");
                ctx.error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
            }
        }
    }

    /// Closes the underlying connector, cancelling in-flight sessions.
    pub async fn close(self) {
        self.connector.close().await;
    }
}
