//! The per-request command loop.
//!
//! A session lets one out-of-process plugin act as an in-process middleware
//! layer for one request: the plugin sends commands over its stream, the
//! host applies them to the live [`HttpContext`] in arrival order, and
//! `ExecuteNext` runs the host's own downstream handler in-line. Each loop
//! iteration races the request's cancellation against stream activity, so a
//! stalled plugin cannot outlive the request deadline.

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use http::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::command::{Command, CommandResponse};
use super::context::HttpContext;
use crate::connector::{RpcStream, StreamEvent};
use crate::error::SessionError;

/// Downstream continuation. Invoked at most once, in-line within the command
/// loop, preserving single-writer access to the context.
pub type Next<'a> =
    Box<dyn for<'c> FnOnce(&'c mut HttpContext) -> BoxFuture<'c, Result<(), String>> + Send + 'a>;

/// Seam between the session loop and the transport. The production
/// implementation wraps an [`RpcStream`]; tests drive the loop directly.
#[async_trait]
pub trait CommandExchange: Send {
    /// Waits for the next command. `None` means the plugin closed the
    /// stream cleanly.
    async fn recv(&mut self) -> Option<Result<Command, SessionError>>;

    async fn send(&mut self, response: CommandResponse) -> Result<(), SessionError>;

    /// Tears the stream down. Runs on every session exit path.
    async fn close(&mut self);
}

/// [`CommandExchange`] over a live duplex stream.
pub struct StreamExchange {
    stream: RpcStream,
    plugin: String,
}

impl StreamExchange {
    pub fn new(stream: RpcStream, plugin: impl Into<String>) -> Self {
        Self {
            stream,
            plugin: plugin.into(),
        }
    }
}

#[async_trait]
impl CommandExchange for StreamExchange {
    async fn recv(&mut self) -> Option<Result<Command, SessionError>> {
        match self.stream.recv().await {
            Some(StreamEvent::Item(payload)) => {
                Some(serde_json::from_value(payload).map_err(|e| {
                    SessionError::InvalidCommand {
                        plugin: self.plugin.clone(),
                        reason: e.to_string(),
                    }
                }))
            }
            Some(StreamEvent::Closed(None)) => None,
            Some(StreamEvent::Closed(Some(err))) => Some(Err(SessionError::Stream {
                plugin: self.plugin.clone(),
                reason: err.message,
            })),
            // Sender dropped without a close event: the connector shut down.
            None => Some(Err(SessionError::Stream {
                plugin: self.plugin.clone(),
                reason: "connection closed".to_string(),
            })),
        }
    }

    async fn send(&mut self, response: CommandResponse) -> Result<(), SessionError> {
        let payload = serde_json::to_value(&response).map_err(|e| SessionError::Stream {
            plugin: self.plugin.clone(),
            reason: e.to_string(),
        })?;
        self.stream
            .send(payload)
            .await
            .map_err(|e| SessionError::Stream {
                plugin: self.plugin.clone(),
                reason: e.to_string(),
            })
    }

    async fn close(&mut self) {
        self.stream.close().await;
    }
}

/// How a session ended.
#[derive(Debug)]
pub enum SessionOutcome {
    /// The plugin closed its stream; the response stands as the commands
    /// left it.
    Completed,
    /// The session was cut short. The caller synthesizes an error response.
    Failed(SessionError),
}

/// One request's live conversation with a middleware plugin.
pub struct Session<'a, X: CommandExchange> {
    plugin: String,
    exchange: X,
    ctx: &'a mut HttpContext,
    next: Option<Next<'a>>,
}

impl<'a, X: CommandExchange> Session<'a, X> {
    pub fn new(
        plugin: impl Into<String>,
        exchange: X,
        ctx: &'a mut HttpContext,
        next: Next<'a>,
    ) -> Self {
        Self {
            plugin: plugin.into(),
            exchange,
            ctx,
            next: Some(next),
        }
    }

    /// Runs the loop to completion. `cancel` is the request's own
    /// deadline/cancellation scope; firing it preempts a stalled plugin.
    pub async fn run(mut self, cancel: &CancellationToken) -> SessionOutcome {
        let outcome = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break SessionOutcome::Failed(SessionError::Timeout(self.plugin.clone()));
                }
                received = self.exchange.recv() => match received {
                    None => {
                        debug!(plugin = %self.plugin, "middleware stream completed");
                        break SessionOutcome::Completed;
                    }
                    Some(Err(e)) => break SessionOutcome::Failed(e),
                    Some(Ok(command)) => {
                        if let Err(e) = self.dispatch(command).await {
                            break SessionOutcome::Failed(e);
                        }
                    }
                },
            }
        };
        // No leaked streams, whichever way the loop ended.
        self.exchange.close().await;
        outcome
    }

    async fn dispatch(&mut self, command: Command) -> Result<(), SessionError> {
        match command {
            Command::GetRequestBody => {
                self.exchange
                    .send(CommandResponse::RequestBody {
                        data: self.ctx.request.body.to_vec(),
                    })
                    .await
            }
            Command::GetResponseBody => {
                self.exchange
                    .send(CommandResponse::ResponseBody {
                        data: self.ctx.response.body.to_vec(),
                    })
                    .await
            }
            Command::GetRequestHeaders => {
                self.exchange
                    .send(CommandResponse::RequestHeaders {
                        method: self.ctx.request.method.clone(),
                        uri: self.ctx.request.uri.clone(),
                        headers: self.ctx.request_headers().to_vec(),
                    })
                    .await
            }
            Command::GetResponseHeaders => {
                self.exchange
                    .send(CommandResponse::ResponseHeaders {
                        headers: self.ctx.response_headers().to_vec(),
                    })
                    .await
            }
            Command::SetRequestHeaders {
                headers,
                method,
                uri,
            } => {
                for (name, value) in headers {
                    self.ctx.set_request_header(&name, value);
                }
                if let Some(method) = method.filter(|m| !m.is_empty()) {
                    self.ctx.request.method = method;
                }
                if let Some(uri) = uri.filter(|u| !u.is_empty()) {
                    self.ctx.request.uri = uri;
                }
                Ok(())
            }
            Command::SetResponseHeaders { headers } => {
                for (name, value) in headers {
                    self.ctx.set_response_header(&name, value);
                }
                Ok(())
            }
            Command::SetResponseStatus { code } => {
                self.ctx.response.status =
                    StatusCode::from_u16(code).map_err(|_| SessionError::InvalidCommand {
                        plugin: self.plugin.clone(),
                        reason: format!("invalid status code {code}"),
                    })?;
                Ok(())
            }
            Command::SetRequestBody { data } => {
                self.ctx.request.body = Bytes::from(data);
                Ok(())
            }
            Command::SetResponseBody { data } => {
                self.ctx.response.body = Bytes::from(data);
                Ok(())
            }
            Command::ExecuteNext => {
                // A second ExecuteNext would run the downstream chain twice;
                // treat it as a protocol error instead.
                let next = self
                    .next
                    .take()
                    .ok_or_else(|| SessionError::DuplicateExecuteNext {
                        plugin: self.plugin.clone(),
                    })?;
                next(&mut *self.ctx)
                    .await
                    .map_err(SessionError::Downstream)
            }
        }
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod session_tests;
