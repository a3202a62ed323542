//! Framed-JSON RPC channel over a unix domain socket.
//!
//! One channel per plugin instance. Frames are newline-delimited JSON and are
//! correlated by id, so many unary calls and duplex streams can be in flight
//! on the same socket at once without host-side locking around new streams.

use bytes::BytesMut;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ConnectorError, ProtocolError, Result};

/// Upper bound on a single frame. A plugin that exceeds it is misbehaving.
const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Buffered stream items per open stream before backpressure on the reader.
const STREAM_BUFFER: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteError {
    pub code: i64,
    pub message: String,
}

/// Wire frame. Every message on the socket is exactly one of these.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum Frame {
    Request {
        id: u64,
        method: String,
        #[serde(default)]
        params: Value,
    },
    Response {
        id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<RemoteError>,
    },
    StreamItem {
        id: u64,
        payload: Value,
    },
    StreamClose {
        id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<RemoteError>,
    },
}

/// What a stream receiver observes.
#[derive(Debug)]
pub enum StreamEvent {
    Item(Value),
    /// Remote closed the stream. `None` means a clean close.
    Closed(Option<RemoteError>),
}

enum Pending {
    Unary(oneshot::Sender<std::result::Result<Value, ProtocolError>>),
    Stream(mpsc::Sender<StreamEvent>),
}

/// Multiplexing client over one `UnixStream`.
pub struct RpcChannel {
    writer: Mutex<OwnedWriteHalf>,
    pending: Arc<DashMap<u64, Pending>>,
    next_id: AtomicU64,
    token: CancellationToken,
    reader: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl RpcChannel {
    /// Connects to the socket at `path` and spawns the frame reader.
    ///
    /// `token` is the owning connector's cancellation scope: cancelling it
    /// fails every call and stream still outstanding on this channel.
    pub async fn connect(path: &Path, token: CancellationToken) -> Result<Arc<Self>> {
        let stream = UnixStream::connect(path)
            .await
            .map_err(|e| ConnectorError::DialFailed {
                socket: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        let (read_half, write_half) = stream.into_split();

        let channel = Arc::new(Self {
            writer: Mutex::new(write_half),
            pending: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
            token: token.clone(),
            reader: Mutex::new(None),
        });

        let reader = tokio::spawn(read_loop(
            read_half,
            channel.pending.clone(),
            token,
        ));
        *channel.reader.lock().await = Some(reader);

        Ok(channel)
    }

    /// Issues one unary call and waits for its response.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, Pending::Unary(tx));

        let frame = Frame::Request {
            id,
            method: method.to_string(),
            params,
        };
        if let Err(e) = self.write_frame(&frame).await {
            self.pending.remove(&id);
            return Err(e);
        }

        tokio::select! {
            _ = self.token.cancelled() => {
                self.pending.remove(&id);
                Err(ConnectorError::Cancelled.into())
            }
            res = rx => match res {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(e.into()),
                // Reader dropped the sender without answering.
                Err(_) => Err(ConnectorError::Closed.into()),
            }
        }
    }

    /// Opens a duplex stream by issuing `method` and routing subsequent
    /// `StreamItem`/`StreamClose` frames for its id to the returned handle.
    pub async fn open_stream(self: &Arc<Self>, method: &str, params: Value) -> Result<RpcStream> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        self.pending.insert(id, Pending::Stream(tx));

        let frame = Frame::Request {
            id,
            method: method.to_string(),
            params,
        };
        if let Err(e) = self.write_frame(&frame).await {
            self.pending.remove(&id);
            return Err(e);
        }

        Ok(RpcStream {
            id,
            rx,
            channel: self.clone(),
            closed: false,
        })
    }

    async fn write_frame(&self, frame: &Frame) -> Result<()> {
        let mut line = serde_json::to_vec(frame)?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(&line)
            .await
            .map_err(|e| ProtocolError::SendFailed(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| ProtocolError::SendFailed(e.to_string()))?;
        Ok(())
    }

    /// Shuts the channel down: stops the reader and fails everything pending.
    /// Called by the owning connector, which is the channel's only owner.
    pub async fn shutdown(&self) {
        if let Some(reader) = self.reader.lock().await.take() {
            reader.abort();
        }
        fail_pending(&self.pending, "connection closed");
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

/// Host-side handle for one duplex stream.
pub struct RpcStream {
    id: u64,
    rx: mpsc::Receiver<StreamEvent>,
    channel: Arc<RpcChannel>,
    closed: bool,
}

impl RpcStream {
    /// Waits for the next event from the remote side.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Sends one payload to the remote side of this stream.
    pub async fn send(&self, payload: Value) -> Result<()> {
        self.channel
            .write_frame(&Frame::StreamItem {
                id: self.id,
                payload,
            })
            .await
    }

    /// Closes the stream from the host side. Always runs on session exit.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.channel.pending.remove(&self.id);
        let _ = self
            .channel
            .write_frame(&Frame::StreamClose {
                id: self.id,
                error: None,
            })
            .await;
    }
}

impl Drop for RpcStream {
    fn drop(&mut self) {
        // Routing entry must not outlive the handle even if close() was
        // skipped by a panic.
        self.channel.pending.remove(&self.id);
    }
}

fn fail_pending(pending: &DashMap<u64, Pending>, reason: &str) {
    let ids: Vec<u64> = pending.iter().map(|e| *e.key()).collect();
    for id in ids {
        if let Some((_, entry)) = pending.remove(&id) {
            match entry {
                Pending::Unary(tx) => {
                    let _ = tx.send(Err(ProtocolError::ReceiveFailed(reason.to_string())));
                }
                Pending::Stream(tx) => {
                    let _ = tx.try_send(StreamEvent::Closed(Some(RemoteError {
                        code: -1,
                        message: reason.to_string(),
                    })));
                }
            }
        }
    }
}

async fn read_loop(
    mut read_half: OwnedReadHalf,
    pending: Arc<DashMap<u64, Pending>>,
    token: CancellationToken,
) {
    let mut buf = BytesMut::with_capacity(8 * 1024);

    loop {
        while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            let line = buf.split_to(pos + 1);
            let line = &line[..line.len() - 1];
            if line.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }
            match serde_json::from_slice::<Frame>(line) {
                Ok(frame) => dispatch_frame(&pending, frame).await,
                Err(e) => warn!(error = %e, "discarding malformed frame"),
            }
        }

        // The cap applies to the partial frame still waiting for its
        // newline. Checked between reads, so a plugin that never terminates
        // the line cannot grow the buffer without bound.
        if buf.len() > MAX_FRAME_BYTES {
            warn!(buffered = buf.len(), "closing channel: frame exceeds maximum size");
            fail_pending(&pending, &ProtocolError::FrameTooLarge.to_string());
            return;
        }

        let read = tokio::select! {
            _ = token.cancelled() => {
                fail_pending(&pending, "connector closed");
                return;
            }
            read = read_half.read_buf(&mut buf) => read,
        };

        match read {
            Ok(0) => {
                debug!("channel reader reached EOF");
                fail_pending(&pending, "connection closed by plugin");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                fail_pending(&pending, &e.to_string());
                return;
            }
        }
    }
}

async fn dispatch_frame(pending: &DashMap<u64, Pending>, frame: Frame) {
    match frame {
        Frame::Response { id, result, error } => {
            match pending.remove(&id) {
                Some((_, Pending::Unary(tx))) => {
                    let outcome = match error {
                        Some(e) => Err(ProtocolError::Remote {
                            code: e.code,
                            message: e.message,
                        }),
                        None => Ok(result.unwrap_or(Value::Null)),
                    };
                    let _ = tx.send(outcome);
                }
                Some((id_key, entry @ Pending::Stream(_))) => {
                    // A stream id answered like a unary call is a protocol
                    // violation; put the entry back untouched.
                    warn!(id, "response frame for a stream id");
                    pending.insert(id_key, entry);
                }
                None => debug!(id, "response for unknown call id"),
            }
        }
        Frame::StreamItem { id, payload } => {
            let sender = match pending.get(&id) {
                Some(entry) => match entry.value() {
                    Pending::Stream(tx) => Some(tx.clone()),
                    Pending::Unary(_) => {
                        warn!(id, "stream item for a unary call id");
                        None
                    }
                },
                None => {
                    debug!(id, "stream item for unknown stream id");
                    None
                }
            };
            if let Some(tx) = sender {
                if tx.send(StreamEvent::Item(payload)).await.is_err() {
                    pending.remove(&id);
                }
            }
        }
        Frame::StreamClose { id, error } => {
            if let Some((_, Pending::Stream(tx))) = pending.remove(&id) {
                let _ = tx.send(StreamEvent::Closed(error)).await;
            }
        }
        Frame::Request { id, method, .. } => {
            // Plugins do not call back into the host in this contract.
            warn!(id, method = %method, "unexpected request frame from plugin");
        }
    }
}
