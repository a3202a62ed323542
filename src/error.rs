use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HostError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unknown component kind: {0}")]
    UnknownKind(String),
}

#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("Unable to open connection using socket '{socket}': {reason}")]
    DialFailed { socket: PathBuf, reason: String },

    #[error("Ping failed for component '{component}': {reason}")]
    PingFailed { component: String, reason: String },

    #[error("Init failed for component '{component}': {reason}")]
    InitFailed { component: String, reason: String },

    #[error("Connection closed")]
    Closed,

    #[error("Connector is not connected")]
    NotConnected,

    #[error("Call cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Remote error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("Frame exceeds maximum size")]
    FrameTooLarge,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Timed out waiting for middleware '{0}'")]
    Timeout(String),

    #[error("Middleware '{plugin}' issued ExecuteNext more than once")]
    DuplicateExecuteNext { plugin: String },

    #[error("Middleware '{plugin}' sent an invalid command: {reason}")]
    InvalidCommand { plugin: String, reason: String },

    #[error("Stream error from middleware '{plugin}': {reason}")]
    Stream { plugin: String, reason: String },

    #[error("Downstream handler failed: {0}")]
    Downstream(String),
}

pub type Result<T> = std::result::Result<T, HostError>;
