pub mod component;
pub mod config;
pub mod connector;
pub mod error;
pub mod middleware;
pub mod registry;
pub mod runtime;

pub use component::{ComponentKind, Descriptor};
pub use error::{HostError, Result};
pub use registry::Registry;
pub use runtime::{load_pluggables, LoadReport, RuntimeOptions};
