pub mod loader;
pub mod schema;

pub use loader::{load, load_from_path, validate};
pub use schema::{ComponentSpec, HostConfig, DEFAULT_SOCKETS_FOLDER};
