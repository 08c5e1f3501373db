//! Server configuration: `claimbridge.toml`, `.env` and process environment.

pub mod loader;
pub mod models;
pub mod sources;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions};
pub use models::{Config, ConfigMetadata, ServerConfig};
pub use validation::{ConfigWarning, ConfigWarnings};
