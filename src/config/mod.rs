//! Client configuration
//!
//! `AppConfig` is persisted as JSON and cached in a `ConfigStore`;
//! `IMPERIUM_*` environment variables override file values.

mod schema;
mod store;

pub use schema::*;
pub use store::{apply_env_overrides, ConfigChange, ConfigStore, ENV_PREFIX};
