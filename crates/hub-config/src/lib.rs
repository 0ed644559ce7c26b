//! Hub configuration loading
//!
//! Reads the hub's YAML file, resolving `!include` and `!env_var` tags, and
//! deserializes it into [`HubConfig`].

mod error;
mod hub_config;
mod loader;

pub use error::{ConfigError, ConfigResult};
pub use hub_config::{BrokerSettings, HubConfig, ListenerSettings, SeedData, StoreSettings};
pub use loader::load_yaml;
