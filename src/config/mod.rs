//! Configuration Module
//!
//! Provider settings, sampling layers and configuration loading.

pub mod loader;
pub mod model;
pub mod provider;

pub use loader::ConfigLoader;
pub use model::{ModelConfig, ResolvedModelConfig};
pub use provider::{AppConfig, ProviderConfig};
