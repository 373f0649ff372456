//! Configuration module for bot settings and YAML loading

mod loader;
mod types;

// Re-export types
pub use types::{AppConfig, StrategyConfig};

// Re-export loader functions
pub use loader::{load_config, load_config_from_str};
