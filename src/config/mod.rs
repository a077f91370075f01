//! Configuration module for session settings and YAML loading
//!
//! This module provides:
//! - Configuration types (`AppConfig`, `ExchangeConfig`, `ReconnectSettings`)
//! - YAML loading functionality (`load_config`)
//! - Logging initialization (`init_logging`)

pub mod logging;
mod loader;
mod types;

// Re-export types
pub use types::{AppConfig, ExchangeConfig, ReconnectSettings};

// Re-export loader functions
pub use loader::{load_config, load_config_from_str};

// Re-export logging init
pub use logging::init_logging;
