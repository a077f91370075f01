//! Configuration types for the client session
//!
//! Loaded from YAML; credentials deliberately live in the environment
//! (see `session::Credentials::from_env`), never in the config file.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::session::ReconnectPolicy;

// ============================================================================
// Configuration Structs
// ============================================================================

/// Exchange endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// WebSocket API endpoint (e.g., "wss://test.deribit.com/ws/api/v2")
    pub ws_url: String,
}

/// Reconnection policy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectSettings {
    /// Maximum failed reconnect attempts before the session gives up
    pub max_attempts: u32,
    /// Delay before the second attempt, in milliseconds; doubles per failure
    pub base_delay_ms: u64,
}

impl ReconnectSettings {
    /// Convert to the session-layer policy type
    pub fn to_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
        }
    }
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 2000,
        }
    }
}

/// Top-level application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub reconnect: ReconnectSettings,
    /// Default per-call deadline in milliseconds
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

fn default_call_timeout_ms() -> u64 {
    5000
}

impl AppConfig {
    /// Validate configuration rules
    pub fn validate(&self) -> Result<(), AppError> {
        // Rule: endpoint must be a WebSocket URL
        if !self.exchange.ws_url.starts_with("wss://") && !self.exchange.ws_url.starts_with("ws://")
        {
            return Err(AppError::Config(format!(
                "exchange.ws_url must start with ws:// or wss:// (got '{}')",
                self.exchange.ws_url
            )));
        }

        // Rule: at least one reconnect attempt
        if self.reconnect.max_attempts == 0 {
            return Err(AppError::Config(
                "reconnect.max_attempts must be > 0".to_string(),
            ));
        }

        // Rule: a zero base delay would hammer the endpoint on failure
        if self.reconnect.base_delay_ms == 0 {
            return Err(AppError::Config(
                "reconnect.base_delay_ms must be > 0".to_string(),
            ));
        }

        // Rule: calls need a usable deadline
        if self.call_timeout_ms == 0 {
            return Err(AppError::Config(
                "call_timeout_ms must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Default per-call deadline as a Duration
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}
