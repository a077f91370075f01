//! Deribit WebSocket client session
//!
//! Core pieces:
//! - Session layer (transport, request/response correlation, reconnect)
//! - Command layer issuing trading operations through the session
//! - YAML/env configuration

pub mod commands;
pub mod config;
pub mod error;
pub mod session;

pub use error::AppError;
