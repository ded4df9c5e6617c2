//! # Configuration Modules
//!
//! JSON5 settings files for the realtime client and their conversion into a
//! validated [`ConnectionConfig`](crate::core::state::ConnectionConfig).

/// Client settings file schema and validation.
pub mod client_settings;

pub use client_settings::{ClientSettings, ConfigError};
