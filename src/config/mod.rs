//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: Core config struct definitions (Config, LogConfig, MetricsConfig)
//! - [`replay`]: Replay input configuration (ReplayConfig)
//! - [`validation`]: Startup validation

mod replay;
mod types;
mod validation;

pub use replay::ReplayConfig;
pub use types::{Config, ConfigError, LogConfig, MetricsConfig};
pub use validation::{ValidationError, validate};
