//! Configuration for Logbook.
//!
//! Settings live in KDL files:
//!
//! - Project: `<repo>/.logbook.kdl` (committed with the repository)
//! - System: `~/.config/logbook/config.kdl`
//!
//! ## Precedence
//!
//! CLI flag > environment variable > project config > system config > defaults
//!
//! Use the [`resolver`] module for unified precedence resolution.

pub mod resolver;
pub mod schema;

pub use resolver::{
    ConfigEntry, ConfigOverrides, EnvOverrides, HISTORY_FILE_ENV, PROJECT_CONFIG_FILE, Resolved,
    ResolvedConfig, TEST_TIMEOUT_ENV, ValueSource, resolve_config, resolve_layers,
};
pub use schema::LogbookConfig;
