//! Configuration module
//!
//! - types.rs: file-level settings and the resolved `ConnectionConfig`
//! - io.rs: loading from TOML and environment overrides
//! - validation.rs: validation and credential resolution
//! - paths.rs: configuration file paths

mod io;
mod paths;
mod types;
mod validation;

pub use types::{Config, ConnectionConfig, Credentials, ScreepsSettings, ServerSettings};

pub use io::{apply_env_overrides, apply_overrides_from, load_config, load_config_from_path};
pub use paths::{config_dir, config_path};
pub use validation::{validate_config, ConfigValidationResult, ValidationIssue};
