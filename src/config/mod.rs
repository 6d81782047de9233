// src/config/mod.rs

//! Configuration loading and validation for mediabridge.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Parse human duration strings (`duration.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate and convert the raw model into typed settings (`validate.rs`).

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use duration::parse_duration;
pub use loader::{load_and_validate, load_from_path};
pub use model::{
    ConfigFile, FallbackConfig, RawConfigFile, RawFallbackSection, RawServerSection,
    RawSupervisorSection, ServerConfig, SupervisorConfig, ToolConfig,
};
