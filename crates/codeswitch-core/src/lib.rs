//! # codeswitch-core
//!
//! Core library for CodeSwitch providing:
//! - Crash-safe atomic file writes used by every persisted setting and update marker
//! - Runtime configuration types with hierarchical loading (embedded defaults, user file, env)
//! - Home and data directory resolution

pub mod atomic_write;
pub mod config;
pub mod error;
pub mod types;
pub mod utils;

pub use atomic_write::{atomic_write, write_json_atomic, WriteStage};
pub use config::HierarchicalConfigLoader;
pub use error::{Error, Result};
pub use types::RuntimeConfig;
pub use utils::{get_home_dir, get_update_data_dir};
