//! Type definitions for CodeSwitch runtime configuration

mod runtime_config;

pub use runtime_config::*;
