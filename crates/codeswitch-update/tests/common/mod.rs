//! Shared test infrastructure for codeswitch-update integration tests
//!
//! - `constants`: versions, paths and payloads
//! - `mock_server`: wiremock setup for manifests, release listings and artifacts
//! - `hosts`: recording host and fake installer
//! - `service_helpers`: service construction and state polling

#![allow(dead_code)]
#![allow(unused_imports)]

pub mod constants;
pub mod hosts;
pub mod mock_server;
pub mod service_helpers;

pub use constants::*;
pub use hosts::*;
pub use mock_server::*;
pub use service_helpers::*;
