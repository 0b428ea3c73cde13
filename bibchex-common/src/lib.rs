//! # bibchex common library
//!
//! Shared code for the bibchex workspace:
//! - Error type used by configuration loading
//! - TOML configuration (logging, sources, check options)
//! - Progress events and the EventBus they travel on

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
