//! Common types and utilities for the Lazarus resurrection agent

pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, Mode};
pub use error::{Error, Result};
pub use types::*;
