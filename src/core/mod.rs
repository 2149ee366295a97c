//! Core infrastructure.
//!
//! This module contains the pieces every other part of the store depends on:
//! - `config` - Configuration parsing and validation
//! - `time` - Write-time timestamp capture and encoding

pub mod config;
pub mod time;

pub use config::*;
pub use time::*;
