//! # Dripline Core
//!
//! Shared plumbing for the Dripline workspace: configuration and the
//! unified error type. Domain logic lives in `dripline-scheduler`.

pub mod config;
pub mod error;

pub use config::DriplineConfig;
pub use error::{DriplineError, Result};
