//! Parallel copy of a web application's build artifacts into a deployment
//! directory.

pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod logging;

pub use error::{Result, SyncError};
