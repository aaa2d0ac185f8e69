//! # Core Runtime Module
//!
//! Foundational infrastructure shared by every core component:
//! - Logging and tracing setup
//! - Configuration and retry policies
//! - Diagnostic event bus
//! - Observer fan-out lists
//!
//! ## Overview
//!
//! Nothing in this crate knows about providers or playback. It establishes
//! the conventions (errors, logging, configuration, callback delivery) that
//! the component crates build on.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod observers;
pub mod retry;

pub use error::{Error, Result};
pub use observers::{ObserverId, ObserverList};
pub use retry::RetryPolicy;
