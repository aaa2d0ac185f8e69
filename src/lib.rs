//! Workspace placeholder crate.
//!
//! This crate exposes shared feature flags that map to the individual
//! workspace crates (e.g., `core-service`, `core-metadata`). Host
//! applications can depend on `omnimusic-workspace` and enable the documented
//! features without wiring each crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_service;

#[cfg(feature = "artwork-cache")]
pub use core_metadata;
