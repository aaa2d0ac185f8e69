//! # Plugins Module
//!
//! Lookup and supervision of provider plugins and the playback-control
//! service.
//!
//! ## Overview
//!
//! [`ProviderRegistry`] tracks every registered [`ProviderConnector`] through
//! the `Disconnected -> Connecting -> Connected` lifecycle, retries failed
//! binds with exponential backoff, and exposes the playback service handle
//! together with an await-availability primitive.
//!
//! ## Usage
//!
//! ```ignore
//! use core_plugins::{ProviderRegistry, RegistryOptions};
//!
//! let registry = ProviderRegistry::new(RegistryOptions::from_config(&config), events);
//! registry.register_provider(connector)?;
//! registry.connect_all().await;
//!
//! let service = registry.wait_for_playback_service(Duration::from_secs(5)).await?;
//! ```
//!
//! [`ProviderConnector`]: bridge_traits::ProviderConnector

pub mod error;
pub mod registry;

pub use error::{RegistryError, Result};
pub use registry::{ConnectionState, ProviderConnection, ProviderRegistry, RegistryOptions};
