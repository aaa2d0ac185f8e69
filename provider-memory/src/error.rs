//! Error types for the in-memory provider

use bridge_traits::error::BridgeError;
use core_library::EntityKind;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryProviderError {
    /// Requested entity is not in the catalog
    #[error("{kind} '{identifier}' is not in the catalog")]
    NotInCatalog { kind: EntityKind, identifier: String },

    /// Simulated start-up failure
    #[error("Provider is still starting (attempt {attempt})")]
    Starting { attempt: u32 },
}

impl From<MemoryProviderError> for BridgeError {
    fn from(err: MemoryProviderError) -> Self {
        match err {
            MemoryProviderError::NotInCatalog { .. } => BridgeError::NotFound(err.to_string()),
            MemoryProviderError::Starting { .. } => BridgeError::NotAvailable(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, MemoryProviderError>;
