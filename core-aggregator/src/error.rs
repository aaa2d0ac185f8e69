use core_library::{EntityKind, EntityRef, LibraryError, ProviderId};
use core_plugins::RegistryError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregatorError {
    /// No loaded entity with this ref is known yet.
    #[error("{kind} not found: {entity_ref}")]
    NotFound { kind: EntityKind, entity_ref: EntityRef },

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(ProviderId),

    #[error("No provider is connected")]
    NoProviders,

    #[error("Provider {provider} rejected request: {message}")]
    RequestFailed { provider: ProviderId, message: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Library(#[from] LibraryError),
}

pub type Result<T> = std::result::Result<T, AggregatorError>;
