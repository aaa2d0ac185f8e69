use core_library::ProviderId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Provider not registered: {0}")]
    UnknownProvider(ProviderId),

    #[error("Provider already registered: {0}")]
    DuplicateProvider(ProviderId),

    /// Registered but not currently connected. Scoped to this provider only.
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(ProviderId),

    #[error("Connection to provider {provider} failed: {message}")]
    ConnectionFailed { provider: ProviderId, message: String },

    #[error("Playback service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Registry is shutting down")]
    ShuttingDown,
}

pub type Result<T> = std::result::Result<T, RegistryError>;
