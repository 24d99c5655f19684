use thiserror::Error;

use crate::store::StoreError;

/// Business errors surfaced to callers. Everything here is a rejected
/// operation, never a crash; no state mutation precedes the rejection except
/// where the variant documents otherwise.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("user '{0}' is not an approved developer")]
    NotApprovedDeveloper(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("module '{0}' is inactive")]
    InactiveModule(String),

    /// Another registration attempt owns the module's build slot. Reported
    /// on CAS conflict, never retried silently.
    #[error("a registration is already in progress for module '{0}'")]
    RegistrationInProgress(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("version bound to tag '{0}' is not a dynamic service")]
    NotAService(String),

    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Scratch-space allocation failed; an operational fault, not retryable
    /// with the same registration id.
    #[error("could not allocate scratch workspace: {0}")]
    Scratch(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RegistryError {
    /// Distinguishes store-corruption faults from business rejections.
    pub fn is_integrity(&self) -> bool {
        matches!(self, RegistryError::Store(StoreError::Integrity(_)))
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;
