//! Failure modes of the canonical store and its replicas.

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("party '{0}' is not registered")]
    UnknownParty(String),
    #[error("site '{0}' is not registered")]
    UnknownSite(String),
    #[error("no object with key '{0}' is registered")]
    UnknownKey(String),
    #[error("id '{0}' is already registered for this kind")]
    DuplicateId(String),
    #[error("name '{0}' is already registered for this kind, under a different namespace")]
    DuplicateName(String),
    #[error("site '{0}' has a runner but no store")]
    RunnerNeedsStore(String),
    #[error("no site in this registry manages namespace '{0}'")]
    UnknownNamespace(String),
    #[error("identifier error: {0}")]
    Identifier(#[from] identifier::IdentifierError),
    /// Catch-all for a failure reaching a remote `UpdateSource` over HTTP.
    #[error("{0}")]
    Transport(String),
}
