#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("asset not found: {0}")]
    NotFound(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Storage(String),
}

pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

/// Returned when a backend kind string is not one of `local`, `git` or `bundle`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported backend kind: {0}")]
pub struct UnknownBackendKind(pub String);
