use stockroom_api::{CatalogError, UnknownBackendKind};
use stockroom_ingest::IngestError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StockroomError {
    #[error("unsupported backend kind: {0}")]
    UnsupportedBackendKind(String),
    #[error("unsupported bundle extension: {0}")]
    UnsupportedBundleExtension(String),
    #[error("no reader for archive format: {0}")]
    UnsupportedArchiveFormat(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("operation not supported on {backend}: {op}")]
    UnsupportedOperation { backend: String, op: &'static str },
    #[error("consistency error: {0}")]
    Consistency(String),
    #[error("transient I/O error: {0}")]
    TransientIo(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("I/O error: {0}")]
    Io(std::io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("git error: {0}")]
    Git(#[from] git2::Error),
    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("ingest error: {0}")]
    Ingest(#[from] IngestError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("cancelled")]
    Cancelled,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for StockroomError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            StockroomError::NotFound(err.to_string())
        } else {
            StockroomError::Io(err)
        }
    }
}

impl From<UnknownBackendKind> for StockroomError {
    fn from(err: UnknownBackendKind) -> Self {
        StockroomError::UnsupportedBackendKind(err.0)
    }
}

impl StockroomError {
    pub fn unsupported(backend: &str, op: &'static str) -> Self {
        StockroomError::UnsupportedOperation {
            backend: backend.to_string(),
            op,
        }
    }
}

pub type Result<T> = std::result::Result<T, StockroomError>;
