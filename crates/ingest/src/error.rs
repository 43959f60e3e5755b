use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IngestError {
    #[error("worker pool cancelled")]
    Cancelled,
    #[error("worker pool closed: {0}")]
    Closed(String),
    #[error("job join failure: {0}")]
    Join(String),
    #[error("job failed: {0}")]
    Job(String),
}
