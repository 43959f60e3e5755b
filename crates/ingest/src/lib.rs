pub mod error;
pub mod runtime;

pub use error::IngestError;
pub use runtime::{FlowControlConfig, JobHandle, PoolStats, WorkerPool};
