pub mod catalog;
pub mod config;
pub mod discovery;
pub mod error;
pub mod fs;
pub mod library;
pub mod logging;
pub mod processing;

pub use catalog::MemoryCatalog;
pub use config::{BackendConfig, Config, LibraryConfig, RenderConfig};
pub use discovery::{Discoverer, DiscoveryOptions, DiscoveryReport};
pub use error::{Result, StockroomError};
pub use fs::{BundleFs, FsEntry, FsRegistry, FsStat, GitFs, LibFs, LocalFs};
pub use library::{BackendFailure, Library, LibraryBuilder, ScanSummary};
pub use processing::{PipelineSummary, ProcessContext, ProcessReport, Processor, ProcessorSet, TrackState};
