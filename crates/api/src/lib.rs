pub mod catalog;
pub mod error;
pub mod models;

// Re-export commonly used types
pub use catalog::{Catalog, CatalogEvent, CatalogEventKind, SearchQuery};
pub use error::{CatalogError, CatalogResult, UnknownBackendKind};
pub use models::*;
