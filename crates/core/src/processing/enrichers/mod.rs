pub mod archive;
pub mod gcode;

pub use archive::ArchiveImageEnricher;
pub use gcode::{GCodeEnricher, parse_properties};
