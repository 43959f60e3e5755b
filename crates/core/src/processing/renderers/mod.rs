pub mod gcode;
pub mod model;

pub use gcode::{EmbeddedThumbnail, GCodeRenderer, extract_thumbnails, largest_thumbnail};
pub use model::{Mesh, ModelRenderer, RenderSettings};
