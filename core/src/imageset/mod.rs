pub mod cache;
pub mod model;
pub mod reader;

pub use cache::{ImagesetCache, LoadMode, Selection};
pub use model::{BeamModel, DetectorModel, Imageset, ReferenceGeometry};
pub use reader::ImageReader;
