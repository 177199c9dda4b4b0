//! Modules d'export (GeoJSON, publication, archives)

pub mod archive;
pub mod geojson;
pub mod publish;

pub use geojson::WriteOptions;
pub use publish::{publish, PublishedFile};
