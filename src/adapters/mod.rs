pub mod reference_areas;
pub mod storage;

pub use reference_areas::GeoJsonAreaStore;
#[cfg(feature = "s3")]
pub use storage::S3ObjectStore;
pub use storage::{ConfiguredStore, LocalObjectStore};
