pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use config::GeoConfig;

pub use core::{
    export::RingExporter, extract::FileGeometryExtractor, manual::ManualGeometryBuilder,
    resolver::SiteGeometryResolver, search::AreaSearch,
};
pub use utils::error::{Result, SiteGeoError};
