use crate::utils::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// Where uploaded site files live.
pub trait ObjectStore: Send + Sync {
    /// Size of the stored object in bytes, looked up without transferring it.
    fn object_size(
        &self,
        bucket: &str,
        key: &str,
    ) -> impl std::future::Future<Output = Result<u64>> + Send;

    /// Copies the object to `dest`, returning the number of bytes written.
    fn download_to(
        &self,
        bucket: &str,
        key: &str,
        dest: &Path,
    ) -> impl std::future::Future<Output = Result<u64>> + Send;
}

/// Read-only access to named collections of `{name, geometry}` areas.
#[async_trait]
pub trait ReferenceAreaStore: Send + Sync {
    async fn is_empty(&self, dataset: &str) -> Result<bool>;

    /// Names of every area in `dataset` whose geometry intersects `geometry`.
    async fn intersecting_names(
        &self,
        dataset: &str,
        geometry: &geo::Geometry<f64>,
    ) -> Result<Vec<String>>;
}
