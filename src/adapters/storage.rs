use crate::config::toml_config::{StorageBackend, StorageConfig};
use crate::domain::ports::ObjectStore;
use crate::utils::error::{Result, SiteGeoError};
use crate::utils::validation::validate_storage_key;
use std::path::{Path, PathBuf};

/// Objects stored as plain files under `root/<bucket>/<key>`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        if bucket.is_empty() || bucket.contains(['/', '\\']) || bucket == "." || bucket == ".." {
            return Err(SiteGeoError::InvalidStorageKey {
                key: key.to_string(),
                reason: format!("bucket '{}' is not a plain name", bucket),
            });
        }
        validate_storage_key(key)?;
        Ok(self.root.join(bucket).join(key))
    }
}

impl ObjectStore for LocalObjectStore {
    async fn object_size(&self, bucket: &str, key: &str) -> Result<u64> {
        let path = self.object_path(bucket, key)?;
        let metadata = tokio::fs::metadata(&path).await.map_err(|e| SiteGeoError::StorageError {
            message: format!("cannot stat {}/{}: {}", bucket, key, e),
        })?;
        if !metadata.is_file() {
            return Err(SiteGeoError::StorageError {
                message: format!("{}/{} is not a file", bucket, key),
            });
        }
        Ok(metadata.len())
    }

    async fn download_to(&self, bucket: &str, key: &str, dest: &Path) -> Result<u64> {
        let path = self.object_path(bucket, key)?;
        let copied = tokio::fs::copy(&path, dest).await.map_err(|e| SiteGeoError::StorageError {
            message: format!("cannot copy {}/{}: {}", bucket, key, e),
        })?;
        tracing::debug!("Copied {} bytes from {}", copied, path.display());
        Ok(copied)
    }
}

#[cfg(feature = "s3")]
pub use s3::S3ObjectStore;

#[cfg(feature = "s3")]
mod s3 {
    use super::*;
    use aws_sdk_s3::error::ProvideErrorMetadata;
    use aws_sdk_s3::Client as S3Client;
    use tokio::io::AsyncWriteExt;

    #[derive(Debug, Clone)]
    pub struct S3ObjectStore {
        client: S3Client,
    }

    impl S3ObjectStore {
        pub fn new(client: S3Client) -> Self {
            Self { client }
        }

        /// Builds a client from the default AWS credential chain.
        pub async fn connect(region: &str, endpoint: Option<&str>) -> Self {
            let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
                .region(aws_sdk_s3::config::Region::new(region.to_string()))
                .load()
                .await;
            let mut builder = aws_sdk_s3::config::Builder::from(&shared);
            if let Some(endpoint) = endpoint {
                builder = builder.endpoint_url(endpoint).force_path_style(true);
            }
            Self::new(S3Client::from_conf(builder.build()))
        }
    }

    fn storage_error(action: &str, bucket: &str, key: &str, e: impl ProvideErrorMetadata + std::fmt::Display) -> SiteGeoError {
        SiteGeoError::StorageError {
            message: format!(
                "{} s3://{}/{} failed: {} ({})",
                action,
                bucket,
                key,
                e.message().unwrap_or("no message"),
                e.code().unwrap_or("unknown")
            ),
        }
    }

    impl ObjectStore for S3ObjectStore {
        async fn object_size(&self, bucket: &str, key: &str) -> Result<u64> {
            let head = self
                .client
                .head_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| storage_error("HEAD", bucket, key, e))?;

            let length = head.content_length().unwrap_or_default();
            u64::try_from(length).map_err(|_| SiteGeoError::StorageError {
                message: format!("s3://{}/{} reported length {}", bucket, key, length),
            })
        }

        async fn download_to(&self, bucket: &str, key: &str, dest: &Path) -> Result<u64> {
            let object = self
                .client
                .get_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| storage_error("GET", bucket, key, e))?;

            let mut body = object.body.into_async_read();
            let mut file = tokio::fs::File::create(dest).await?;
            let written = tokio::io::copy(&mut body, &mut file).await?;
            file.flush().await?;
            tracing::debug!("Downloaded {} bytes from s3://{}/{}", written, bucket, key);
            Ok(written)
        }
    }
}

/// The backend selected by `[storage]`.
#[derive(Debug, Clone)]
pub enum ConfiguredStore {
    Local(LocalObjectStore),
    #[cfg(feature = "s3")]
    S3(S3ObjectStore),
}

impl ConfiguredStore {
    pub async fn from_config(config: &StorageConfig) -> Result<Self> {
        match config.backend {
            StorageBackend::Local => Ok(Self::Local(LocalObjectStore::new(&config.root))),
            #[cfg(feature = "s3")]
            StorageBackend::S3 => Ok(Self::S3(
                S3ObjectStore::connect(&config.region, config.endpoint.as_deref()).await,
            )),
            #[cfg(not(feature = "s3"))]
            StorageBackend::S3 => Err(SiteGeoError::ConfigError {
                message: "storage backend 's3' requires the s3 feature".to_string(),
            }),
        }
    }
}

impl ObjectStore for ConfiguredStore {
    async fn object_size(&self, bucket: &str, key: &str) -> Result<u64> {
        match self {
            Self::Local(store) => store.object_size(bucket, key).await,
            #[cfg(feature = "s3")]
            Self::S3(store) => store.object_size(bucket, key).await,
        }
    }

    async fn download_to(&self, bucket: &str, key: &str, dest: &Path) -> Result<u64> {
        match self {
            Self::Local(store) => store.download_to(bucket, key, dest).await,
            #[cfg(feature = "s3")]
            Self::S3(store) => store.download_to(bucket, key, dest).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_with(bucket: &str, key: &str, data: &[u8]) -> (TempDir, LocalObjectStore) {
        let root = TempDir::new().unwrap();
        let path = root.path().join(bucket).join(key);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, data).unwrap();
        let store = LocalObjectStore::new(root.path());
        (root, store)
    }

    #[tokio::test]
    async fn test_size_and_download() {
        let (_root, store) = store_with("uploads", "sites/a.kml", b"<kml/>");
        assert_eq!(store.object_size("uploads", "sites/a.kml").await.unwrap(), 6);

        let dest = TempDir::new().unwrap();
        let target = dest.path().join("copy.kml");
        let written = store.download_to("uploads", "sites/a.kml", &target).await.unwrap();
        assert_eq!(written, 6);
        assert_eq!(std::fs::read(&target).unwrap(), b"<kml/>");
    }

    #[test]
    fn test_missing_object_is_storage_error() {
        let (_root, store) = store_with("uploads", "a.kml", b"x");
        let err = tokio_test::block_on(store.object_size("uploads", "b.kml")).unwrap_err();
        assert_eq!(err.code(), "STORAGE_ERROR");
        assert!(!err.is_client_error());
    }

    #[tokio::test]
    async fn test_escaping_paths_are_rejected() {
        let (_root, store) = store_with("uploads", "a.kml", b"x");
        for (bucket, key) in [("uploads", "../uploads/a.kml"), ("..", "uploads/a.kml"), ("a/b", "a.kml")] {
            let err = store.object_size(bucket, key).await.unwrap_err();
            assert_eq!(err.code(), "INVALID_STORAGE_KEY");
        }
    }

    #[tokio::test]
    async fn test_configured_local_backend() {
        let (root, _) = store_with("uploads", "a.kml", b"<kml/>");
        let config = StorageConfig {
            root: root.path().to_string_lossy().into_owned(),
            ..StorageConfig::default()
        };
        let store = ConfiguredStore::from_config(&config).await.unwrap();
        assert_eq!(store.object_size("uploads", "a.kml").await.unwrap(), 6);
    }
}
