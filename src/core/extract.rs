use crate::core::job::ParseJob;
use crate::core::sandbox::{run_isolated, ParseLimits, WorkerCommand};
use crate::core::validator::{validate, ValidationLimits, DEFAULT_MAX_FEATURES};
use crate::domain::model::{FileFormat, FileRef};
use crate::domain::ports::ObjectStore;
use crate::utils::error::{Result, SiteGeoError};
use crate::utils::validation::validate_storage_key;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const DEFAULT_MAX_FILE_BYTES: u64 = 52_428_800;

#[derive(Debug, Clone)]
pub struct ExtractorSettings {
    pub max_file_bytes: u64,
    pub max_features: usize,
    pub parse: ParseLimits,
    pub worker: WorkerCommand,
    /// Parent directory for per-call workspaces; the system temp dir if unset.
    pub temp_root: Option<PathBuf>,
}

impl ExtractorSettings {
    pub fn new(worker: WorkerCommand) -> Self {
        Self {
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            max_features: DEFAULT_MAX_FEATURES,
            parse: ParseLimits::default(),
            worker,
            temp_root: None,
        }
    }
}

/// Turns an uploaded file into a validated GeoJSON FeatureCollection.
///
/// Each call owns a private temporary workspace that is removed on every
/// exit path. Parsing itself happens in a worker process, see
/// [`crate::core::sandbox`].
pub struct FileGeometryExtractor<S: ObjectStore> {
    store: S,
    settings: ExtractorSettings,
}

impl<S: ObjectStore> FileGeometryExtractor<S> {
    pub fn new(store: S, settings: ExtractorSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &ExtractorSettings {
        &self.settings
    }

    pub async fn extract(&self, file: &FileRef) -> Result<serde_json::Value> {
        if file.storage_bucket.trim().is_empty() {
            return Err(SiteGeoError::InvalidStorageKey {
                key: file.storage_key.clone(),
                reason: "storage bucket is empty".to_string(),
            });
        }
        validate_storage_key(&file.storage_key)?;
        let format: FileFormat = file.declared_format.parse()?;

        let workspace = self.create_workspace()?;
        tracing::debug!(
            "Extracting {}/{} as {} in {}",
            file.storage_bucket,
            file.storage_key,
            format,
            workspace.path().display()
        );

        let result = self.extract_in(workspace.path(), file, format).await;

        let workspace_path = workspace.path().to_path_buf();
        if let Err(e) = workspace.close() {
            tracing::warn!(
                "Failed to remove extraction workspace {}: {}",
                workspace_path.display(),
                e
            );
        }

        match &result {
            Ok(_) => tracing::info!("Extracted geometry from {}", file.storage_key),
            Err(e) if e.is_client_error() => {
                tracing::info!("Rejected upload {}: {}", file.storage_key, e)
            }
            Err(e) => tracing::error!("Extraction of {} failed: {}", file.storage_key, e),
        }
        result
    }

    fn create_workspace(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("sitegeo-");
        let dir = match &self.settings.temp_root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        Ok(dir)
    }

    async fn extract_in(
        &self,
        workspace: &Path,
        file: &FileRef,
        format: FileFormat,
    ) -> Result<serde_json::Value> {
        let limit = self.settings.max_file_bytes;
        let size = self
            .store
            .object_size(&file.storage_bucket, &file.storage_key)
            .await?;
        if size > limit {
            return Err(SiteGeoError::FileTooLarge { size, limit });
        }

        let input = workspace.join(match format {
            FileFormat::Kml => "upload.kml",
            FileFormat::Shapefile => "upload.zip",
        });
        let written = self
            .store
            .download_to(&file.storage_bucket, &file.storage_key, &input)
            .await?;
        if written > limit {
            return Err(SiteGeoError::FileTooLarge {
                size: written,
                limit,
            });
        }

        let workdir = workspace.join("work");
        tokio::fs::create_dir(&workdir).await?;

        let mut job = ParseJob::submit(input, format);
        let raw = run_isolated(&mut job, &workdir, &self.settings.worker, &self.settings.parse).await?;

        let limits = ValidationLimits {
            max_features: self.settings.max_features,
            max_payload_bytes: self.settings.parse.memory_bytes,
        };
        validate(&raw, &limits)
    }
}
