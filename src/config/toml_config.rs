use crate::adapters::reference_areas::{GeoJsonAreaStore, DEFAULT_NAME_PROPERTY};
use crate::core::buffer::{BufferOptions, DEFAULT_BUFFER_METERS};
use crate::core::circle::{CircleOptions, DEFAULT_CIRCLE_STEPS, MIN_CIRCLE_STEPS};
use crate::core::export::DEFAULT_EXPORT_WKID;
use crate::core::extract::{ExtractorSettings, DEFAULT_MAX_FILE_BYTES};
use crate::core::manual::ManualGeometryBuilder;
use crate::core::sandbox::{ParseLimits, WorkerCommand, DEFAULT_PARSE_MEMORY_BYTES};
use crate::core::validator::DEFAULT_MAX_FEATURES;
use crate::utils::error::{Result, SiteGeoError};
use crate::utils::validation::{
    validate_non_empty_string, validate_path, validate_positive_number, validate_range,
    validate_url, Validate,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoConfig {
    pub limits: LimitsConfig,
    pub geometry: GeometryConfig,
    pub export: ExportConfig,
    pub storage: StorageConfig,
    pub worker: WorkerConfig,
    pub datasets: Vec<DatasetConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub parse_timeout_ms: u64,
    pub parse_memory_bytes: u64,
    pub max_file_bytes: u64,
    pub max_features: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            parse_timeout_ms: 30_000,
            parse_memory_bytes: DEFAULT_PARSE_MEMORY_BYTES,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            max_features: DEFAULT_MAX_FEATURES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryConfig {
    pub circle_steps: usize,
    pub buffer_meters: f64,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            circle_steps: DEFAULT_CIRCLE_STEPS,
            buffer_meters: DEFAULT_BUFFER_METERS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub wkid: u32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            wkid: DEFAULT_EXPORT_WKID,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Local,
    S3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root directory of the local backend.
    pub root: String,
    pub region: String,
    pub endpoint: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            root: "./storage".to_string(),
            region: "eu-west-2".to_string(),
            endpoint: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub program: Option<PathBuf>,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub name: String,
    pub path: PathBuf,
    pub name_property: Option<String>,
}

impl GeoConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| SiteGeoError::ConfigError {
            message: format!("cannot read {}: {}", path.as_ref().display(), e),
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses configuration from TOML text, substituting `${VAR}` references first.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| SiteGeoError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Replaces `${VAR}` with the environment value; unset variables stay as written.
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = regex::Regex::new(r"\$\{([^}]+)\}").map_err(|e| SiteGeoError::ConfigError {
            message: e.to_string(),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    /// Checks that every limit and setting is usable.
    pub fn validate_config(&self) -> Result<()> {
        validate_positive_number("limits.parse_timeout_ms", self.limits.parse_timeout_ms, 1)?;
        validate_positive_number("limits.parse_memory_bytes", self.limits.parse_memory_bytes, 1024 * 1024)?;
        validate_positive_number("limits.max_file_bytes", self.limits.max_file_bytes, 1)?;
        validate_positive_number("limits.max_features", self.limits.max_features as u64, 1)?;

        validate_range("geometry.circle_steps", self.geometry.circle_steps, MIN_CIRCLE_STEPS, 3600)?;
        if !(self.geometry.buffer_meters > 0.0) || !self.geometry.buffer_meters.is_finite() {
            return Err(SiteGeoError::InvalidConfigValueError {
                field: "geometry.buffer_meters".to_string(),
                value: self.geometry.buffer_meters.to_string(),
                reason: "Value must be a positive distance".to_string(),
            });
        }

        match self.storage.backend {
            StorageBackend::Local => validate_path("storage.root", &self.storage.root)?,
            StorageBackend::S3 => validate_aws_region("storage.region", &self.storage.region)?,
        }
        if let Some(endpoint) = &self.storage.endpoint {
            validate_url("storage.endpoint", endpoint)?;
        }

        for (index, dataset) in self.datasets.iter().enumerate() {
            validate_non_empty_string(&format!("datasets[{}].name", index), &dataset.name)?;
            validate_path(
                &format!("datasets[{}].path", index),
                &dataset.path.to_string_lossy(),
            )?;
        }

        Ok(())
    }

    pub fn circle_options(&self) -> CircleOptions {
        CircleOptions {
            steps: self.geometry.circle_steps,
        }
    }

    pub fn buffer_options(&self) -> BufferOptions {
        BufferOptions {
            distance_m: self.geometry.buffer_meters,
            ..BufferOptions::default()
        }
    }

    pub fn manual_builder(&self) -> ManualGeometryBuilder {
        ManualGeometryBuilder::new(self.circle_options())
    }

    pub fn parse_limits(&self) -> ParseLimits {
        ParseLimits {
            timeout: Duration::from_millis(self.limits.parse_timeout_ms),
            memory_bytes: self.limits.parse_memory_bytes,
        }
    }

    /// The configured worker, or this executable in worker mode.
    pub fn worker_command(&self) -> Result<WorkerCommand> {
        match &self.worker.program {
            Some(program) => Ok(WorkerCommand::new(program, self.worker.args.clone())),
            None => WorkerCommand::current_exe(),
        }
    }

    pub fn extractor_settings(&self) -> Result<ExtractorSettings> {
        let mut settings = ExtractorSettings::new(self.worker_command()?);
        settings.max_file_bytes = self.limits.max_file_bytes;
        settings.max_features = self.limits.max_features;
        settings.parse = self.parse_limits();
        Ok(settings)
    }

    /// Loads every configured dataset into one in-memory store.
    pub fn load_reference_areas(&self) -> Result<GeoJsonAreaStore> {
        let mut store = GeoJsonAreaStore::new();
        for dataset in &self.datasets {
            let property = dataset.name_property.as_deref().unwrap_or(DEFAULT_NAME_PROPERTY);
            store.load_file(&dataset.name, &dataset.path, property)?;
        }
        Ok(store)
    }
}

impl Validate for GeoConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

fn validate_aws_region(field_name: &str, region: &str) -> Result<()> {
    validate_non_empty_string(field_name, region)?;

    if !region
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(SiteGeoError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: region.to_string(),
            reason: "AWS region can only contain lowercase letters, numbers, and hyphens"
                .to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = GeoConfig::from_toml_str("").unwrap();

        assert_eq!(config.limits.parse_timeout_ms, 30_000);
        assert_eq!(config.limits.parse_memory_bytes, 524_288_000);
        assert_eq!(config.geometry.circle_steps, 64);
        assert_eq!(config.geometry.buffer_meters, 50.0);
        assert_eq!(config.export.wkid, 4258);
        assert_eq!(config.storage.backend, StorageBackend::Local);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let toml_content = r#"
[limits]
parse_timeout_ms = 5000
max_features = 50

[geometry]
circle_steps = 32
buffer_meters = 25.0

[export]
wkid = 27700

[storage]
backend = "s3"
region = "eu-west-2"
endpoint = "http://localhost:9000"

[worker]
program = "/usr/local/bin/sitegeo"
args = ["parse-worker"]

[[datasets]]
name = "marine-plan-areas"
path = "data/marine.geojson"
name_property = "AREA_NAME"
"#;

        let config = GeoConfig::from_toml_str(toml_content).unwrap();

        assert_eq!(config.parse_limits().timeout, Duration::from_millis(5000));
        assert_eq!(config.circle_options().steps, 32);
        assert_eq!(config.buffer_options().distance_m, 25.0);
        assert_eq!(config.export.wkid, 27700);
        assert_eq!(config.storage.backend, StorageBackend::S3);
        assert_eq!(config.datasets[0].name_property.as_deref(), Some("AREA_NAME"));

        let worker = config.worker_command().unwrap();
        assert_eq!(worker.program, PathBuf::from("/usr/local/bin/sitegeo"));
        assert_eq!(worker.args, vec!["parse-worker".to_string()]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("SITEGEO_TEST_ENDPOINT", "https://s3.example.com");

        let toml_content = r#"
[storage]
backend = "s3"
endpoint = "${SITEGEO_TEST_ENDPOINT}"
"#;

        let config = GeoConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.storage.endpoint.as_deref(), Some("https://s3.example.com"));

        std::env::remove_var("SITEGEO_TEST_ENDPOINT");
    }

    #[test]
    fn test_config_validation() {
        let cases = [
            "[geometry]\ncircle_steps = 2",
            "[geometry]\nbuffer_meters = -1.0",
            "[limits]\nparse_timeout_ms = 0",
            "[storage]\nendpoint = \"not a url\"",
            "[storage]\nbackend = \"s3\"\nregion = \"EU West\"",
            "[[datasets]]\nname = \"\"\npath = \"a.geojson\"",
        ];
        for case in cases {
            let config = GeoConfig::from_toml_str(case).unwrap();
            assert!(config.validate().is_err(), "accepted: {}", case);
        }
    }

    #[test]
    fn test_unknown_backend_is_parse_error() {
        let err = GeoConfig::from_toml_str("[storage]\nbackend = \"ftp\"").unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[limits]\nmax_file_bytes = 1024\n")
            .unwrap();

        let config = GeoConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.extractor_settings().unwrap().max_file_bytes, 1024);
    }

    #[test]
    fn test_load_reference_areas() {
        let mut dataset = NamedTempFile::new().unwrap();
        dataset
            .write_all(
                br#"{"type": "FeatureCollection", "features": [{"type": "Feature",
                "properties": {"name": "Bay"},
                "geometry": {"type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]}}]}"#,
            )
            .unwrap();

        let config = GeoConfig {
            datasets: vec![DatasetConfig {
                name: "bays".to_string(),
                path: dataset.path().to_path_buf(),
                name_property: None,
            }],
            ..GeoConfig::default()
        };
        let store = config.load_reference_areas().unwrap();
        assert_eq!(store.dataset_names(), vec!["bays"]);
    }
}
