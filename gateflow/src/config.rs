//! Typed configuration of the fraud-detection pipeline.
//!
//! One immutable [`PipelineConfig`] is loaded up front and passed to
//! [`create_pipeline`](crate::fraud_detection::create_pipeline).

use crate::components::HaltPolicy;
use crate::errors::ConfigError;
use crate::evaluator::EvalConfig;
use crate::metadata::MetadataConnection;
use crate::pipeline::PipelineSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name of the default metadata store under the pipeline root.
pub const METADATA_FILE: &str = "metadata.json";

fn default_transform_module() -> String {
    "standard_scaler".to_string()
}

fn default_trainer_module() -> String {
    "logistic_regression".to_string()
}

fn default_batch_size() -> usize {
    32
}

fn default_enable_cache() -> bool {
    true
}

/// Everything needed to assemble and run the fraud-detection pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Pipeline name; scopes runs, caching and baseline resolution.
    pub pipeline_name: String,
    /// Root directory for stage payloads.
    pub pipeline_root: PathBuf,
    /// CSV file or directory of CSV files.
    pub data_location: PathBuf,
    /// Registered transform module name.
    #[serde(default = "default_transform_module")]
    pub transform_module: String,
    /// Registered trainer module name.
    #[serde(default = "default_trainer_module")]
    pub trainer_module: String,
    /// Metadata store connection. Required: history, caching and baseline
    /// resolution all live in it.
    pub metadata_connection: MetadataConnection,
    /// Examples per training step.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Nominal dataset size used to derive the number of training steps.
    pub dataset_size: usize,
    /// Serving directory the pusher deploys into.
    pub serving_model_dir: PathBuf,
    /// Whether stages may reuse earlier outputs.
    #[serde(default = "default_enable_cache")]
    pub enable_cache: bool,
    /// Evaluation and gating configuration.
    #[serde(default)]
    pub eval: EvalConfig,
    /// Curated schema to import instead of inferring one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_path: Option<PathBuf>,
    /// How anomalies map to halts.
    #[serde(default)]
    pub halt_policy: HaltPolicy,
}

impl PipelineConfig {
    /// Creates a config with defaults for every optional field.
    ///
    /// Metadata goes to `metadata.json` under `pipeline_root`.
    #[must_use]
    pub fn new(
        pipeline_name: impl Into<String>,
        pipeline_root: impl Into<PathBuf>,
        data_location: impl Into<PathBuf>,
        serving_model_dir: impl Into<PathBuf>,
        dataset_size: usize,
    ) -> Self {
        let pipeline_root = pipeline_root.into();
        Self {
            pipeline_name: pipeline_name.into(),
            metadata_connection: MetadataConnection::File {
                path: pipeline_root.join(METADATA_FILE),
            },
            pipeline_root,
            data_location: data_location.into(),
            transform_module: default_transform_module(),
            trainer_module: default_trainer_module(),
            batch_size: default_batch_size(),
            dataset_size,
            serving_model_dir: serving_model_dir.into(),
            enable_cache: default_enable_cache(),
            eval: EvalConfig::default(),
            schema_path: None,
            halt_policy: HaltPolicy::default(),
        }
    }

    /// Reads and validates a JSON config file.
    ///
    /// # Errors
    ///
    /// Fails if the file is unreadable, malformed, has unknown keys, or
    /// holds an invalid value.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value domains serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline_name.trim().is_empty() {
            return Err(ConfigError::invalid("pipeline_name", "must not be empty"));
        }
        if self.transform_module.trim().is_empty() {
            return Err(ConfigError::invalid("transform_module", "must not be empty"));
        }
        if self.trainer_module.trim().is_empty() {
            return Err(ConfigError::invalid("trainer_module", "must not be empty"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::invalid("batch_size", "must be positive"));
        }
        if self.dataset_size == 0 {
            return Err(ConfigError::invalid("dataset_size", "must be positive"));
        }
        self.eval.validate()
    }

    /// Pipeline-wide settings derived from this config.
    #[must_use]
    pub fn settings(&self) -> PipelineSettings {
        PipelineSettings::new(self.pipeline_name.clone(), self.pipeline_root.clone())
            .with_metadata(self.metadata_connection.clone())
            .with_cache(self.enable_cache)
    }
}
