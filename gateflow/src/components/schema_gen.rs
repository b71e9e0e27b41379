//! Schema inference and import.

use super::statistics_gen::{DatasetStatistics, SplitStatistics, ValueKind};
use crate::context::StageContext;
use crate::core::{ArtifactDraft, ArtifactType, StageOutput};
use crate::engine::{read_json, write_json};
use crate::errors::{EngineError, GateflowError};
use crate::pipeline::OutputSpec;
use crate::stages::Stage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Expected type of a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureType {
    /// Numbers only.
    Numeric,
    /// Free text or categories.
    Text,
}

/// Expectations about one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeatureSchema {
    /// Column name.
    pub name: String,
    /// Expected value type.
    #[serde(rename = "type")]
    pub feature_type: FeatureType,
    /// Whether every example must carry a value.
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

/// The columns examples are expected to have.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Schema {
    /// Features in column order.
    pub features: Vec<FeatureSchema>,
}

impl Schema {
    /// File name inside a `Schema` artifact.
    pub const FILE_NAME: &'static str = "schema.json";

    /// Infers a schema from training statistics.
    ///
    /// Columns with no value at all are left out; a column with any text is
    /// typed as text; a column is required when it had no missing value.
    #[must_use]
    pub fn infer(train: &SplitStatistics) -> Self {
        let features = train
            .columns
            .iter()
            .filter_map(|column| {
                let feature_type = match column.kind {
                    ValueKind::Empty => return None,
                    ValueKind::Numeric => FeatureType::Numeric,
                    ValueKind::Text | ValueKind::Mixed => FeatureType::Text,
                };
                Some(FeatureSchema {
                    name: column.name.clone(),
                    feature_type,
                    required: column.missing == 0,
                })
            })
            .collect();
        Self { features }
    }

    /// Looks up a feature.
    #[must_use]
    pub fn feature(&self, name: &str) -> Option<&FeatureSchema> {
        self.features.iter().find(|f| f.name == name)
    }

    /// Loads a schema from an artifact directory.
    ///
    /// # Errors
    ///
    /// Fails if the payload is absent or malformed.
    pub fn load(dir: &Path) -> Result<Self, EngineError> {
        Self::load_file(&dir.join(Self::FILE_NAME))
    }

    /// Loads a schema file.
    ///
    /// # Errors
    ///
    /// Fails if the file is absent or malformed.
    pub fn load_file(path: &Path) -> Result<Self, EngineError> {
        read_json(path)
    }

    /// Writes the schema into an artifact directory.
    ///
    /// # Errors
    ///
    /// Fails if the payload cannot be written.
    pub fn save(&self, dir: &Path) -> Result<(), EngineError> {
        write_json(&dir.join(Self::FILE_NAME), self)
    }
}

/// Produces the schema, either inferred from the `statistics` input or
/// imported from a curated file.
#[derive(Debug, Clone, Default)]
pub struct SchemaGen {
    schema_path: Option<PathBuf>,
}

impl SchemaGen {
    /// The statistics input (inference mode only).
    pub const STATISTICS: &'static str = "statistics";
    /// The schema output.
    pub const SCHEMA: &'static str = "schema";

    /// Infers the schema from statistics.
    #[must_use]
    pub fn infer() -> Self {
        Self { schema_path: None }
    }

    /// Imports a fixed schema instead of inferring one.
    #[must_use]
    pub fn import(schema_path: impl Into<PathBuf>) -> Self {
        Self {
            schema_path: Some(schema_path.into()),
        }
    }

    /// Returns true when the schema is imported.
    #[must_use]
    pub fn is_import(&self) -> bool {
        self.schema_path.is_some()
    }
}

#[async_trait]
impl Stage for SchemaGen {
    fn kind(&self) -> &str {
        if self.is_import() {
            "ImportSchemaGen"
        } else {
            "SchemaGen"
        }
    }

    fn outputs(&self) -> BTreeMap<String, OutputSpec> {
        let mut outputs = BTreeMap::new();
        outputs.insert(Self::SCHEMA.to_string(), OutputSpec::new(ArtifactType::Schema));
        outputs
    }

    fn config(&self) -> serde_json::Value {
        json!({"schema_path": self.schema_path})
    }

    fn fingerprint(&self) -> Result<Option<String>, GateflowError> {
        let Some(path) = &self.schema_path else {
            return Ok(None);
        };
        let mut hasher = Sha256::new();
        hasher.update(std::fs::read(path)?);
        Ok(Some(hex::encode(hasher.finalize())))
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, GateflowError> {
        let schema = match &self.schema_path {
            Some(path) => Schema::load_file(path)?,
            None => {
                let statistics = DatasetStatistics::load(&ctx.input(Self::STATISTICS)?.uri)?;
                let train = statistics
                    .split("train")
                    .ok_or_else(|| EngineError::Data("statistics have no train split".to_string()))?;
                Schema::infer(train)
            }
        };

        let dir = ctx.create_output_dir(Self::SCHEMA)?;
        schema.save(&dir)?;
        info!(
            stage = %ctx.stage_id(),
            run_id = %ctx.run_id(),
            features = schema.features.len(),
            imported = self.is_import(),
            "Schema ready"
        );

        Ok(StageOutput::single(
            Self::SCHEMA,
            ArtifactDraft::new(dir)
                .with_property("feature_count", json!(schema.features.len()))
                .with_property("imported", json!(self.is_import())),
        ))
    }
}
