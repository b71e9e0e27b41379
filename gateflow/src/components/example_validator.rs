//! Anomaly detection against the schema, and the halt policy that decides
//! whether anomalies stop the pipeline.

use super::schema_gen::{FeatureType, Schema};
use super::statistics_gen::{DatasetStatistics, ValueKind};
use crate::context::StageContext;
use crate::core::{ArtifactDraft, ArtifactType, StageOutput};
use crate::engine::{read_json, write_json};
use crate::errors::{EngineError, GateflowError};
use crate::pipeline::OutputSpec;
use crate::stages::Stage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::{info, warn};

/// How serious an anomaly is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Worth reporting.
    Warning,
    /// The data breaks the schema.
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// What to do when an anomaly of some severity is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyAction {
    /// Record it and let the pipeline continue.
    Propagate,
    /// Stop every stage guarded by the validator.
    Halt,
}

/// Maps severities to actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HaltPolicy {
    /// Severity to action; unlisted severities propagate.
    pub actions: BTreeMap<Severity, AnomalyAction>,
}

impl Default for HaltPolicy {
    fn default() -> Self {
        let mut actions = BTreeMap::new();
        actions.insert(Severity::Error, AnomalyAction::Halt);
        actions.insert(Severity::Warning, AnomalyAction::Propagate);
        Self { actions }
    }
}

impl HaltPolicy {
    /// A policy that never halts.
    #[must_use]
    pub fn propagate_all() -> Self {
        Self {
            actions: BTreeMap::new(),
        }
    }

    /// Overrides the action for one severity.
    #[must_use]
    pub fn with_action(mut self, severity: Severity, action: AnomalyAction) -> Self {
        self.actions.insert(severity, action);
        self
    }

    /// The action for a severity.
    #[must_use]
    pub fn action_for(&self, severity: Severity) -> AnomalyAction {
        self.actions
            .get(&severity)
            .copied()
            .unwrap_or(AnomalyAction::Propagate)
    }

    /// The first anomaly that calls for a halt, if any.
    #[must_use]
    pub fn halting<'a>(&self, anomalies: &'a Anomalies) -> Option<&'a Anomaly> {
        anomalies
            .anomalies
            .iter()
            .find(|a| self.action_for(a.severity) == AnomalyAction::Halt)
    }
}

/// The kind of mismatch between data and schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnomalyKind {
    /// A schema feature is absent from the data.
    MissingColumn,
    /// A column holds values of the wrong type.
    TypeMismatch {
        /// Schema type.
        expected: FeatureType,
        /// Observed kind.
        found: ValueKind,
    },
    /// A required column has missing values.
    MissingValues {
        /// How many.
        count: usize,
    },
    /// A column the schema does not know.
    UnexpectedColumn,
}

/// One detected anomaly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anomaly {
    /// The split it was found in.
    pub split: String,
    /// The column.
    pub column: String,
    /// What is wrong.
    #[serde(flatten)]
    pub kind: AnomalyKind,
    /// How serious it is.
    pub severity: Severity,
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}/{}: ", self.severity, self.split, self.column)?;
        match &self.kind {
            AnomalyKind::MissingColumn => write!(f, "column is missing"),
            AnomalyKind::TypeMismatch { expected, found } => {
                write!(f, "expected {expected:?} values, found {found:?}")
            }
            AnomalyKind::MissingValues { count } => write!(f, "{count} missing values in required column"),
            AnomalyKind::UnexpectedColumn => write!(f, "column is not in the schema"),
        }
    }
}

/// Every anomaly found in one validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anomalies {
    /// Anomalies sorted by split, then column.
    pub anomalies: Vec<Anomaly>,
}

impl Anomalies {
    /// File name inside an `Anomalies` artifact.
    pub const FILE_NAME: &'static str = "anomalies.json";

    /// Returns true when nothing was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.anomalies.is_empty()
    }

    /// Number of anomalies with the given severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.anomalies.iter().filter(|a| a.severity == severity).count()
    }

    /// Loads anomalies from an artifact directory.
    ///
    /// # Errors
    ///
    /// Fails if the payload is absent or malformed.
    pub fn load(dir: &Path) -> Result<Self, EngineError> {
        read_json(&dir.join(Self::FILE_NAME))
    }

    /// Writes anomalies into an artifact directory.
    ///
    /// # Errors
    ///
    /// Fails if the payload cannot be written.
    pub fn save(&self, dir: &Path) -> Result<(), EngineError> {
        write_json(&dir.join(Self::FILE_NAME), self)
    }
}

/// Compares every split's statistics with the schema.
#[must_use]
pub fn validate_statistics(statistics: &DatasetStatistics, schema: &Schema) -> Anomalies {
    let mut anomalies = Vec::new();
    for (split, stats) in &statistics.splits {
        let anomaly = |column: &str, kind: AnomalyKind, severity: Severity| Anomaly {
            split: split.clone(),
            column: column.to_string(),
            kind,
            severity,
        };

        for feature in &schema.features {
            let Some(column) = stats.column(&feature.name) else {
                anomalies.push(anomaly(&feature.name, AnomalyKind::MissingColumn, Severity::Error));
                continue;
            };
            let type_ok = match feature.feature_type {
                FeatureType::Numeric => matches!(column.kind, ValueKind::Numeric | ValueKind::Empty),
                FeatureType::Text => true,
            };
            if !type_ok {
                anomalies.push(anomaly(
                    &feature.name,
                    AnomalyKind::TypeMismatch {
                        expected: feature.feature_type,
                        found: column.kind,
                    },
                    Severity::Error,
                ));
            }
            if feature.required && column.missing > 0 {
                anomalies.push(anomaly(
                    &feature.name,
                    AnomalyKind::MissingValues { count: column.missing },
                    Severity::Error,
                ));
            }
        }

        for column in &stats.columns {
            if schema.feature(&column.name).is_none() {
                anomalies.push(anomaly(&column.name, AnomalyKind::UnexpectedColumn, Severity::Warning));
            }
        }
    }
    Anomalies { anomalies }
}

/// Validates statistics against the schema and applies a [`HaltPolicy`].
///
/// Always emits the `anomalies` output; halts when the policy says so.
#[derive(Debug, Clone, Default)]
pub struct ExampleValidator {
    policy: HaltPolicy,
}

impl ExampleValidator {
    /// The statistics input.
    pub const STATISTICS: &'static str = "statistics";
    /// The schema input.
    pub const SCHEMA: &'static str = "schema";
    /// The anomalies output.
    pub const ANOMALIES: &'static str = "anomalies";

    /// Creates a validator with the given halt policy.
    #[must_use]
    pub fn new(policy: HaltPolicy) -> Self {
        Self { policy }
    }

    /// The halt policy.
    #[must_use]
    pub fn policy(&self) -> &HaltPolicy {
        &self.policy
    }
}

#[async_trait]
impl Stage for ExampleValidator {
    fn kind(&self) -> &str {
        "ExampleValidator"
    }

    fn outputs(&self) -> BTreeMap<String, OutputSpec> {
        let mut outputs = BTreeMap::new();
        outputs.insert(Self::ANOMALIES.to_string(), OutputSpec::new(ArtifactType::Anomalies));
        outputs
    }

    fn config(&self) -> serde_json::Value {
        json!({"halt_policy": self.policy})
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, GateflowError> {
        let statistics = DatasetStatistics::load(&ctx.input(Self::STATISTICS)?.uri)?;
        let schema = Schema::load(&ctx.input(Self::SCHEMA)?.uri)?;
        let anomalies = validate_statistics(&statistics, &schema);

        let dir = ctx.create_output_dir(Self::ANOMALIES)?;
        anomalies.save(&dir)?;

        let halting = self.policy.halting(&anomalies);
        let draft = ArtifactDraft::new(dir)
            .with_property("anomaly_count", json!(anomalies.anomalies.len()))
            .with_property("error_count", json!(anomalies.count(Severity::Error)))
            .with_property("warning_count", json!(anomalies.count(Severity::Warning)))
            .with_property("halted", json!(halting.is_some()));
        let output = StageOutput::single(Self::ANOMALIES, draft);

        match halting {
            Some(anomaly) => {
                warn!(
                    stage = %ctx.stage_id(),
                    run_id = %ctx.run_id(),
                    anomalies = anomalies.anomalies.len(),
                    first = %anomaly,
                    "Validation found blocking anomalies"
                );
                Ok(output.halted(anomaly.to_string()))
            }
            None => {
                info!(
                    stage = %ctx.stage_id(),
                    run_id = %ctx.run_id(),
                    anomalies = anomalies.anomalies.len(),
                    "Validation passed"
                );
                Ok(output)
            }
        }
    }
}
