//! Descriptive statistics over example splits.

use crate::context::StageContext;
use crate::core::{ArtifactDraft, ArtifactType, StageOutput};
use crate::engine::{read_json, write_json, Cell, Dataset, ExampleSplits};
use crate::errors::{EngineError, GateflowError};
use crate::pipeline::OutputSpec;
use crate::stages::Stage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::info;

/// What kind of values a column holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// Every present value is a number.
    Numeric,
    /// Every present value is text.
    Text,
    /// Both numbers and text.
    Mixed,
    /// No present value.
    Empty,
}

/// Summary of the numbers in a column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumericSummary {
    /// Smallest value.
    pub min: f64,
    /// Largest value.
    pub max: f64,
    /// Mean value.
    pub mean: f64,
    /// Population standard deviation.
    pub std: f64,
}

/// Statistics of one column in one split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStatistics {
    /// Column name.
    pub name: String,
    /// Kind of the present values.
    pub kind: ValueKind,
    /// Non-missing values.
    pub count: usize,
    /// Missing values.
    pub missing: usize,
    /// Present when at least one value is numeric.
    pub numeric: Option<NumericSummary>,
    /// Distinct text values.
    #[serde(default)]
    pub distinct_text: BTreeSet<String>,
}

/// Statistics of one split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitStatistics {
    /// Number of examples.
    pub num_examples: usize,
    /// Per-column statistics in column order.
    pub columns: Vec<ColumnStatistics>,
}

impl SplitStatistics {
    /// Computes statistics for a dataset.
    #[must_use]
    pub fn compute(data: &Dataset) -> Self {
        let columns = data
            .columns
            .iter()
            .map(|name| column_statistics(name, data.column(name).into_iter().flatten()))
            .collect();
        Self {
            num_examples: data.len(),
            columns,
        }
    }

    /// Looks up one column.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnStatistics> {
        self.columns.iter().find(|c| c.name == name)
    }
}

#[allow(clippy::cast_precision_loss)]
fn column_statistics<'a>(name: &str, cells: impl Iterator<Item = &'a Cell>) -> ColumnStatistics {
    let mut numbers = Vec::new();
    let mut distinct_text = BTreeSet::new();
    let mut missing = 0;
    let mut text = 0;
    for cell in cells {
        match cell {
            Cell::Number(v) => numbers.push(*v),
            Cell::Text(t) => {
                text += 1;
                distinct_text.insert(t.clone());
            }
            Cell::Missing => missing += 1,
        }
    }

    let kind = match (numbers.is_empty(), text == 0) {
        (true, true) => ValueKind::Empty,
        (false, true) => ValueKind::Numeric,
        (true, false) => ValueKind::Text,
        (false, false) => ValueKind::Mixed,
    };
    let numeric = (!numbers.is_empty()).then(|| {
        let n = numbers.len() as f64;
        let mean = numbers.iter().sum::<f64>() / n;
        let var = numbers.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        NumericSummary {
            min: numbers.iter().copied().fold(f64::INFINITY, f64::min),
            max: numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            mean,
            std: var.sqrt(),
        }
    });

    ColumnStatistics {
        name: name.to_string(),
        kind,
        count: numbers.len() + text,
        missing,
        numeric,
        distinct_text,
    }
}

/// Statistics for every split of an `Examples` artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetStatistics {
    /// Split name to statistics.
    pub splits: BTreeMap<String, SplitStatistics>,
}

impl DatasetStatistics {
    /// File name inside a `Statistics` artifact.
    pub const FILE_NAME: &'static str = "statistics.json";

    /// Computes statistics for both splits.
    #[must_use]
    pub fn compute(examples: &ExampleSplits) -> Self {
        let splits = ExampleSplits::SPLITS
            .iter()
            .filter_map(|name| examples.split(name).map(|d| ((*name).to_string(), SplitStatistics::compute(d))))
            .collect();
        Self { splits }
    }

    /// Statistics of one split.
    #[must_use]
    pub fn split(&self, name: &str) -> Option<&SplitStatistics> {
        self.splits.get(name)
    }

    /// Loads statistics from an artifact directory.
    ///
    /// # Errors
    ///
    /// Fails if the payload is absent or malformed.
    pub fn load(dir: &Path) -> Result<Self, EngineError> {
        read_json(&dir.join(Self::FILE_NAME))
    }

    /// Writes statistics into an artifact directory.
    ///
    /// # Errors
    ///
    /// Fails if the payload cannot be written.
    pub fn save(&self, dir: &Path) -> Result<(), EngineError> {
        write_json(&dir.join(Self::FILE_NAME), self)
    }
}

/// Computes [`DatasetStatistics`] over the `examples` input.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatisticsGen;

impl StatisticsGen {
    /// The examples input.
    pub const EXAMPLES: &'static str = "examples";
    /// The statistics output.
    pub const STATISTICS: &'static str = "statistics";
}

#[async_trait]
impl Stage for StatisticsGen {
    fn kind(&self) -> &str {
        "StatisticsGen"
    }

    fn outputs(&self) -> BTreeMap<String, OutputSpec> {
        let mut outputs = BTreeMap::new();
        outputs.insert(Self::STATISTICS.to_string(), OutputSpec::new(ArtifactType::Statistics));
        outputs
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, GateflowError> {
        let examples = ExampleSplits::load(&ctx.input(Self::EXAMPLES)?.uri)?;
        let statistics = DatasetStatistics::compute(&examples);

        let dir = ctx.create_output_dir(Self::STATISTICS)?;
        statistics.save(&dir)?;
        info!(stage = %ctx.stage_id(), run_id = %ctx.run_id(), "Statistics computed");

        let num_examples: BTreeMap<&str, usize> = statistics
            .splits
            .iter()
            .map(|(name, s)| (name.as_str(), s.num_examples))
            .collect();
        Ok(StageOutput::single(
            Self::STATISTICS,
            ArtifactDraft::new(dir).with_property("num_examples", json!(num_examples)),
        ))
    }
}
