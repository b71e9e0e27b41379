//! Built-in transform modules.

use super::{Cell, Dataset, TransformModule};
use crate::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mean and spread of one numeric feature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColumnScale {
    /// Mean over the training split.
    pub mean: f64,
    /// Population standard deviation, 1.0 when the column is constant.
    pub std: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct ScalerParams {
    features: BTreeMap<String, ColumnScale>,
}

/// Standardizes numeric features to zero mean and unit variance.
///
/// Missing values become 0.0, i.e. the training mean.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardScaler;

impl StandardScaler {
    /// Registry name.
    pub const NAME: &'static str = "standard_scaler";
}

#[allow(clippy::cast_precision_loss)]
fn scale_of(values: &[f64]) -> ColumnScale {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std = var.sqrt();
    ColumnScale {
        mean,
        std: if std > 1e-12 { std } else { 1.0 },
    }
}

impl TransformModule for StandardScaler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn fit(&self, train: &Dataset, label_key: &str) -> Result<serde_json::Value, EngineError> {
        let mut params = ScalerParams::default();
        for feature in train.numeric_features(label_key) {
            let values: Vec<f64> = train
                .column(&feature)
                .into_iter()
                .flatten()
                .filter_map(Cell::as_f64)
                .collect();
            params.features.insert(feature, scale_of(&values));
        }
        Ok(serde_json::to_value(params)?)
    }

    fn apply(&self, params: &serde_json::Value, data: &Dataset, _label_key: &str) -> Result<Dataset, EngineError> {
        let params: ScalerParams = serde_json::from_value(params.clone())?;
        let scales: Vec<Option<ColumnScale>> = data
            .columns
            .iter()
            .map(|c| params.features.get(c).copied())
            .collect();

        let mut out = Dataset::new(data.columns.clone());
        for row in &data.rows {
            let scaled = row
                .iter()
                .zip(&scales)
                .zip(&data.columns)
                .map(|((cell, scale), column)| match (scale, cell) {
                    (None, _) => Ok(cell.clone()),
                    (Some(s), Cell::Number(v)) => Ok(Cell::Number((v - s.mean) / s.std)),
                    (Some(_), Cell::Missing) => Ok(Cell::Number(0.0)),
                    (Some(_), Cell::Text(t)) => Err(EngineError::Data(format!(
                        "non-numeric value '{t}' in scaled column '{column}'"
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()?;
            out.push_row(scaled)?;
        }
        Ok(out)
    }
}

/// Passes examples through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransform;

impl IdentityTransform {
    /// Registry name.
    pub const NAME: &'static str = "identity";
}

impl TransformModule for IdentityTransform {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn fit(&self, _train: &Dataset, _label_key: &str) -> Result<serde_json::Value, EngineError> {
        Ok(serde_json::json!({}))
    }

    fn apply(&self, _params: &serde_json::Value, data: &Dataset, _label_key: &str) -> Result<Dataset, EngineError> {
        Ok(data.clone())
    }
}
