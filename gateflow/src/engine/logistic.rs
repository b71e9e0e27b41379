//! Logistic regression trained by seeded mini-batch gradient descent.

use super::{Cell, Dataset, ModelScorer, TrainerConfig, TrainerModule};
use crate::errors::EngineError;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Learned weights of a logistic regression model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticParams {
    /// Feature columns in weight order.
    pub features: Vec<String>,
    /// One weight per feature.
    pub weights: Vec<f64>,
    /// Intercept.
    pub bias: f64,
}

/// The built-in binary classifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogisticRegression;

impl LogisticRegression {
    /// Registry name.
    pub const NAME: &'static str = "logistic_regression";
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn feature_matrix(data: &Dataset, features: &[String]) -> Result<Vec<Vec<f64>>, EngineError> {
    let indices = features
        .iter()
        .map(|f| {
            data.column_index(f)
                .ok_or_else(|| EngineError::Data(format!("feature column '{f}' is missing")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(data
        .rows
        .iter()
        .map(|row| indices.iter().map(|&i| row[i].as_f64().unwrap_or(0.0)).collect())
        .collect())
}

fn labels(data: &Dataset, label_key: &str) -> Result<Vec<f64>, EngineError> {
    let column = data
        .column(label_key)
        .ok_or_else(|| EngineError::Data(format!("label column '{label_key}' is missing")))?;
    column
        .enumerate()
        .map(|(row, cell)| match cell {
            Cell::Number(v) if *v == 0.0 || *v == 1.0 => Ok(*v),
            other => Err(EngineError::Data(format!(
                "label '{}' at row {row} is not 0 or 1",
                other.render()
            ))),
        })
        .collect()
}

impl TrainerModule for LogisticRegression {
    fn name(&self) -> &str {
        Self::NAME
    }

    #[allow(clippy::cast_precision_loss)]
    fn train(&self, train: &Dataset, label_key: &str, config: &TrainerConfig) -> Result<serde_json::Value, EngineError> {
        if train.is_empty() {
            return Err(EngineError::Data("training split is empty".to_string()));
        }
        if config.batch_size == 0 {
            return Err(EngineError::Data("batch_size must be positive".to_string()));
        }
        let features = train.numeric_features(label_key);
        let x = feature_matrix(train, &features)?;
        let y = labels(train, label_key)?;

        let mut weights = vec![0.0; features.len()];
        let mut bias = 0.0;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut order: Vec<usize> = (0..x.len()).collect();
        order.shuffle(&mut rng);
        let mut cursor = 0;

        let steps = config.steps();
        for _ in 0..steps {
            let mut grad_w = vec![0.0; weights.len()];
            let mut grad_b = 0.0;
            for _ in 0..config.batch_size {
                if cursor == order.len() {
                    order.shuffle(&mut rng);
                    cursor = 0;
                }
                let i = order[cursor];
                cursor += 1;

                let z = bias + weights.iter().zip(&x[i]).map(|(w, v)| w * v).sum::<f64>();
                let err = sigmoid(z) - y[i];
                for (g, v) in grad_w.iter_mut().zip(&x[i]) {
                    *g += err * v;
                }
                grad_b += err;
            }
            let scale = config.learning_rate / config.batch_size as f64;
            for (w, g) in weights.iter_mut().zip(&grad_w) {
                *w -= scale * g;
            }
            bias -= scale * grad_b;
        }

        debug!(steps, features = features.len(), "Trained logistic regression");
        Ok(serde_json::to_value(LogisticParams {
            features,
            weights,
            bias,
        })?)
    }

    fn scorer(&self, params: &serde_json::Value) -> Result<Box<dyn ModelScorer>, EngineError> {
        let params: LogisticParams = serde_json::from_value(params.clone())?;
        if params.features.len() != params.weights.len() {
            return Err(EngineError::Data(format!(
                "model has {} features but {} weights",
                params.features.len(),
                params.weights.len()
            )));
        }
        Ok(Box::new(params))
    }
}

impl ModelScorer for LogisticParams {
    fn predict(&self, data: &Dataset) -> Result<Vec<f64>, EngineError> {
        let x = feature_matrix(data, &self.features)?;
        Ok(x.iter()
            .map(|row| sigmoid(self.bias + self.weights.iter().zip(row).map(|(w, v)| w * v).sum::<f64>()))
            .collect())
    }
}
