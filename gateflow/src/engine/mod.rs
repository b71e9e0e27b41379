//! External collaborators of the orchestration core.
//!
//! Transform, training and scoring are reached only through the traits in
//! this module. The built-in implementations exist so a pipeline can run
//! end to end; their algorithms are not part of the gating contract.

mod data;
mod logistic;
mod registry;
mod scaler;

pub use data::{Cell, Dataset, ExampleSplits};
pub(crate) use data::{read_json, write_json};
pub use logistic::{LogisticParams, LogisticRegression};
pub use registry::{ModelBundle, ModuleRegistry, TransformGraph};
pub use scaler::{ColumnScale, IdentityTransform, StandardScaler};

use crate::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Scores examples with a trained model.
pub trait ModelScorer: Send + Sync {
    /// Returns the positive-class probability of every row, in order.
    ///
    /// # Errors
    ///
    /// Fails if the data lacks a feature the model needs.
    fn predict(&self, data: &Dataset) -> Result<Vec<f64>, EngineError>;
}

/// A feature-engineering module referenced by name from configuration.
pub trait TransformModule: Send + Sync + Debug {
    /// Registry name.
    fn name(&self) -> &str;

    /// Fits transform parameters on the training split.
    ///
    /// # Errors
    ///
    /// Fails if the data cannot be analyzed.
    fn fit(&self, train: &Dataset, label_key: &str) -> Result<serde_json::Value, EngineError>;

    /// Applies fitted parameters to any split.
    ///
    /// # Errors
    ///
    /// Fails if the data does not match the fitted parameters.
    fn apply(&self, params: &serde_json::Value, data: &Dataset, label_key: &str) -> Result<Dataset, EngineError>;
}

/// A model-definition module referenced by name from configuration.
pub trait TrainerModule: Send + Sync + Debug {
    /// Registry name.
    fn name(&self) -> &str;

    /// Trains on transformed examples and returns the model parameters.
    ///
    /// # Errors
    ///
    /// Fails on unusable training data.
    fn train(&self, train: &Dataset, label_key: &str, config: &TrainerConfig) -> Result<serde_json::Value, EngineError>;

    /// Rebuilds a scorer from trained parameters.
    ///
    /// # Errors
    ///
    /// Fails if the parameters are malformed.
    fn scorer(&self, params: &serde_json::Value) -> Result<Box<dyn ModelScorer>, EngineError>;
}

fn default_seed() -> u64 {
    42
}

fn default_learning_rate() -> f64 {
    0.1
}

/// Training hyperparameters handed to a [`TrainerModule`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainerConfig {
    /// Examples per gradient step.
    pub batch_size: usize,
    /// Nominal dataset size; `dataset_size / batch_size` steps are taken.
    pub dataset_size: usize,
    /// Shuffling seed.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Gradient descent step size.
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
}

impl TrainerConfig {
    /// Creates a config with the default seed and learning rate.
    #[must_use]
    pub fn new(batch_size: usize, dataset_size: usize) -> Self {
        Self {
            batch_size,
            dataset_size,
            seed: default_seed(),
            learning_rate: default_learning_rate(),
        }
    }

    /// Number of gradient steps, at least one.
    #[must_use]
    pub fn steps(&self) -> usize {
        (self.dataset_size / self.batch_size.max(1)).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_from_dataset_and_batch_size() {
        assert_eq!(TrainerConfig::new(32, 1000).steps(), 31);
        assert_eq!(TrainerConfig::new(32, 10).steps(), 1);
    }

    #[test]
    fn test_trainer_config_rejects_unknown_keys() {
        let parsed = serde_json::from_str::<TrainerConfig>(r#"{"batch_size": 32, "dataset_size": 100, "epochs": 3}"#);
        assert!(parsed.is_err());
    }
}
