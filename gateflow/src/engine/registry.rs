//! Named transform and trainer modules, and the payloads they leave behind.

use super::data::{read_json, write_json};
use super::{Dataset, IdentityTransform, LogisticRegression, ModelScorer, StandardScaler, TrainerModule, TransformModule};
use crate::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// A fitted transform: which module to run and with which parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformGraph {
    /// Transform module name.
    pub module: String,
    /// Label column left untouched by the transform.
    pub label_key: String,
    /// Fitted parameters.
    pub params: serde_json::Value,
}

impl TransformGraph {
    /// File name inside a `TransformGraph` artifact.
    pub const FILE_NAME: &'static str = "transform_graph.json";

    /// Loads a graph from an artifact directory.
    ///
    /// # Errors
    ///
    /// Fails if the payload is absent or malformed.
    pub fn load(dir: &Path) -> Result<Self, EngineError> {
        read_json(&dir.join(Self::FILE_NAME))
    }

    /// Writes the graph into an artifact directory.
    ///
    /// # Errors
    ///
    /// Fails if the payload cannot be written.
    pub fn save(&self, dir: &Path) -> Result<(), EngineError> {
        write_json(&dir.join(Self::FILE_NAME), self)
    }
}

/// A trained model that scores raw, untransformed examples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBundle {
    /// Trainer module name.
    pub trainer_module: String,
    /// The transform applied before scoring.
    pub transform: TransformGraph,
    /// Trainer parameters.
    pub params: serde_json::Value,
}

impl ModelBundle {
    /// File name inside a `Model` artifact.
    pub const FILE_NAME: &'static str = "model.json";

    /// Loads a bundle from an artifact directory.
    ///
    /// # Errors
    ///
    /// Fails if the payload is absent or malformed.
    pub fn load(dir: &Path) -> Result<Self, EngineError> {
        read_json(&dir.join(Self::FILE_NAME))
    }

    /// Writes the bundle into an artifact directory.
    ///
    /// # Errors
    ///
    /// Fails if the payload cannot be written.
    pub fn save(&self, dir: &Path) -> Result<(), EngineError> {
        write_json(&dir.join(Self::FILE_NAME), self)
    }
}

struct TransformedScorer {
    transform: Arc<dyn TransformModule>,
    graph: TransformGraph,
    inner: Box<dyn ModelScorer>,
}

impl ModelScorer for TransformedScorer {
    fn predict(&self, data: &Dataset) -> Result<Vec<f64>, EngineError> {
        let transformed = self.transform.apply(&self.graph.params, data, &self.graph.label_key)?;
        self.inner.predict(&transformed)
    }
}

/// Maps module names from configuration to implementations.
#[derive(Debug, Clone)]
pub struct ModuleRegistry {
    transforms: BTreeMap<String, Arc<dyn TransformModule>>,
    trainers: BTreeMap<String, Arc<dyn TrainerModule>>,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::empty()
            .with_transform(Arc::new(StandardScaler))
            .with_transform(Arc::new(IdentityTransform))
            .with_trainer(Arc::new(LogisticRegression))
    }
}

impl ModuleRegistry {
    /// Creates a registry holding the built-in modules.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with no modules.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            transforms: BTreeMap::new(),
            trainers: BTreeMap::new(),
        }
    }

    /// Registers a transform module under its own name.
    #[must_use]
    pub fn with_transform(mut self, module: Arc<dyn TransformModule>) -> Self {
        self.transforms.insert(module.name().to_string(), module);
        self
    }

    /// Registers a trainer module under its own name.
    #[must_use]
    pub fn with_trainer(mut self, module: Arc<dyn TrainerModule>) -> Self {
        self.trainers.insert(module.name().to_string(), module);
        self
    }

    /// Looks up a transform module.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownModule`] for unregistered names.
    pub fn transform(&self, name: &str) -> Result<Arc<dyn TransformModule>, EngineError> {
        self.transforms
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownModule {
                kind: "transform",
                name: name.to_string(),
            })
    }

    /// Looks up a trainer module.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownModule`] for unregistered names.
    pub fn trainer(&self, name: &str) -> Result<Arc<dyn TrainerModule>, EngineError> {
        self.trainers
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownModule {
                kind: "trainer",
                name: name.to_string(),
            })
    }

    /// Registered transform names.
    pub fn transform_names(&self) -> impl Iterator<Item = &str> {
        self.transforms.keys().map(String::as_str)
    }

    /// Registered trainer names.
    pub fn trainer_names(&self) -> impl Iterator<Item = &str> {
        self.trainers.keys().map(String::as_str)
    }

    /// Builds a scorer that applies the bundle's transform before predicting.
    ///
    /// # Errors
    ///
    /// Fails if either module is unknown or the parameters are malformed.
    pub fn scorer(&self, bundle: &ModelBundle) -> Result<Box<dyn ModelScorer>, EngineError> {
        let transform = self.transform(&bundle.transform.module)?;
        let inner = self.trainer(&bundle.trainer_module)?.scorer(&bundle.params)?;
        Ok(Box::new(TransformedScorer {
            transform,
            graph: bundle.transform.clone(),
            inner,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Cell, TrainerConfig};

    #[test]
    fn test_builtins_are_registered() {
        let registry = ModuleRegistry::new();
        assert_eq!(registry.transform_names().collect::<Vec<_>>(), vec!["identity", "standard_scaler"]);
        assert_eq!(registry.trainer_names().collect::<Vec<_>>(), vec!["logistic_regression"]);
    }

    #[test]
    fn test_unknown_module_is_reported() {
        let err = ModuleRegistry::new().trainer("xgboost").unwrap_err();
        assert!(matches!(err, EngineError::UnknownModule { kind: "trainer", .. }));
    }

    #[test]
    fn test_bundle_scorer_applies_transform() {
        let mut train = Dataset::new(vec!["Amount".into(), "Class".into()]);
        for i in 0..20 {
            let label = if i >= 10 { 1.0 } else { 0.0 };
            train
                .push_row(vec![Cell::Number(f64::from(i) * 100.0), Cell::Number(label)])
                .unwrap();
        }
        let registry = ModuleRegistry::new();
        let scaler = registry.transform("standard_scaler").unwrap();
        let graph = TransformGraph {
            module: "standard_scaler".into(),
            label_key: "Class".into(),
            params: scaler.fit(&train, "Class").unwrap(),
        };
        let scaled = scaler.apply(&graph.params, &train, "Class").unwrap();
        let config = TrainerConfig {
            batch_size: 4,
            dataset_size: 400,
            seed: 1,
            learning_rate: 0.5,
        };
        let params = registry
            .trainer("logistic_regression")
            .unwrap()
            .train(&scaled, "Class", &config)
            .unwrap();
        let bundle = ModelBundle {
            trainer_module: "logistic_regression".into(),
            transform: graph,
            params,
        };

        let preds = registry.scorer(&bundle).unwrap().predict(&train).unwrap();
        assert!(preds[0] < 0.5);
        assert!(preds[19] > 0.5);
    }
}
