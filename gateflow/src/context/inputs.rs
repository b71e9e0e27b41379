//! Resolved input artifacts handed to a stage.

use crate::core::Artifact;
use std::collections::BTreeMap;

/// The artifacts bound to a stage's declared inputs for one execution.
///
/// Every declared input has an entry; optional (resolver) inputs that
/// resolved to nothing are stored as `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageInputs {
    bound: BTreeMap<String, Option<Artifact>>,
}

impl StageInputs {
    /// Creates an empty set of inputs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` to an artifact, or to nothing.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, artifact: Option<Artifact>) -> Self {
        self.insert(name, artifact);
        self
    }

    /// Binds `name` in place.
    pub fn insert(&mut self, name: impl Into<String>, artifact: Option<Artifact>) {
        self.bound.insert(name.into(), artifact);
    }

    /// Returns the artifact bound to `name`, if any.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Artifact> {
        self.bound.get(name).and_then(Option::as_ref)
    }

    /// Returns true if `name` is a declared input.
    #[must_use]
    pub fn is_declared(&self, name: &str) -> bool {
        self.bound.contains_key(name)
    }

    /// `(input name, artifact id)` pairs for every bound input, sorted by name.
    ///
    /// Empty optional inputs are listed with no id so that "no baseline"
    /// and "baseline X" hash differently.
    #[must_use]
    pub fn identities(&self) -> Vec<(String, Option<String>)> {
        self.bound
            .iter()
            .map(|(name, a)| (name.clone(), a.as_ref().map(|a| a.id.to_string())))
            .collect()
    }

    /// Iterates over bound inputs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&Artifact>)> {
        self.bound.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }
}
