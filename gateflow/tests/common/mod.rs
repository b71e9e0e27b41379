//! Shared fixtures for integration tests.

#![allow(dead_code)]

use gateflow::engine::{Cell, Dataset, ExampleSplits, ModelScorer, TrainerConfig, TrainerModule};
use gateflow::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// A trainer whose models echo a precomputed probability column.
///
/// Lets tests pin metric values exactly.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColumnEcho;

impl ColumnEcho {
    pub const NAME: &'static str = "column_echo";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EchoParams {
    column: String,
}

impl ModelScorer for EchoParams {
    fn predict(&self, data: &Dataset) -> Result<Vec<f64>, EngineError> {
        let column = data
            .column(&self.column)
            .ok_or_else(|| EngineError::Data(format!("column '{}' is missing", self.column)))?;
        Ok(column.map(|cell| cell.as_f64().unwrap_or(0.0)).collect())
    }
}

impl TrainerModule for ColumnEcho {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn train(&self, _train: &Dataset, _label_key: &str, _config: &TrainerConfig) -> Result<serde_json::Value, EngineError> {
        Ok(serde_json::json!({"column": "pred"}))
    }

    fn scorer(&self, params: &serde_json::Value) -> Result<Box<dyn ModelScorer>, EngineError> {
        let params: EchoParams = serde_json::from_value(params.clone())?;
        Ok(Box::new(params))
    }
}

/// 100 eval rows with a `pred` column; exactly `correct` are classified right
/// at a 0.5 decision threshold.
pub fn scored_examples(correct: usize) -> ExampleSplits {
    let columns = vec!["pred".to_string(), "Class".to_string()];
    let mut eval = Dataset::new(columns.clone());
    for i in 0..100 {
        let positive = i % 2 == 0;
        let right = i < correct;
        let pred = if positive == right { 0.9 } else { 0.1 };
        let label = if positive { 1.0 } else { 0.0 };
        eval.push_row(vec![Cell::Number(pred), Cell::Number(label)]).unwrap();
    }
    ExampleSplits {
        train: Dataset::new(columns),
        eval,
    }
}

/// Writes a linearly separable transactions CSV: `Class` is 1 iff
/// `Amount` exceeds 500.
pub fn write_transactions(dir: &Path, rows: usize) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let mut body = String::from("Time,Amount,V1,Class\n");
    for i in 0..rows {
        let amount = (i * 997) % 1000;
        let v1 = (i % 7) as f64 / 7.0;
        let class = u8::from(amount > 500);
        writeln!(body, "{i},{amount}.25,{v1:.3},{class}").unwrap();
    }
    let path = dir.join("transactions.csv");
    std::fs::write(&path, body).unwrap();
    dir.to_path_buf()
}

/// Sorted file names (recursively, relative) under `dir`; empty if absent.
pub fn listing(dir: &Path) -> Vec<PathBuf> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            out.push(path.strip_prefix(root).unwrap().to_path_buf());
            if path.is_dir() {
                walk(root, &path, out);
            }
        }
    }
    let mut out = Vec::new();
    walk(dir, dir, &mut out);
    out.sort();
    out
}
