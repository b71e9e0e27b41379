//! CSV ingestion into train/eval example splits.

use crate::context::StageContext;
use crate::core::{ArtifactDraft, ArtifactType, StageOutput};
use crate::engine::{Cell, Dataset, ExampleSplits};
use crate::errors::{EngineError, GateflowError};
use crate::pipeline::OutputSpec;
use crate::stages::Stage;
use async_trait::async_trait;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Reads `*.csv` files and splits their rows 2:1 into `train` and `eval`.
///
/// The split is decided by the SHA-256 of each row's content, so the same
/// data always lands in the same split regardless of file order.
#[derive(Debug, Clone)]
pub struct CsvExampleGen {
    input_base: PathBuf,
}

impl CsvExampleGen {
    /// The examples output.
    pub const EXAMPLES: &'static str = "examples";

    /// Creates an example generator over a CSV file or a directory of them.
    #[must_use]
    pub fn new(input_base: impl Into<PathBuf>) -> Self {
        Self {
            input_base: input_base.into(),
        }
    }

    /// The configured input location.
    #[must_use]
    pub fn input_base(&self) -> &Path {
        &self.input_base
    }

    /// Source files in a stable order.
    ///
    /// # Errors
    ///
    /// Fails if the location is unreadable or holds no CSV file.
    pub fn source_files(&self) -> Result<Vec<PathBuf>, EngineError> {
        let files = if self.input_base.is_file() {
            vec![self.input_base.clone()]
        } else {
            let mut files = Vec::new();
            for entry in fs::read_dir(&self.input_base)? {
                let path = entry?.path();
                if path.is_file() && path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("csv")) {
                    files.push(path);
                }
            }
            files.sort();
            files
        };
        if files.is_empty() {
            return Err(EngineError::Data(format!(
                "no CSV files under {}",
                self.input_base.display()
            )));
        }
        Ok(files)
    }

    /// Reads every source file into one dataset.
    ///
    /// # Errors
    ///
    /// Fails on unreadable files or when files disagree on their header.
    pub fn read_dataset(&self) -> Result<Dataset, EngineError> {
        let mut dataset: Option<Dataset> = None;
        for path in self.source_files()? {
            let mut reader = csv::Reader::from_path(&path)?;
            let header: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();

            let data = dataset.get_or_insert_with(|| Dataset::new(header.clone()));
            if data.columns != header {
                return Err(EngineError::Data(format!(
                    "{} has columns {header:?}, expected {:?}",
                    path.display(),
                    data.columns
                )));
            }
            for record in reader.records() {
                data.push_row(record?.iter().map(Cell::parse).collect())?;
            }
        }
        dataset.ok_or_else(|| EngineError::Data("no examples read".to_string()))
    }
}

/// Returns true if the row belongs to the training split.
#[must_use]
pub fn is_train_row(row: &[Cell]) -> bool {
    let mut hasher = Sha256::new();
    for cell in row {
        hasher.update(cell.render().as_bytes());
        hasher.update([0x1f]);
    }
    let digest = hasher.finalize();
    let mut bucket = [0u8; 8];
    bucket.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bucket) % 3 < 2
}

/// Splits a dataset 2:1 by row hash.
#[must_use]
pub fn split_examples(data: &Dataset) -> ExampleSplits {
    ExampleSplits {
        train: data.filter(is_train_row),
        eval: data.filter(|row| !is_train_row(row)),
    }
}

#[async_trait]
impl Stage for CsvExampleGen {
    fn kind(&self) -> &str {
        "CsvExampleGen"
    }

    fn outputs(&self) -> BTreeMap<String, OutputSpec> {
        let mut outputs = BTreeMap::new();
        outputs.insert(Self::EXAMPLES.to_string(), OutputSpec::new(ArtifactType::Examples));
        outputs
    }

    fn config(&self) -> serde_json::Value {
        json!({"input_base": self.input_base})
    }

    fn fingerprint(&self) -> Result<Option<String>, GateflowError> {
        let mut hasher = Sha256::new();
        for path in self.source_files()? {
            if let Some(name) = path.file_name() {
                hasher.update(name.to_string_lossy().as_bytes());
            }
            hasher.update([0]);
            hasher.update(fs::read(&path)?);
        }
        Ok(Some(hex::encode(hasher.finalize())))
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, GateflowError> {
        let data = self.read_dataset()?;
        let splits = split_examples(&data);

        let dir = ctx.create_output_dir(Self::EXAMPLES)?;
        splits.save(&dir)?;

        info!(
            stage = %ctx.stage_id(),
            run_id = %ctx.run_id(),
            train = splits.train.len(),
            eval = splits.eval.len(),
            "Examples generated"
        );

        let draft = ArtifactDraft::new(dir)
            .with_property("split_names", json!(ExampleSplits::SPLITS))
            .with_property("train_count", json!(splits.train.len()))
            .with_property("eval_count", json!(splits.eval.len()));
        Ok(StageOutput::single(Self::EXAMPLES, draft))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_csv(dir: &Path, name: &str, rows: usize) {
        let mut body = String::from("Time,Amount,Class\n");
        for i in 0..rows {
            body.push_str(&format!("{i},{}.5,{}\n", i * 3, i % 2));
        }
        fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn test_reads_all_csv_files_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_csv(dir.path(), "a.csv", 10);
        write_csv(dir.path(), "b.csv", 5);
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let data = CsvExampleGen::new(dir.path()).read_dataset().unwrap();
        assert_eq!(data.columns, vec!["Time", "Amount", "Class"]);
        assert_eq!(data.len(), 15);
        assert_eq!(data.rows[1][1], Cell::Number(3.5));
    }

    #[test]
    fn test_mismatched_headers_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_csv(dir.path(), "a.csv", 3);
        fs::write(dir.path().join("b.csv"), "Time,Class\n1,0\n").unwrap();

        assert!(CsvExampleGen::new(dir.path()).read_dataset().is_err());
    }

    #[test]
    fn test_empty_location_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CsvExampleGen::new(dir.path()).source_files().is_err());
    }

    #[test]
    fn test_split_is_deterministic_and_roughly_two_to_one() {
        let dir = tempfile::tempdir().unwrap();
        write_csv(dir.path(), "data.csv", 300);
        let data = CsvExampleGen::new(dir.path()).read_dataset().unwrap();

        let first = split_examples(&data);
        let second = split_examples(&data);
        assert_eq!(first, second);
        assert_eq!(first.train.len() + first.eval.len(), 300);
        assert!((150..=250).contains(&first.train.len()), "train = {}", first.train.len());
    }

    #[test]
    fn test_fingerprint_tracks_file_content() {
        let dir = tempfile::tempdir().unwrap();
        write_csv(dir.path(), "data.csv", 4);
        let gen = CsvExampleGen::new(dir.path());
        let before = gen.fingerprint().unwrap();
        assert_eq!(before, gen.fingerprint().unwrap());

        write_csv(dir.path(), "data.csv", 5);
        assert_ne!(before, gen.fingerprint().unwrap());
    }
}
