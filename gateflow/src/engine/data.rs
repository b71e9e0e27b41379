//! Tabular data exchanged between the reference components.

use crate::errors::EngineError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// One value of a tabular example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    /// A finite number.
    Number(f64),
    /// Anything that did not parse as a number.
    Text(String),
    /// An empty field.
    Missing,
}

impl Cell {
    /// Parses a raw CSV field.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::Missing;
        }
        match trimmed.parse::<f64>() {
            Ok(value) if value.is_finite() => Self::Number(value),
            _ => Self::Text(trimmed.to_string()),
        }
    }

    /// The numeric value, if this is a number.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns true for an empty field.
    #[must_use]
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    /// Canonical text form; integral numbers render without a fraction.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn render(&self) -> String {
        match self {
            Self::Number(v) if v.fract() == 0.0 && v.abs() < 1e15 => format!("{}", *v as i64),
            Self::Number(v) => v.to_string(),
            Self::Text(s) => s.clone(),
            Self::Missing => String::new(),
        }
    }
}

/// A table of examples with named columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Column names in order.
    pub columns: Vec<String>,
    /// Rows; every row has one cell per column.
    pub rows: Vec<Vec<Cell>>,
}

impl Dataset {
    /// Creates an empty dataset with the given columns.
    #[must_use]
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Appends a row.
    ///
    /// # Errors
    ///
    /// Fails if the row width does not match the column count.
    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<(), EngineError> {
        if row.len() != self.columns.len() {
            return Err(EngineError::Data(format!(
                "row has {} cells, expected {}",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Iterates over one column.
    pub fn column<'a>(&'a self, name: &str) -> Option<impl Iterator<Item = &'a Cell> + 'a> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(move |row| &row[idx]))
    }

    /// Columns other than `label_key` whose present values are all numeric.
    #[must_use]
    pub fn numeric_features(&self, label_key: &str) -> Vec<String> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, name)| name.as_str() != label_key)
            .filter(|(idx, _)| {
                let mut present = self.rows.iter().map(|r| &r[*idx]).filter(|c| !c.is_missing()).peekable();
                present.peek().is_some() && present.all(|c| matches!(c, Cell::Number(_)))
            })
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Keeps the rows for which `keep` returns true.
    #[must_use]
    pub fn filter(&self, keep: impl Fn(&[Cell]) -> bool) -> Self {
        Self {
            columns: self.columns.clone(),
            rows: self.rows.iter().filter(|r| keep(r)).cloned().collect(),
        }
    }
}

/// The train and eval splits written by example generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExampleSplits {
    /// Training split.
    pub train: Dataset,
    /// Evaluation split.
    pub eval: Dataset,
}

impl ExampleSplits {
    /// File name of the payload inside an `Examples` artifact.
    pub const FILE_NAME: &'static str = "examples.json";

    /// Split names in canonical order.
    pub const SPLITS: [&'static str; 2] = ["train", "eval"];

    /// Returns a split by name.
    #[must_use]
    pub fn split(&self, name: &str) -> Option<&Dataset> {
        match name {
            "train" => Some(&self.train),
            "eval" => Some(&self.eval),
            _ => None,
        }
    }

    /// Loads the splits from an artifact directory.
    ///
    /// # Errors
    ///
    /// Fails if the payload is absent or malformed.
    pub fn load(dir: &Path) -> Result<Self, EngineError> {
        read_json(&dir.join(Self::FILE_NAME))
    }

    /// Writes the splits into an artifact directory.
    ///
    /// # Errors
    ///
    /// Fails if the payload cannot be written.
    pub fn save(&self, dir: &Path) -> Result<(), EngineError> {
        write_json(&dir.join(Self::FILE_NAME), self)
    }
}

/// Writes `value` as pretty JSON, creating parent directories.
pub(crate) fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), EngineError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_vec_pretty(value)?)?;
    Ok(())
}

/// Reads a JSON payload.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, EngineError> {
    let raw = fs::read(path)?;
    Ok(serde_json::from_slice(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_parsing() {
        assert_eq!(Cell::parse("  "), Cell::Missing);
        assert_eq!(Cell::parse("1.5"), Cell::Number(1.5));
        assert_eq!(Cell::parse("NaN"), Cell::Text("NaN".to_string()));
        assert_eq!(Cell::parse("card"), Cell::Text("card".to_string()));
    }

    #[test]
    fn test_cell_render() {
        assert_eq!(Cell::Number(1.0).render(), "1");
        assert_eq!(Cell::Number(0.25).render(), "0.25");
        assert_eq!(Cell::Missing.render(), "");
    }

    #[test]
    fn test_cells_serialize_untagged() {
        let row = vec![Cell::Number(2.0), Cell::Text("x".to_string()), Cell::Missing];
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"[2.0,"x",null]"#);
        let back: Vec<Cell> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, row);
    }

    #[test]
    fn test_numeric_features_skip_label_and_text() {
        let mut data = Dataset::new(vec!["Amount".into(), "Kind".into(), "Class".into()]);
        data.push_row(vec![Cell::Number(1.0), Cell::Text("a".into()), Cell::Number(0.0)])
            .unwrap();
        data.push_row(vec![Cell::Missing, Cell::Text("b".into()), Cell::Number(1.0)])
            .unwrap();

        assert_eq!(data.numeric_features("Class"), vec!["Amount".to_string()]);
        assert!(data.push_row(vec![Cell::Missing]).is_err());
    }

    #[test]
    fn test_splits_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut train = Dataset::new(vec!["a".into()]);
        train.push_row(vec![Cell::Number(1.0)]).unwrap();
        let splits = ExampleSplits {
            train,
            eval: Dataset::new(vec!["a".into()]),
        };

        splits.save(dir.path()).unwrap();
        assert_eq!(ExampleSplits::load(dir.path()).unwrap(), splits);
    }
}
