//! Built-in data and training stages.
//!
//! Each component is a [`Stage`](crate::stages::Stage) with named inputs and
//! outputs exposed as associated constants, so wiring code never spells a
//! channel name by hand.

mod example_gen;
mod example_validator;
mod schema_gen;
mod statistics_gen;
mod trainer;
mod transform;

pub use example_gen::{is_train_row, split_examples, CsvExampleGen};
pub use example_validator::{
    validate_statistics, Anomalies, Anomaly, AnomalyAction, AnomalyKind, ExampleValidator, HaltPolicy, Severity,
};
pub use schema_gen::{FeatureSchema, FeatureType, Schema, SchemaGen};
pub use statistics_gen::{ColumnStatistics, DatasetStatistics, NumericSummary, SplitStatistics, StatisticsGen, ValueKind};
pub use trainer::Trainer;
pub use transform::Transform;
