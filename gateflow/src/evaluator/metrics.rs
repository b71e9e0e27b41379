//! Per-slice metric computation over scored evaluation examples.

use super::config::{EvalConfig, MetricKind, SlicingSpec};
use crate::engine::{Cell, Dataset};
use crate::errors::MetricComputationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metric values for one slice; `None` marks an undefined value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceMetrics {
    /// The slice.
    pub slice: SlicingSpec,
    /// Value per metric.
    pub values: BTreeMap<MetricKind, Option<f64>>,
}

impl SliceMetrics {
    /// The value of one metric; `None` if undefined or not computed.
    #[must_use]
    pub fn value(&self, metric: MetricKind) -> Option<f64> {
        self.values.get(&metric).copied().flatten()
    }
}

/// Looks up `metric` on `slice` in a list of slice metrics.
#[must_use]
pub fn lookup(metrics: &[SliceMetrics], slice: &SlicingSpec, metric: MetricKind) -> Option<f64> {
    metrics
        .iter()
        .find(|m| &m.slice == slice)
        .and_then(|m| m.value(metric))
}

fn binary_labels(data: &Dataset, label_key: &str) -> Result<Vec<bool>, MetricComputationError> {
    let column = data
        .column(label_key)
        .ok_or_else(|| MetricComputationError::MissingLabelColumn {
            label_key: label_key.to_string(),
        })?;
    column
        .enumerate()
        .map(|(row, cell)| match cell {
            Cell::Number(v) if *v == 0.0 => Ok(false),
            Cell::Number(v) if *v == 1.0 => Ok(true),
            other => Err(MetricComputationError::NonBinaryLabel {
                label_key: label_key.to_string(),
                row,
                value: other.render(),
            }),
        })
        .collect()
}

fn slice_rows(data: &Dataset, slice: &SlicingSpec) -> Result<Vec<usize>, MetricComputationError> {
    let filters = slice
        .feature_values
        .iter()
        .map(|(column, value)| {
            data.column_index(column)
                .map(|idx| (idx, value))
                .ok_or_else(|| MetricComputationError::MissingSliceColumn { column: column.clone() })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(data
        .rows
        .iter()
        .enumerate()
        .filter(|(_, row)| filters.iter().all(|(idx, value)| row[*idx].render() == **value))
        .map(|(i, _)| i)
        .collect())
}

#[allow(clippy::cast_precision_loss)]
fn ratio(num: usize, den: usize) -> Option<f64> {
    (den > 0).then(|| num as f64 / den as f64)
}

#[allow(clippy::cast_precision_loss)]
fn auc(scored: &[(f64, bool)]) -> Option<f64> {
    let positives = scored.iter().filter(|(_, y)| *y).count();
    let negatives = scored.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut sorted: Vec<(f64, bool)> = scored.to_vec();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

    // Mann-Whitney U with average ranks for ties.
    let mut rank_sum = 0.0;
    let mut i = 0;
    while i < sorted.len() {
        let mut j = i;
        while j + 1 < sorted.len() && sorted[j + 1].0 == sorted[i].0 {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        rank_sum += avg_rank * sorted[i..=j].iter().filter(|(_, y)| *y).count() as f64;
        i = j + 1;
    }
    let p = positives as f64;
    Some((rank_sum - p * (p + 1.0) / 2.0) / (p * negatives as f64))
}

#[allow(clippy::cast_precision_loss)]
fn slice_values(scored: &[(f64, bool)], decision_threshold: f64) -> BTreeMap<MetricKind, Option<f64>> {
    let n = scored.len();
    let predicted = |p: f64| p >= decision_threshold;
    let tp = scored.iter().filter(|(p, y)| predicted(*p) && *y).count();
    let fp = scored.iter().filter(|(p, y)| predicted(*p) && !*y).count();
    let fneg = scored.iter().filter(|(p, y)| !predicted(*p) && *y).count();
    let correct = scored.iter().filter(|(p, y)| predicted(*p) == *y).count();
    let mean = |sum: f64| (n > 0).then(|| sum / n as f64);

    MetricKind::ALL
        .iter()
        .map(|metric| {
            let value = match metric {
                MetricKind::BinaryAccuracy => ratio(correct, n),
                MetricKind::Precision => ratio(tp, tp + fp),
                MetricKind::Recall => ratio(tp, tp + fneg),
                MetricKind::Auc => auc(scored),
                MetricKind::ExampleCount => Some(n as f64),
                MetricKind::MeanLabel => mean(scored.iter().filter(|(_, y)| *y).count() as f64),
                MetricKind::MeanPrediction => mean(scored.iter().map(|(p, _)| p).sum()),
            };
            (*metric, value.filter(|v| v.is_finite()))
        })
        .collect()
}

/// Computes every metric on every evaluated slice.
///
/// `predictions` holds one probability per row of `data`. An empty slice or
/// an undefined ratio yields `None` for that value rather than an error.
///
/// # Errors
///
/// Fails when the label column or a slice column is absent, or a label is
/// not 0/1.
pub fn compute_metrics(
    data: &Dataset,
    predictions: &[f64],
    config: &EvalConfig,
) -> Result<Vec<SliceMetrics>, MetricComputationError> {
    let labels = binary_labels(data, &config.label_key)?;
    config
        .evaluated_slices()
        .into_iter()
        .map(|slice| {
            let scored: Vec<(f64, bool)> = slice_rows(data, &slice)?
                .into_iter()
                .filter_map(|i| Some((*predictions.get(i)?, labels[i])))
                .collect();
            Ok(SliceMetrics {
                values: slice_values(&scored, config.decision_threshold),
                slice,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(rows: &[(&str, f64)]) -> Dataset {
        let mut d = Dataset::new(vec!["Type".into(), "Class".into()]);
        for (kind, label) in rows {
            d.push_row(vec![Cell::Text((*kind).to_string()), Cell::Number(*label)])
                .unwrap();
        }
        d
    }

    #[test]
    fn test_overall_metrics() {
        let d = data(&[("a", 1.0), ("a", 0.0), ("b", 1.0), ("b", 0.0)]);
        let preds = [0.9, 0.2, 0.4, 0.6];
        let metrics = compute_metrics(&d, &preds, &EvalConfig::default()).unwrap();

        let overall = &metrics[0];
        assert!(overall.slice.is_overall());
        assert_eq!(overall.value(MetricKind::BinaryAccuracy), Some(0.5));
        assert_eq!(overall.value(MetricKind::Precision), Some(0.5));
        assert_eq!(overall.value(MetricKind::Recall), Some(0.5));
        assert_eq!(overall.value(MetricKind::ExampleCount), Some(4.0));
        assert_eq!(overall.value(MetricKind::MeanLabel), Some(0.5));
        assert_eq!(overall.value(MetricKind::Auc), Some(0.75));
    }

    #[test]
    fn test_sliced_metrics_and_empty_slices() {
        let d = data(&[("a", 1.0), ("a", 0.0), ("b", 1.0)]);
        let config = EvalConfig::default()
            .with_slice(SlicingSpec::overall().with_feature("Type", "a"))
            .with_slice(SlicingSpec::overall().with_feature("Type", "zzz"));
        let metrics = compute_metrics(&d, &[0.9, 0.1, 0.1], &config).unwrap();

        let a = SlicingSpec::overall().with_feature("Type", "a");
        assert_eq!(lookup(&metrics, &a, MetricKind::BinaryAccuracy), Some(1.0));

        let empty = &metrics[2];
        assert_eq!(empty.value(MetricKind::ExampleCount), Some(0.0));
        assert_eq!(empty.value(MetricKind::BinaryAccuracy), None);
        assert_eq!(empty.value(MetricKind::Auc), None);
    }

    #[test]
    fn test_missing_label_column_is_fatal() {
        let d = Dataset::new(vec!["Amount".into()]);
        let err = compute_metrics(&d, &[], &EvalConfig::default()).unwrap_err();
        assert!(matches!(err, MetricComputationError::MissingLabelColumn { .. }));
    }

    #[test]
    fn test_non_binary_label_is_fatal() {
        let d = data(&[("a", 1.0), ("a", 0.5)]);
        let err = compute_metrics(&d, &[0.1, 0.2], &EvalConfig::default()).unwrap_err();
        assert!(matches!(err, MetricComputationError::NonBinaryLabel { row: 1, .. }));
    }

    #[test]
    fn test_missing_slice_column_is_fatal() {
        let d = data(&[("a", 1.0)]);
        let config = EvalConfig::default().with_slice(SlicingSpec::overall().with_feature("Country", "NL"));
        let err = compute_metrics(&d, &[0.1], &config).unwrap_err();
        assert!(matches!(err, MetricComputationError::MissingSliceColumn { .. }));
    }

    #[test]
    fn test_auc_handles_ties() {
        let scored = [(0.5, true), (0.5, false)];
        assert_eq!(auc(&scored), Some(0.5));
        assert_eq!(auc(&[(0.3, true)]), None);
    }
}
