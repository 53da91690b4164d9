//! Batch evaluation against ground-truth labels.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Column name carrying ground truth in uploaded batches.
pub const LABEL_COLUMN: &str = "actual_label";
/// Localized alias of [`LABEL_COLUMN`].
pub const LABEL_COLUMN_ALIAS: &str = "真实标签";

/// Classification metrics of the ensemble over the evaluable rows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BatchMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub auc: f64,
    /// Rows with both an ensemble prediction and a label.
    pub evaluated_rows: usize,
}

impl BatchMetrics {
    /// Flat name to value mapping.
    pub fn to_map(&self) -> BTreeMap<&'static str, f64> {
        BTreeMap::from([
            ("accuracy", self.accuracy),
            ("precision", self.precision),
            ("recall", self.recall),
            ("f1", self.f1),
            ("auc", self.auc),
        ])
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Confusion {
    tp: u64,
    fp: u64,
    tn: u64,
    fn_: u64,
}

impl Confusion {
    fn from_pairs(pairs: &[(u8, u8)]) -> Self {
        let mut c = Confusion::default();
        for &(pred, label) in pairs {
            match (pred == 1, label == 1) {
                (true, true) => c.tp += 1,
                (true, false) => c.fp += 1,
                (false, true) => c.fn_ += 1,
                (false, false) => c.tn += 1,
            }
        }
        c
    }

    fn accuracy(&self) -> f64 {
        ratio(self.tp + self.tn, self.tp + self.tn + self.fp + self.fn_)
    }

    fn precision(&self) -> f64 {
        ratio(self.tp, self.tp + self.fp)
    }

    fn recall(&self) -> f64 {
        ratio(self.tp, self.tp + self.fn_)
    }

    fn f1(&self) -> f64 {
        ratio(2 * self.tp, 2 * self.tp + self.fp + self.fn_)
    }
}

/// `num / den`, or 0 when `den` is 0.
fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Evaluate ensemble output against labels.
///
/// Rows lacking a prediction, a probability or a label are skipped. Returns
/// `None` when no row is left.
pub fn evaluate(
    predictions: &[Option<u8>],
    probabilities: &[Option<f64>],
    labels: &[Option<u8>],
) -> Option<BatchMetrics> {
    let rows: Vec<(u8, f64, u8)> = predictions
        .iter()
        .zip(probabilities)
        .zip(labels)
        .filter_map(|((pred, prob), label)| Some(((*pred)?, (*prob)?, (*label)?)))
        .collect();

    if rows.is_empty() {
        debug!(total = labels.len(), "No evaluable rows");
        return None;
    }

    let pairs: Vec<(u8, u8)> = rows.iter().map(|&(pred, _, label)| (pred, label)).collect();
    let scored: Vec<(f64, u8)> = rows.iter().map(|&(_, prob, label)| (prob, label)).collect();
    let confusion = Confusion::from_pairs(&pairs);

    let metrics = BatchMetrics {
        accuracy: confusion.accuracy(),
        precision: confusion.precision(),
        recall: confusion.recall(),
        f1: confusion.f1(),
        auc: roc_auc(&scored),
        evaluated_rows: rows.len(),
    };
    info!(
        evaluated = metrics.evaluated_rows,
        skipped = labels.len() - metrics.evaluated_rows,
        accuracy = metrics.accuracy,
        auc = metrics.auc,
        "Batch evaluated"
    );
    Some(metrics)
}

/// Rank-based ROC AUC with average ranks for ties; 0 for a single class.
pub fn roc_auc(scored: &[(f64, u8)]) -> f64 {
    let positives = scored.iter().filter(|(_, y)| *y == 1).count();
    let negatives = scored.len() - positives;
    if positives == 0 || negatives == 0 {
        return 0.0;
    }

    let mut items = scored.to_vec();
    items.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut positive_rank_sum = 0.0;
    let mut i = 0;
    while i < items.len() {
        let mut j = i;
        while j + 1 < items.len() && items[j + 1].0 == items[i].0 {
            j += 1;
        }
        // 1-based ranks i+1..=j+1 share their mean
        let rank = (i + j + 2) as f64 / 2.0;
        positive_rank_sum += rank * items[i..=j].iter().filter(|(_, y)| *y == 1).count() as f64;
        i = j + 1;
    }

    let p = positives as f64;
    (positive_rank_sum - p * (p + 1.0) / 2.0) / (p * negatives as f64)
}

/// Read a 0/1 label from a raw cell; anything else is missing.
pub fn parse_label(value: &Value) -> Option<u8> {
    match value {
        Value::Bool(b) => Some(u8::from(*b)),
        Value::Number(n) => match n.as_f64() {
            Some(v) if v == 0.0 => Some(0),
            Some(v) if v == 1.0 => Some(1),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "0" | "0.0" | "false" => Some(0),
            "1" | "1.0" | "true" => Some(1),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_perfect_predictions() {
        let m = evaluate(
            &[Some(1), Some(0), Some(1)],
            &[Some(0.9), Some(0.1), Some(0.8)],
            &[Some(1), Some(0), Some(1)],
        )
        .unwrap();
        assert_eq!(m.accuracy, 1.0);
        assert_eq!(m.precision, 1.0);
        assert_eq!(m.recall, 1.0);
        assert_eq!(m.f1, 1.0);
        assert_eq!(m.auc, 1.0);
        assert_eq!(m.evaluated_rows, 3);
    }

    #[test]
    fn test_single_class_labels() {
        let m = evaluate(
            &[Some(0), Some(1), Some(0)],
            &[Some(0.2), Some(0.6), Some(0.1)],
            &[Some(0), Some(0), Some(0)],
        )
        .unwrap();
        assert_eq!(m.auc, 0.0);
        assert_eq!(m.precision, 0.0);
        assert_eq!(m.recall, 0.0);
        assert_eq!(m.f1, 0.0);
        assert!((m.accuracy - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_rows_without_prediction_or_label_are_skipped() {
        let m = evaluate(
            &[None, Some(1), Some(0), Some(1)],
            &[None, Some(0.7), Some(0.4), Some(0.9)],
            &[Some(1), None, Some(0), Some(1)],
        )
        .unwrap();
        assert_eq!(m.evaluated_rows, 2);
        assert_eq!(m.accuracy, 1.0);

        assert!(evaluate(&[None], &[None], &[Some(1)]).is_none());
        assert!(evaluate(&[], &[], &[]).is_none());
    }

    #[test]
    fn test_auc_ties_use_average_rank() {
        assert_eq!(roc_auc(&[(0.5, 0), (0.5, 1)]), 0.5);
        assert_eq!(roc_auc(&[(0.1, 1), (0.9, 0)]), 0.0);
        assert_eq!(roc_auc(&[(0.2, 0), (0.4, 1), (0.4, 0), (0.9, 1)]), 0.875);
    }

    #[test]
    fn test_parse_label() {
        assert_eq!(parse_label(&json!(1)), Some(1));
        assert_eq!(parse_label(&json!(0.0)), Some(0));
        assert_eq!(parse_label(&json!(true)), Some(1));
        assert_eq!(parse_label(&json!(" 0 ")), Some(0));
        assert_eq!(parse_label(&json!(2)), None);
        assert_eq!(parse_label(&json!("yes")), None);
        assert_eq!(parse_label(&Value::Null), None);
    }

    #[test]
    fn test_metric_map_keys() {
        let m = evaluate(&[Some(1)], &[Some(0.8)], &[Some(1)]).unwrap();
        let keys: Vec<&str> = m.to_map().into_keys().collect();
        assert_eq!(keys, vec!["accuracy", "auc", "f1", "precision", "recall"]);
    }
}
