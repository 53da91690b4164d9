//! Pure-Rust model families and their JSON artifact format.
//!
//! These back `.json` artifacts and the synthetic stand-ins the loader fits
//! when no artifact can be found for a model id.

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ArtifactError, ClassifierError};
use crate::models::classifier::{check_probability, check_width, Classifier, ModelId};
use crate::models::tree::{RegressionTree, TreeParams};
use crate::types::FeatureTable;

/// Rows of random data the synthetic stand-ins are fit on.
pub const SYNTHETIC_ROWS: usize = 100;

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn normalized(mut values: Vec<f64>) -> Vec<f64> {
    let total: f64 = values.iter().sum();
    if total > 0.0 {
        values.iter_mut().for_each(|v| *v /= total);
    }
    values
}

/// Boosted regression trees on logistic loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoosting {
    pub n_features: usize,
    /// Initial log-odds.
    pub base_score: f64,
    /// Trees whose leaf values already include the learning rate.
    pub trees: Vec<RegressionTree>,
    pub importances: Vec<f64>,
}

impl GradientBoosting {
    pub fn fit(x: &FeatureTable, y: &[f64], rounds: usize, learning_rate: f64, rng: &mut StdRng) -> Self {
        let n = y.len().max(1) as f64;
        let positive_rate = (y.iter().sum::<f64>() / n).clamp(1e-6, 1.0 - 1e-6);
        let base_score = (positive_rate / (1.0 - positive_rate)).ln();
        let lambda = 1.0;
        let params = TreeParams {
            max_depth: 3,
            ..TreeParams::default()
        };

        let rows: Vec<usize> = (0..y.len()).collect();
        let mut margin = vec![base_score; y.len()];
        let mut importances = vec![0.0; x.n_features()];
        let mut trees = Vec::with_capacity(rounds);

        for _ in 0..rounds {
            let p: Vec<f64> = margin.iter().map(|&m| sigmoid(m)).collect();
            let residual: Vec<f64> = y.iter().zip(&p).map(|(yi, pi)| yi - pi).collect();
            let hessian: Vec<f64> = p.iter().map(|pi| pi * (1.0 - pi)).collect();
            let leaf = |idx: &[usize]| {
                let g: f64 = idx.iter().map(|&i| residual[i]).sum();
                let h: f64 = idx.iter().map(|&i| hessian[i]).sum();
                learning_rate * g / (h + lambda)
            };
            let tree = RegressionTree::fit(params, x, &residual, &rows, &leaf, &mut importances, rng);
            for (i, row) in x.rows().enumerate() {
                margin[i] += tree.predict(row);
            }
            trees.push(tree);
        }

        Self {
            n_features: x.n_features(),
            base_score,
            trees,
            importances: normalized(importances),
        }
    }

    fn proba(&self, features: &[f64]) -> f64 {
        sigmoid(self.base_score + self.trees.iter().map(|t| t.predict(features)).sum::<f64>())
    }
}

/// Bagged classification trees; leaves hold the positive-class fraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    pub n_features: usize,
    pub trees: Vec<RegressionTree>,
    pub importances: Vec<f64>,
}

impl RandomForest {
    pub fn fit(x: &FeatureTable, y: &[f64], n_trees: usize, rng: &mut StdRng) -> Self {
        let n = y.len();
        let params = TreeParams {
            max_depth: 6,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: Some((x.n_features() as f64).sqrt().round() as usize),
        };
        let leaf = |idx: &[usize]| {
            if idx.is_empty() {
                0.5
            } else {
                idx.iter().map(|&i| y[i]).sum::<f64>() / idx.len() as f64
            }
        };

        let mut importances = vec![0.0; x.n_features()];
        let trees = (0..n_trees)
            .map(|_| {
                let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n.max(1))).collect();
                RegressionTree::fit(params, x, y, &sample, &leaf, &mut importances, rng)
            })
            .collect();

        Self {
            n_features: x.n_features(),
            trees,
            importances: normalized(importances),
        }
    }

    fn proba(&self, features: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return f64::NAN;
        }
        self.trees.iter().map(|t| t.predict(features)).sum::<f64>() / self.trees.len() as f64
    }
}

/// L2-regularized logistic regression on standardized inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
    pub weights: Vec<f64>,
    pub bias: f64,
}

impl LogisticRegression {
    pub fn fit(x: &FeatureTable, y: &[f64], epochs: usize, learning_rate: f64) -> Self {
        let d = x.n_features();
        let n = x.n_rows().max(1) as f64;
        let l2 = 1e-2;

        let means: Vec<f64> = (0..d).map(|j| x.column(j).iter().sum::<f64>() / n).collect();
        let scales: Vec<f64> = (0..d)
            .map(|j| {
                let var = x.column(j).iter().map(|v| (v - means[j]).powi(2)).sum::<f64>() / n;
                if var > 0.0 {
                    var.sqrt()
                } else {
                    1.0
                }
            })
            .collect();
        let z: Vec<Vec<f64>> = x
            .rows()
            .map(|row| (0..d).map(|j| (row[j] - means[j]) / scales[j]).collect())
            .collect();

        let mut weights = vec![0.0; d];
        let mut bias = 0.0;
        for _ in 0..epochs {
            let mut grad_w = vec![0.0; d];
            let mut grad_b = 0.0;
            for (row, yi) in z.iter().zip(y) {
                let err = sigmoid(bias + dot(&weights, row)) - yi;
                for (g, v) in grad_w.iter_mut().zip(row) {
                    *g += err * v;
                }
                grad_b += err;
            }
            for (w, g) in weights.iter_mut().zip(&grad_w) {
                *w -= learning_rate * (g / n + l2 * *w);
            }
            bias -= learning_rate * grad_b / n;
        }

        Self {
            means,
            scales,
            weights,
            bias,
        }
    }

    fn proba(&self, features: &[f64]) -> f64 {
        let z: f64 = features
            .iter()
            .zip(&self.means)
            .zip(&self.scales)
            .zip(&self.weights)
            .map(|(((x, m), s), w)| w * (x - m) / s)
            .sum();
        sigmoid(self.bias + z)
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Per-class Gaussian likelihood parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassStats {
    pub prior: f64,
    pub means: Vec<f64>,
    pub variances: Vec<f64>,
}

/// Gaussian naive Bayes over classes 0 and 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianNb {
    pub n_features: usize,
    /// Index 0 is the negative class, index 1 the positive class.
    pub classes: Vec<ClassStats>,
}

impl GaussianNb {
    pub fn fit(x: &FeatureTable, y: &[f64]) -> Self {
        let d = x.n_features();
        let max_var = (0..d)
            .map(|j| {
                let col = x.column(j);
                let m = col.iter().sum::<f64>() / col.len().max(1) as f64;
                col.iter().map(|v| (v - m).powi(2)).sum::<f64>() / col.len().max(1) as f64
            })
            .fold(0.0, f64::max);
        let epsilon = 1e-9 * max_var.max(1e-9);

        let classes = [0.0, 1.0]
            .iter()
            .map(|&label| {
                let rows: Vec<&[f64]> = x
                    .rows()
                    .zip(y)
                    .filter(|(_, yi)| **yi == label)
                    .map(|(row, _)| row)
                    .collect();
                let count = rows.len().max(1) as f64;
                let means: Vec<f64> = (0..d)
                    .map(|j| rows.iter().map(|r| r[j]).sum::<f64>() / count)
                    .collect();
                let variances: Vec<f64> = (0..d)
                    .map(|j| {
                        rows.iter().map(|r| (r[j] - means[j]).powi(2)).sum::<f64>() / count
                            + epsilon
                    })
                    .collect();
                ClassStats {
                    prior: rows.len() as f64 / y.len().max(1) as f64,
                    means,
                    variances,
                }
            })
            .collect();

        Self {
            n_features: d,
            classes,
        }
    }

    fn joint_log_likelihood(stats: &ClassStats, features: &[f64]) -> f64 {
        let ll: f64 = features
            .iter()
            .zip(&stats.means)
            .zip(&stats.variances)
            .map(|((x, m), v)| -0.5 * (2.0 * std::f64::consts::PI * v).ln() - (x - m).powi(2) / (2.0 * v))
            .sum();
        stats.prior.ln() + ll
    }

    fn proba(&self, features: &[f64]) -> f64 {
        let neg = Self::joint_log_likelihood(&self.classes[0], features);
        let pos = Self::joint_log_likelihood(&self.classes[1], features);
        sigmoid(pos - neg)
    }
}

/// A serialized native model, tagged by family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum NativeModel {
    GradientBoosting(GradientBoosting),
    RandomForest(RandomForest),
    LogisticRegression(LogisticRegression),
    GaussianNb(GaussianNb),
}

impl NativeModel {
    /// Fit a minimal stand-in of the family behind `id` on random data.
    pub fn synthesize(id: ModelId, n_features: usize, rng: &mut StdRng) -> Self {
        let (x, y) = random_training_set(n_features, SYNTHETIC_ROWS, rng);
        debug!(model = %id, rows = y.len(), "Fitting synthetic stand-in");
        match id {
            ModelId::Xgboost => NativeModel::GradientBoosting(GradientBoosting::fit(&x, &y, 10, 0.3, rng)),
            ModelId::RandomForest => NativeModel::RandomForest(RandomForest::fit(&x, &y, 10, rng)),
            ModelId::LogisticRegression => {
                NativeModel::LogisticRegression(LogisticRegression::fit(&x, &y, 200, 0.1))
            }
            ModelId::NaiveBayes => NativeModel::GaussianNb(GaussianNb::fit(&x, &y)),
        }
    }

    pub fn family(&self) -> &'static str {
        match self {
            NativeModel::GradientBoosting(_) => "gradient_boosting",
            NativeModel::RandomForest(_) => "random_forest",
            NativeModel::LogisticRegression(_) => "logistic_regression",
            NativeModel::GaussianNb(_) => "gaussian_nb",
        }
    }

    /// Reject artifacts whose shapes would make prediction panic or lie.
    pub fn validate(&self, expected_features: usize) -> Result<(), ArtifactError> {
        let invalid = |msg: String| Err(ArtifactError::Invalid(format!("{}: {msg}", self.family())));
        let n = self.n_features();
        if n != expected_features {
            return invalid(format!("fit on {n} features, expected {expected_features}"));
        }
        match self {
            NativeModel::GradientBoosting(m) => {
                if !m.base_score.is_finite() || m.importances.len() != n {
                    return invalid("malformed header".to_string());
                }
                for tree in &m.trees {
                    tree.validate(n).map_err(ArtifactError::Invalid)?;
                }
            }
            NativeModel::RandomForest(m) => {
                if m.trees.is_empty() || m.importances.len() != n {
                    return invalid("forest has no trees".to_string());
                }
                for tree in &m.trees {
                    tree.validate(n).map_err(ArtifactError::Invalid)?;
                }
            }
            NativeModel::LogisticRegression(m) => {
                if m.means.len() != n || m.scales.len() != n || m.scales.iter().any(|s| *s == 0.0) {
                    return invalid("coefficient shapes disagree".to_string());
                }
            }
            NativeModel::GaussianNb(m) => {
                if m.classes.len() != 2 {
                    return invalid(format!("expected 2 classes, found {}", m.classes.len()));
                }
                for stats in &m.classes {
                    if stats.means.len() != n
                        || stats.variances.len() != n
                        || stats.variances.iter().any(|v| *v <= 0.0)
                        || stats.prior <= 0.0
                    {
                        return invalid("class statistics are malformed".to_string());
                    }
                }
            }
        }
        Ok(())
    }
}

impl Classifier for NativeModel {
    fn n_features(&self) -> usize {
        match self {
            NativeModel::GradientBoosting(m) => m.n_features,
            NativeModel::RandomForest(m) => m.n_features,
            NativeModel::LogisticRegression(m) => m.weights.len(),
            NativeModel::GaussianNb(m) => m.n_features,
        }
    }

    fn predict_proba(&self, features: &[f64]) -> Result<f64, ClassifierError> {
        check_width(self.n_features(), features.len())?;
        let p = match self {
            NativeModel::GradientBoosting(m) => m.proba(features),
            NativeModel::RandomForest(m) => m.proba(features),
            NativeModel::LogisticRegression(m) => m.proba(features),
            NativeModel::GaussianNb(m) => m.proba(features),
        };
        check_probability(p)
    }

    fn predict_proba_batch(&self, table: &FeatureTable) -> Result<Vec<f64>, ClassifierError> {
        check_width(self.n_features(), table.n_features())?;
        match self {
            NativeModel::GradientBoosting(m) => score_rows(table, |row| m.proba(row)),
            NativeModel::RandomForest(m) => score_rows(table, |row| m.proba(row)),
            NativeModel::LogisticRegression(m) => score_rows(table, |row| m.proba(row)),
            NativeModel::GaussianNb(m) => score_rows(table, |row| m.proba(row)),
        }
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        match self {
            NativeModel::GradientBoosting(m) => Some(m.importances.clone()),
            NativeModel::RandomForest(m) => Some(m.importances.clone()),
            NativeModel::LogisticRegression(_) | NativeModel::GaussianNb(_) => None,
        }
    }

    fn describe(&self) -> String {
        format!("native {} ({} features)", self.family(), self.n_features())
    }
}

fn score_rows<F>(table: &FeatureTable, proba: F) -> Result<Vec<f64>, ClassifierError>
where
    F: Fn(&[f64]) -> f64,
{
    table.rows().map(|row| check_probability(proba(row))).collect()
}

/// Uniform random features with random 0/1 labels; both classes present.
fn random_training_set(n_features: usize, rows: usize, rng: &mut StdRng) -> (FeatureTable, Vec<f64>) {
    let mut x = FeatureTable::with_capacity(n_features, rows);
    let mut row = vec![0.0; n_features];
    for _ in 0..rows {
        row.iter_mut().for_each(|v| *v = rng.gen::<f64>());
        x.push_row(&row);
    }
    let mut y: Vec<f64> = (0..rows).map(|_| f64::from(u8::from(rng.gen_bool(0.5)))).collect();
    if rows >= 2 {
        y[0] = 0.0;
        y[1] = 1.0;
    }
    (x, y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FEATURE_COUNT;
    use rand::SeedableRng;

    fn separable() -> (FeatureTable, Vec<f64>) {
        let rows: Vec<Vec<f64>> = (0..40)
            .map(|i| {
                let v = i as f64 / 40.0;
                vec![v, 1.0 - v, (i % 3) as f64]
            })
            .collect();
        let y = (0..40).map(|i| if i >= 20 { 1.0 } else { 0.0 }).collect();
        (FeatureTable::from_rows(3, &rows).unwrap(), y)
    }

    #[test]
    fn test_every_family_separates_easy_data() {
        let (x, y) = separable();
        let mut rng = StdRng::seed_from_u64(3);
        let models = vec![
            NativeModel::GradientBoosting(GradientBoosting::fit(&x, &y, 20, 0.3, &mut rng)),
            NativeModel::RandomForest(RandomForest::fit(&x, &y, 15, &mut rng)),
            NativeModel::LogisticRegression(LogisticRegression::fit(&x, &y, 500, 0.5)),
            NativeModel::GaussianNb(GaussianNb::fit(&x, &y)),
        ];
        for model in models {
            let low = model.predict_proba(&[0.05, 0.95, 1.0]).unwrap();
            let high = model.predict_proba(&[0.95, 0.05, 1.0]).unwrap();
            assert!(low < 0.5, "{} low={low}", model.family());
            assert!(high > 0.5, "{} high={high}", model.family());
            assert!(model.validate(3).is_ok());
        }
    }

    #[test]
    fn test_synthetic_models_are_deterministic() {
        for id in ModelId::ALL {
            let a = NativeModel::synthesize(id, FEATURE_COUNT, &mut StdRng::seed_from_u64(42));
            let b = NativeModel::synthesize(id, FEATURE_COUNT, &mut StdRng::seed_from_u64(42));
            assert_eq!(a, b);
            assert_eq!(a.n_features(), FEATURE_COUNT);
            assert!(a.validate(FEATURE_COUNT).is_ok());
            let p = a.predict_proba(&[0.5; FEATURE_COUNT]).unwrap();
            assert!((0.0..=1.0).contains(&p));
        }
    }

    #[test]
    fn test_importances_only_for_tree_families() {
        let mut rng = StdRng::seed_from_u64(9);
        let xgb = NativeModel::synthesize(ModelId::Xgboost, FEATURE_COUNT, &mut rng);
        let nb = NativeModel::synthesize(ModelId::NaiveBayes, FEATURE_COUNT, &mut rng);
        let importances = xgb.feature_importances().unwrap();
        assert_eq!(importances.len(), FEATURE_COUNT);
        assert!((importances.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(nb.feature_importances().is_none());
    }

    #[test]
    fn test_json_round_trip_keeps_family_tag() {
        let model = NativeModel::synthesize(ModelId::LogisticRegression, 4, &mut StdRng::seed_from_u64(1));
        let json = serde_json::to_value(&model).unwrap();
        assert_eq!(json["family"], "logistic_regression");
        let back: NativeModel = serde_json::from_value(json).unwrap();
        assert_eq!(back, model);
    }

    #[test]
    fn test_validate_rejects_wrong_width() {
        let model = NativeModel::synthesize(ModelId::NaiveBayes, 5, &mut StdRng::seed_from_u64(1));
        assert!(matches!(model.validate(17), Err(ArtifactError::Invalid(_))));
        assert_eq!(
            model.predict_proba(&[0.0; 3]),
            Err(ClassifierError::FeatureCount { expected: 5, got: 3 })
        );
    }
}
