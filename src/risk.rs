//! Risk tier classification from ensemble probabilities

use serde::{Deserialize, Serialize};
use std::fmt;

/// Probabilities at or above this are high risk.
pub const HIGH_RISK_THRESHOLD: f64 = 0.7;
/// Probabilities at or above this (and below high) are medium risk.
pub const MEDIUM_RISK_THRESHOLD: f64 = 0.3;

/// Discrete risk verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Low,
    Medium,
    High,
    /// No valid probability was available.
    Unknown,
}

impl RiskTier {
    /// Tier for one probability; `None` and NaN map to `Unknown`.
    pub fn from_probability(probability: Option<f64>) -> Self {
        match probability {
            Some(p) if p.is_nan() => RiskTier::Unknown,
            Some(p) if p >= HIGH_RISK_THRESHOLD => RiskTier::High,
            Some(p) if p >= MEDIUM_RISK_THRESHOLD => RiskTier::Medium,
            Some(_) => RiskTier::Low,
            None => RiskTier::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Low => "low",
            RiskTier::Medium => "medium",
            RiskTier::High => "high",
            RiskTier::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tier of a single probability.
pub fn risk_tier(probability: f64) -> RiskTier {
    RiskTier::from_probability(Some(probability))
}

/// Tier of the mean of several per-model probabilities.
///
/// An empty slice means every model failed and yields `Unknown`.
pub fn risk_tier_of_mean(probabilities: &[f64]) -> RiskTier {
    RiskTier::from_probability(mean(probabilities))
}

/// Per-row tiers for a batch of ensemble probabilities.
pub fn risk_tiers(probabilities: &[Option<f64>]) -> Vec<RiskTier> {
    probabilities
        .iter()
        .map(|p| RiskTier::from_probability(*p))
        .collect()
}

pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
