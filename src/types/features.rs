//! Normalized numeric model input

use serde::Serialize;

/// One record in schema slot order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FeatureVector {
    values: Vec<f64>,
}

impl FeatureVector {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Many records in schema slot order, stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    n_features: usize,
    data: Vec<f64>,
}

impl FeatureTable {
    pub fn new(n_features: usize) -> Self {
        Self {
            n_features,
            data: Vec::new(),
        }
    }

    pub fn with_capacity(n_features: usize, rows: usize) -> Self {
        Self {
            n_features,
            data: Vec::with_capacity(n_features * rows),
        }
    }

    /// Build from row vectors; `None` if any row has the wrong width.
    pub fn from_rows(n_features: usize, rows: &[Vec<f64>]) -> Option<Self> {
        let mut table = Self::with_capacity(n_features, rows.len());
        for row in rows {
            if row.len() != n_features {
                return None;
            }
            table.data.extend_from_slice(row);
        }
        Some(table)
    }

    /// Append a row. The row must have exactly `n_features` values.
    pub(crate) fn push_row(&mut self, row: &[f64]) {
        debug_assert_eq!(row.len(), self.n_features);
        self.data.extend_from_slice(row);
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_rows(&self) -> usize {
        if self.n_features == 0 {
            0
        } else {
            self.data.len() / self.n_features
        }
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows() == 0
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.n_features..(i + 1) * self.n_features]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        self.data.chunks_exact(self.n_features.max(1))
    }

    pub fn column(&self, j: usize) -> Vec<f64> {
        self.rows().map(|r| r[j]).collect()
    }

    pub(crate) fn column_mut(&mut self, j: usize) -> impl Iterator<Item = &mut f64> {
        let n = self.n_features.max(1);
        self.data.iter_mut().skip(j).step_by(n)
    }

    /// Row-major backing storage.
    pub fn as_flat(&self) -> &[f64] {
        &self.data
    }
}
