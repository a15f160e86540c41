use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StainError};

/// Row norms at or below this are treated as zero.
const NORM_EPSILON: f64 = 1e-12;

/// Up to three stain directions in RGB optical-density space, one per row.
///
/// Resolved rows have unit Euclidean norm. An all-zero row is an unresolved
/// stain: either not requested (the third row of a two-stain estimate) or a
/// degenerate estimate that normalization could not scale.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StainMatrix {
    rows: [[f64; 3]; 3],
}

impl StainMatrix {
    /// Normalizes each row of a (k, 3) matrix, k in {2, 3}, and packs it
    /// into the 3x3 layout, zero-filling the rows beyond k.
    pub fn from_unnormalized(stains: ArrayView2<f64>) -> Result<Self> {
        if stains.ncols() != 3 {
            return Err(StainError::DimensionMismatch {
                expected: 3,
                actual: stains.ncols(),
            });
        }
        if !(2..=3).contains(&stains.nrows()) {
            return Err(StainError::InvalidStainCount(stains.nrows()));
        }
        let mut rows = [[0.0; 3]; 3];
        for (packed, stain) in rows.iter_mut().zip(stains.rows()) {
            *packed = normalize_row([stain[0], stain[1], stain[2]]);
        }
        Ok(Self { rows })
    }

    /// Wraps rows that are already normalized.
    pub fn from_rows(rows: [[f64; 3]; 3]) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[[f64; 3]; 3] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> [f64; 3] {
        self.rows[index]
    }

    pub fn is_resolved(&self, index: usize) -> bool {
        self.rows[index].iter().any(|&x| x != 0.0)
    }

    /// Number of resolved (non-zero) rows.
    pub fn num_resolved(&self) -> usize {
        (0..3).filter(|&i| self.is_resolved(i)).count()
    }

    /// Row-major flat copy, the `double[9]` layout of stain profiles.
    pub fn as_flat(&self) -> [f64; 9] {
        let mut flat = [0.0; 9];
        for (chunk, row) in flat.chunks_exact_mut(3).zip(self.rows.iter()) {
            chunk.copy_from_slice(row);
        }
        flat
    }

    pub fn to_array2(&self) -> Array2<f64> {
        Array2::from(self.rows.to_vec())
    }

    /// Fills an unresolved third row with the normalized cross product of the
    /// first two, completing a two-stain matrix for 3-channel deconvolution.
    /// Matrices whose third row is resolved, or whose first two rows are
    /// parallel or unresolved, are returned unchanged.
    pub fn complemented(&self) -> Self {
        if self.is_resolved(2) {
            return *self;
        }
        let [a, b] = [self.rows[0], self.rows[1]];
        let cross = [
            a[1] * b[2] - a[2] * b[1],
            a[2] * b[0] - a[0] * b[2],
            a[0] * b[1] - a[1] * b[0],
        ];
        let mut rows = self.rows;
        rows[2] = normalize_row(cross);
        Self { rows }
    }
}

impl From<StainMatrix> for [f64; 9] {
    fn from(matrix: StainMatrix) -> Self {
        matrix.as_flat()
    }
}

/// Divides `row` by its Euclidean norm; a zero-length row stays zero.
pub fn normalize_row(row: [f64; 3]) -> [f64; 3] {
    let norm = row.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm > NORM_EPSILON && norm.is_finite() {
        row.map(|x| x / norm)
    } else {
        [0.0; 3]
    }
}
