//! Dense linear systems
//!
//! - [`input`]: matrix, vector and nodes file parsing
//! - [`partition`]: splitting rows between workers
//! - [`gauss`]: direct solve with partial pivoting
//! - [`generate`]: random diagonally dominant systems

pub mod gauss;
pub mod generate;
pub mod input;
pub mod partition;

pub use partition::{partition_rows, RowRange};

use crate::error::InputError;

/// Square matrix stored row-major in one allocation
#[derive(Debug, Clone, PartialEq)]
pub struct DenseMatrix {
    n: usize,
    data: Vec<f64>,
}

impl DenseMatrix {
    pub fn zeros(n: usize) -> Self {
        Self { n, data: vec![0.0; n * n] }
    }

    /// Build from row vectors; every row must have `rows.len()` entries
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self, InputError> {
        let n = rows.len();
        let mut data = Vec::with_capacity(n * n);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != n {
                return Err(InputError::Dimension(format!(
                    "row {} has {} entries, expected {}",
                    i + 1,
                    row.len(),
                    n
                )));
            }
            data.extend(row);
        }
        Ok(Self { n, data })
    }

    pub fn size(&self) -> usize {
        self.n
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.n..(i + 1) * self.n]
    }

    pub fn row_mut(&mut self, i: usize) -> &mut [f64] {
        &mut self.data[i * self.n..(i + 1) * self.n]
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.n + j]
    }

    pub fn set(&mut self, i: usize, j: usize, v: f64) {
        self.data[i * self.n + j] = v;
    }

    pub fn swap_rows(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        let n = self.n;
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        let (head, tail) = self.data.split_at_mut(hi * n);
        head[lo * n..(lo + 1) * n].swap_with_slice(&mut tail[..n]);
    }
}

#[cfg(test)]
impl DenseMatrix {
    /// `A·x`
    pub(crate) fn mul_vec(&self, x: &[f64]) -> Vec<f64> {
        (0..self.n)
            .map(|i| self.row(i).iter().zip(x).map(|(a, v)| a * v).sum())
            .collect()
    }
}

/// `A·x = b` with matching dimensions
#[derive(Debug, Clone, PartialEq)]
pub struct LinearSystem {
    pub a: DenseMatrix,
    pub b: Vec<f64>,
}

impl LinearSystem {
    pub fn new(a: DenseMatrix, b: Vec<f64>) -> Result<Self, InputError> {
        if a.size() != b.len() {
            return Err(InputError::Dimension(format!(
                "matrix is {n}x{n}, vector has {} entries",
                b.len(),
                n = a.size()
            )));
        }
        Ok(Self { a, b })
    }

    pub fn size(&self) -> usize {
        self.b.len()
    }
}

/// Euclidean distance between two vectors of equal length
pub fn euclidean_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}
