//! Gaussian elimination with partial pivoting
//!
//! Used by the linear job as the timing baseline for the iterative solvers.

use super::LinearSystem;
use crate::error::SolveError;

/// Pivots smaller than this are treated as zero
pub const PIVOT_EPSILON: f64 = 1e-12;

/// Solve `A·x = b` directly
///
/// Works on copies; the input system is left untouched.
pub fn solve(system: &LinearSystem) -> Result<Vec<f64>, SolveError> {
    let n = system.size();
    let mut a = system.a.clone();
    let mut b = system.b.clone();

    // Forward elimination
    for k in 0..n {
        let pivot_row = (k..n)
            .max_by(|&i, &j| a.get(i, k).abs().total_cmp(&a.get(j, k).abs()))
            .unwrap_or(k);
        if pivot_row != k {
            a.swap_rows(k, pivot_row);
            b.swap(k, pivot_row);
        }

        let pivot = a.get(k, k);
        if pivot.abs() < PIVOT_EPSILON {
            return Err(SolveError::Singular { column: k });
        }

        for i in k + 1..n {
            let factor = a.get(i, k) / pivot;
            if factor == 0.0 {
                continue;
            }
            for j in k..n {
                let v = a.get(i, j) - factor * a.get(k, j);
                a.set(i, j, v);
            }
            b[i] -= factor * b[k];
        }
    }

    // Back substitution
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let sum: f64 = (i + 1..n).map(|j| a.get(i, j) * x[j]).sum();
        x[i] = (b[i] - sum) / a.get(i, i);
    }

    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::DenseMatrix;

    fn system(rows: Vec<Vec<f64>>, b: Vec<f64>) -> LinearSystem {
        LinearSystem::new(DenseMatrix::from_rows(rows).unwrap(), b).unwrap()
    }

    #[test]
    fn test_solve_2x2() {
        let x = solve(&system(vec![vec![5.0, 2.0], vec![1.0, 3.0]], vec![19.0, 9.0])).unwrap();
        assert!((x[0] - 3.0).abs() < 1e-12);
        assert!((x[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_solve_needs_pivoting() {
        // Zero in the top-left corner
        let x = solve(&system(
            vec![vec![0.0, 1.0, 1.0], vec![2.0, 1.0, 0.0], vec![1.0, 0.0, 3.0]],
            vec![5.0, 4.0, 10.0],
        ))
        .unwrap();
        let expected = [1.0, 2.0, 3.0];
        for (got, want) in x.iter().zip(expected) {
            assert!((got - want).abs() < 1e-10, "got {:?}", x);
        }
    }

    #[test]
    fn test_singular() {
        let err = solve(&system(vec![vec![1.0, 2.0], vec![2.0, 4.0]], vec![3.0, 6.0])).unwrap_err();
        assert_eq!(err, SolveError::Singular { column: 1 });
    }
}
