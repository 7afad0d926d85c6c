//! Random test systems
//!
//! Generated matrices are strictly diagonally dominant so every Gauss-Seidel
//! variant converges. The exact solution is `x = [1, 2, ..., n]`.

use super::{DenseMatrix, LinearSystem};
use anyhow::{Context, Result};
use rand::Rng;
use std::fmt::Write as _;
use std::path::Path;

/// Build a random diagonally dominant system and its exact solution
pub fn diagonally_dominant<R: Rng + ?Sized>(n: usize, rng: &mut R) -> (LinearSystem, Vec<f64>) {
    let x_true: Vec<f64> = (1..=n).map(|i| i as f64).collect();
    let mut a = DenseMatrix::zeros(n);
    let mut b = vec![0.0; n];

    for i in 0..n {
        let row = a.row_mut(i);
        let mut off_diagonal = 0.0;
        for (j, v) in row.iter_mut().enumerate() {
            if i != j {
                *v = rng.gen_range(-1.0..1.0);
                off_diagonal += v.abs();
            }
        }

        let mut diagonal = off_diagonal + rng.gen_range(1.0..6.0);
        if rng.gen_bool(0.5) {
            diagonal = -diagonal;
        }
        row[i] = diagonal;

        b[i] = row.iter().zip(&x_true).map(|(a, x)| a * x).sum();
    }

    (LinearSystem { a, b }, x_true)
}

/// Render a matrix in the whitespace-separated input format
pub fn format_matrix(a: &DenseMatrix) -> String {
    let mut out = String::with_capacity(a.size() * a.size() * 12);
    for i in 0..a.size() {
        for (j, v) in a.row(i).iter().enumerate() {
            if j > 0 {
                out.push(' ');
            }
            let _ = write!(out, "{:.8}", v);
        }
        out.push('\n');
    }
    out
}

/// Render a vector one entry per line
pub fn format_vector(v: &[f64]) -> String {
    let mut out = String::with_capacity(v.len() * 14);
    for value in v {
        let _ = writeln!(out, "{:.8}", value);
    }
    out
}

/// Write `A`, `b` and a nodes file listing `nodes` copies of `node_address`
pub fn write_system_files(
    system: &LinearSystem,
    matrix_path: &Path,
    vector_path: &Path,
    nodes_path: Option<(&Path, usize, &str)>,
) -> Result<()> {
    std::fs::write(matrix_path, format_matrix(&system.a))
        .with_context(|| format!("Failed to write matrix file: {}", matrix_path.display()))?;
    std::fs::write(vector_path, format_vector(&system.b))
        .with_context(|| format!("Failed to write vector file: {}", vector_path.display()))?;

    if let Some((path, count, address)) = nodes_path {
        let contents: String = (0..count).map(|_| format!("{}\n", address)).collect();
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write nodes file: {}", path.display()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::input::{parse_matrix, parse_vector};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_dominance() {
        let mut rng = StdRng::seed_from_u64(7);
        let (system, _) = diagonally_dominant(25, &mut rng);
        for i in 0..25 {
            let row = system.a.row(i);
            let off: f64 = row.iter().enumerate().filter(|(j, _)| *j != i).map(|(_, v)| v.abs()).sum();
            assert!(row[i].abs() > off);
        }
    }

    #[test]
    fn test_exact_solution() {
        let mut rng = StdRng::seed_from_u64(11);
        let (system, x_true) = diagonally_dominant(10, &mut rng);
        let ax = system.a.mul_vec(&x_true);
        for (l, r) in ax.iter().zip(&system.b) {
            assert!((l - r).abs() < 1e-9);
        }
    }

    #[test]
    fn test_files_parse_back() {
        let mut rng = StdRng::seed_from_u64(3);
        let (system, _) = diagonally_dominant(4, &mut rng);
        let dir = tempfile::tempdir().unwrap();
        let a_path = dir.path().join("A.txt");
        let b_path = dir.path().join("b.txt");
        let n_path = dir.path().join("nodes.txt");
        write_system_files(&system, &a_path, &b_path, Some((&n_path, 3, "127.0.0.1"))).unwrap();

        let b = parse_vector(&std::fs::read_to_string(&b_path).unwrap(), &b_path).unwrap();
        let a = parse_matrix(&std::fs::read_to_string(&a_path).unwrap(), &a_path, b.len()).unwrap();
        assert_eq!(a.size(), 4);
        assert!((a.get(2, 2) - system.a.get(2, 2)).abs() < 1e-7);

        let nodes = std::fs::read_to_string(&n_path).unwrap();
        assert_eq!(nodes.lines().count(), 3);
    }
}
