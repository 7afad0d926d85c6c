//! Input file parsing
//!
//! # Formats
//!
//! - Matrix: one row per line, entries separated by whitespace
//! - Vector: one entry per line
//! - Nodes: one worker address per line, `#` starts a comment line
//!
//! Blank lines are skipped everywhere. Numbers use `.` as the decimal separator.

use super::{DenseMatrix, LinearSystem};
use crate::error::InputError;
use std::path::Path;

/// Parse vector text
pub fn parse_vector(text: &str, path: &Path) -> Result<Vec<f64>, InputError> {
    let mut values = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        values.push(parse_number(trimmed, path, idx + 1)?);
    }

    if values.is_empty() {
        return Err(InputError::Empty { path: path.to_path_buf() });
    }
    Ok(values)
}

/// Parse matrix text, requiring `expected` rows of `expected` entries
pub fn parse_matrix(text: &str, path: &Path, expected: usize) -> Result<DenseMatrix, InputError> {
    let mut rows = Vec::with_capacity(expected);
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let row = line
            .split_whitespace()
            .map(|token| parse_number(token, path, idx + 1))
            .collect::<Result<Vec<f64>, _>>()?;
        if row.len() != expected {
            return Err(InputError::Dimension(format!(
                "{}:{}: row has {} entries, vector has {}",
                path.display(),
                idx + 1,
                row.len(),
                expected
            )));
        }
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(InputError::Empty { path: path.to_path_buf() });
    }
    if rows.len() != expected {
        return Err(InputError::Dimension(format!(
            "{} has {} rows, vector has {} entries",
            path.display(),
            rows.len(),
            expected
        )));
    }

    DenseMatrix::from_rows(rows)
}

/// Parse nodes text into addresses
pub fn parse_nodes(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Read `A` and `b`; the vector fixes the dimension
pub async fn read_system(matrix_path: &Path, vector_path: &Path) -> Result<LinearSystem, InputError> {
    let vector_text = read_text(vector_path).await?;
    let b = parse_vector(&vector_text, vector_path)?;

    let matrix_text = read_text(matrix_path).await?;
    let a = parse_matrix(&matrix_text, matrix_path, b.len())?;

    LinearSystem::new(a, b)
}

/// Read worker addresses from a nodes file
pub async fn read_nodes(path: &Path) -> Result<Vec<String>, InputError> {
    let text = read_text(path).await?;
    let nodes = parse_nodes(&text);
    if nodes.is_empty() {
        return Err(InputError::Empty { path: path.to_path_buf() });
    }
    Ok(nodes)
}

async fn read_text(path: &Path) -> Result<String, InputError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| InputError::Read { path: path.to_path_buf(), source })
}

fn parse_number(token: &str, path: &Path, line: usize) -> Result<f64, InputError> {
    token.parse::<f64>().map_err(|_| InputError::Parse {
        path: path.to_path_buf(),
        line,
        token: token.to_string(),
    })
}
