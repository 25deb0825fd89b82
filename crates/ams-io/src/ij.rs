//! IJ text format for distributed sparse matrices and vectors.
//!
//! Each process owns one file per object. A matrix file starts with the
//! owned row range and the column range, followed by one `row col value`
//! triple per line:
//!
//! ```text
//! 0 3 0 3
//! 0 0 2.0
//! 0 1 -1.0
//! ...
//! ```
//!
//! A vector file starts with the owned index range, followed by one
//! `index value` pair per line. Ranges are inclusive and 0-based. Blank
//! lines and lines starting with `#` are ignored.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CsrMatrix};

use crate::error::{IoError, Result};

/// Reads a sparse matrix in IJ text format.
pub fn read_matrix(path: impl AsRef<Path>) -> Result<CsrMatrix<f64>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let mut lines = data_lines(&text);

    let (header_no, header) = lines
        .next()
        .ok_or_else(|| IoError::Format(format!("{}: empty matrix file", path.display())))?;
    let range = parse_fields::<i64>(path, header_no, header, 4)?;
    let (ilower, iupper, jlower, jupper) = (range[0], range[1], range[2], range[3]);
    let nrows = range_len(path, header_no, ilower, iupper)?;
    let ncols = range_len(path, header_no, jlower, jupper)?;

    let mut coo = CooMatrix::new(nrows, ncols);
    for (line_no, line) in lines {
        let (row, col, value) = parse_triple(path, line_no, line)?;
        let local_row = row - ilower;
        let local_col = col - jlower;
        if local_row < 0 || local_row as usize >= nrows || local_col < 0 || local_col as usize >= ncols
        {
            return Err(IoError::Parse {
                path: path.to_path_buf(),
                line: line_no,
                message: format!("entry ({row}, {col}) outside [{ilower},{iupper}]x[{jlower},{jupper}]"),
            });
        }
        coo.push(local_row as usize, local_col as usize, value);
    }

    Ok(CsrMatrix::from(&coo))
}

/// Reads a dense vector in IJ text format.
pub fn read_vector(path: impl AsRef<Path>) -> Result<DVector<f64>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let mut lines = data_lines(&text);

    let (header_no, header) = lines
        .next()
        .ok_or_else(|| IoError::Format(format!("{}: empty vector file", path.display())))?;
    let range = parse_fields::<i64>(path, header_no, header, 2)?;
    let (lower, upper) = (range[0], range[1]);
    let len = range_len(path, header_no, lower, upper)?;

    let mut values = DVector::zeros(len);
    for (line_no, line) in lines {
        let mut fields = line.split_whitespace();
        let index: i64 = parse_field(path, line_no, fields.next())?;
        let value: f64 = parse_field(path, line_no, fields.next())?;
        let local = index - lower;
        if local < 0 || local as usize >= len {
            return Err(IoError::Parse {
                path: path.to_path_buf(),
                line: line_no,
                message: format!("index {index} outside [{lower},{upper}]"),
            });
        }
        values[local as usize] = value;
    }

    Ok(values)
}

/// Writes a sparse matrix in IJ text format, owning all rows.
pub fn write_matrix(path: impl AsRef<Path>, matrix: &CsrMatrix<f64>) -> Result<()> {
    let file = fs::File::create(path)?;
    let mut out = BufWriter::new(file);
    writeln!(
        out,
        "0 {} 0 {}",
        matrix.nrows() as i64 - 1,
        matrix.ncols() as i64 - 1
    )?;
    for (row, col, value) in matrix.triplet_iter() {
        writeln!(out, "{row} {col} {value:.16e}")?;
    }
    out.flush()?;
    Ok(())
}

/// Writes a dense vector in IJ text format.
pub fn write_vector(path: impl AsRef<Path>, vector: &DVector<f64>) -> Result<()> {
    let file = fs::File::create(path)?;
    let mut out = BufWriter::new(file);
    writeln!(out, "0 {}", vector.len() as i64 - 1)?;
    for (index, value) in vector.iter().enumerate() {
        writeln!(out, "{index} {value:.16e}")?;
    }
    out.flush()?;
    Ok(())
}

fn data_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
}

fn range_len(path: &Path, line: usize, lower: i64, upper: i64) -> Result<usize> {
    if upper < lower - 1 {
        return Err(IoError::Parse {
            path: path.to_path_buf(),
            line,
            message: format!("invalid range [{lower},{upper}]"),
        });
    }
    Ok((upper - lower + 1) as usize)
}

fn parse_triple(path: &Path, line_no: usize, line: &str) -> Result<(i64, i64, f64)> {
    let mut fields = line.split_whitespace();
    let row = parse_field(path, line_no, fields.next())?;
    let col = parse_field(path, line_no, fields.next())?;
    let value = parse_field(path, line_no, fields.next())?;
    Ok((row, col, value))
}

fn parse_fields<T: std::str::FromStr>(
    path: &Path,
    line_no: usize,
    line: &str,
    count: usize,
) -> Result<Vec<T>> {
    let mut fields = line.split_whitespace();
    (0..count)
        .map(|_| parse_field(path, line_no, fields.next()))
        .collect()
}

fn parse_field<T: std::str::FromStr>(
    path: &Path,
    line_no: usize,
    field: Option<&str>,
) -> Result<T> {
    let field = field.ok_or_else(|| IoError::Parse {
        path: path.to_path_buf(),
        line: line_no,
        message: "missing field".to_string(),
    })?;
    field.parse().map_err(|_| IoError::Parse {
        path: path.to_path_buf(),
        line: line_no,
        message: format!("cannot parse '{field}'"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn reads_matrix_and_sums_duplicates() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("aFEM.A.00000");
        fs::write(&path, "0 1 0 1\n0 0 2.0\n0 0 1.0\n\n# comment\n1 0 -1.0\n1 1 4.0\n")
            .expect("write matrix");

        let a = read_matrix(&path).expect("matrix should parse");
        assert_eq!((a.nrows(), a.ncols()), (2, 2));
        let dense = nalgebra::DMatrix::from(&a);
        assert_eq!(dense[(0, 0)], 3.0);
        assert_eq!(dense[(1, 0)], -1.0);
        assert_eq!(dense[(0, 1)], 0.0);
        assert_eq!(dense[(1, 1)], 4.0);
    }

    #[test]
    fn rectangular_matrix_keeps_column_range() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("aFEM.G.00000");
        fs::write(&path, "0 1 0 2\n0 0 -1\n0 2 1\n1 1 -1\n1 2 1\n").expect("write gradient");

        let g = read_matrix(&path).expect("gradient should parse");
        assert_eq!((g.nrows(), g.ncols()), (2, 3));
        assert_eq!(g.nnz(), 4);
    }

    #[test]
    fn entry_outside_range_is_reported_with_line() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("bad.A.00000");
        fs::write(&path, "0 1 0 1\n0 0 1.0\n5 0 1.0\n").expect("write matrix");

        match read_matrix(&path) {
            Err(IoError::Parse { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn vector_written_then_read_matches() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("aFEM.x0.00000");
        let v = DVector::from_vec(vec![1.5, -2.25, 1e-300]);
        write_vector(&path, &v).expect("write vector");
        let back = read_vector(&path).expect("read vector");
        assert_eq!(v, back);
    }

    #[test]
    fn malformed_value_is_a_parse_error() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("aFEM.b.00000");
        fs::write(&path, "0 1\n0 1.0\n1 abc\n").expect("write vector");
        assert!(matches!(read_vector(&path), Err(IoError::Parse { line: 3, .. })));
    }
}
