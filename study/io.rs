//! # Matrix Files
//!
//! CSV reading and writing for loadings, priors, scaling vectors and similar matrices. Every file
//! has a header row. When the first header cell is empty or named `variable`, the first column
//! holds row labels. Cells written as `NA` or left empty are missing; priors read them as "no
//! constraint", every other matrix rejects them.

use ndarray::{Array1, Array2, ArrayView2};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatrixIoError {
    #[error("Error reading or writing CSV data: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("The file contains no data rows.")]
    Empty,
    #[error("Row {row} has {found} value columns, but the header declares {expected}.")]
    Ragged {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("Cell ({row}, {col}) holds '{value}', which is not a number.")]
    Parse {
        row: usize,
        col: usize,
        value: String,
    },
    #[error("Cell ({row}, {col}) is missing, but this matrix requires every value.")]
    MissingValue { row: usize, col: usize },
    #[error("Expected a single column of values, but the file has {0} columns.")]
    NotAVector(usize),
}

/// A parsed matrix with its column names and optional row labels.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledMatrix<T> {
    pub columns: Vec<String>,
    pub row_names: Option<Vec<String>>,
    pub values: Array2<T>,
}

fn parse_cell(raw: &str, row: usize, col: usize) -> Result<Option<f64>, MatrixIoError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("na") || trimmed.eq_ignore_ascii_case("nan")
    {
        return Ok(None);
    }
    trimmed
        .parse::<f64>()
        .map(Some)
        .map_err(|_| MatrixIoError::Parse {
            row,
            col,
            value: trimmed.to_string(),
        })
}

fn is_label_header(cell: &str) -> bool {
    let cell = cell.trim();
    cell.is_empty() || cell.eq_ignore_ascii_case("variable")
}

/// Reads a matrix whose cells may be missing.
pub fn read_optional_matrix_from<R: Read>(
    reader: R,
) -> Result<LabeledMatrix<Option<f64>>, MatrixIoError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let header: Vec<String> = csv_reader.headers()?.iter().map(str::to_string).collect();
    let labeled = header.first().is_some_and(|h| is_label_header(h));
    let offset = usize::from(labeled);
    let columns: Vec<String> = header[offset..].to_vec();

    let mut row_names = Vec::new();
    let mut cells: Vec<Option<f64>> = Vec::new();
    let mut n_rows = 0;
    for (row, record) in csv_reader.records().enumerate() {
        let record = record?;
        let found = record.len().saturating_sub(offset);
        if found != columns.len() {
            return Err(MatrixIoError::Ragged {
                row,
                expected: columns.len(),
                found,
            });
        }
        if labeled {
            row_names.push(record.get(0).unwrap_or_default().to_string());
        }
        for (col, raw) in record.iter().skip(offset).enumerate() {
            cells.push(parse_cell(raw, row, col)?);
        }
        n_rows += 1;
    }
    if n_rows == 0 {
        return Err(MatrixIoError::Empty);
    }

    let values = Array2::from_shape_vec((n_rows, columns.len()), cells)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(LabeledMatrix {
        columns,
        row_names: labeled.then_some(row_names),
        values,
    })
}

/// Reads a matrix where every cell must be present.
pub fn read_matrix_from<R: Read>(reader: R) -> Result<LabeledMatrix<f64>, MatrixIoError> {
    let optional = read_optional_matrix_from(reader)?;
    if let Some(((row, col), _)) = optional.values.indexed_iter().find(|(_, v)| v.is_none()) {
        return Err(MatrixIoError::MissingValue { row, col });
    }
    Ok(LabeledMatrix {
        columns: optional.columns,
        row_names: optional.row_names,
        values: optional.values.mapv(|v| v.unwrap_or(f64::NAN)),
    })
}

pub fn read_optional_matrix(path: &Path) -> Result<LabeledMatrix<Option<f64>>, MatrixIoError> {
    read_optional_matrix_from(File::open(path)?)
}

pub fn read_matrix(path: &Path) -> Result<LabeledMatrix<f64>, MatrixIoError> {
    read_matrix_from(File::open(path)?)
}

/// Reads a single-column file (for example a scaling vector).
pub fn read_vector(path: &Path) -> Result<Array1<f64>, MatrixIoError> {
    let matrix = read_matrix(path)?;
    if matrix.values.ncols() != 1 {
        return Err(MatrixIoError::NotAVector(matrix.values.ncols()));
    }
    Ok(matrix.values.column(0).to_owned())
}

/// Writes a matrix with a header row; missing cells are written as `NA`.
pub fn write_optional_matrix<W: Write>(
    writer: W,
    columns: &[String],
    row_names: Option<&[String]>,
    values: ArrayView2<Option<f64>>,
) -> Result<(), MatrixIoError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    let mut header: Vec<String> = Vec::with_capacity(columns.len() + 1);
    if row_names.is_some() {
        header.push("variable".to_string());
    }
    header.extend(columns.iter().cloned());
    csv_writer.write_record(&header)?;

    for (i, row) in values.outer_iter().enumerate() {
        let mut record: Vec<String> = Vec::with_capacity(header.len());
        if let Some(names) = row_names {
            record.push(names.get(i).cloned().unwrap_or_default());
        }
        record.extend(
            row.iter()
                .map(|v| v.map_or_else(|| "NA".to_string(), |x| x.to_string())),
        );
        csv_writer.write_record(&record)?;
    }
    csv_writer.flush()?;
    Ok(())
}
