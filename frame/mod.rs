//! # Tabular Preparation
//!
//! Everything between the raw input file and the numeric matrices handed to the
//! estimators lives here. The working dataset stays a `polars` `DataFrame` while it
//! is cleaned and encoded; only the final partitioning step leaves the DataFrame
//! world and produces `ndarray` structures.
//!
//! - `load`: reads the delimited input file.
//! - `clean`: drops timestamp columns, normalizes null sentinels, and either
//!   imputes or removes incomplete training rows.
//! - `encode`: binarizes the target, splits off the grain column, one-hot encodes
//!   categoricals, and partitions rows into training and test sets.

pub mod clean;
pub mod encode;
pub mod load;

pub use encode::Partitions;

use ndarray::Array2;
use polars::prelude::*;
use thiserror::Error;

/// Window flag marking a row that belongs to the training partition.
pub const TRAINING_FLAG: &str = "N";
/// Window flag marking a row that is awaiting a prediction.
pub const PREDICTION_FLAG: &str = "Y";

/// A dense numeric feature matrix together with its column names.
///
/// Column `j` of `values` is described by `names[j]`. Training and test matrices
/// produced by the same preparation run always share identical names.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    pub names: Vec<String>,
    pub values: Array2<f64>,
}

impl FeatureMatrix {
    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }
}

/// A comprehensive error type for all loading, cleaning, and encoding failures.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("The input file '{0}' contains a header but no data rows.")]
    EmptyInput(String),
    #[error(
        "The required column '{0}' was not found in the input data. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error(
        "The column '{column_name}' could not be converted to the expected type '{expected_type}'. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error(
        "Missing values remain in the feature column '{0}'. Enable imputation or clean the input data."
    )]
    MissingValuesFound(String),
    #[error("Non-finite values (NaN or Infinity) were found in the feature column '{0}'.")]
    NonFiniteValuesFound(String),
    #[error(
        "The predicted column '{column_name}' must only contain Y or N for classification, but found '{value}'."
    )]
    TargetNotBinary { column_name: String, value: String },
    #[error("The grain column '{column_name}' must hold integer identifiers, but found '{value}'.")]
    GrainNotInteger { column_name: String, value: String },
    #[error("The {0} partition is empty after preparation; nothing can be fitted.")]
    EmptyPartition(&'static str),
}

/// Looks up a column by name, reporting a user-facing error when it is absent.
pub(crate) fn require_column<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Column, FrameError> {
    match df.get_column_index(name) {
        Some(index) => Ok(&df.get_columns()[index]),
        None => Err(FrameError::ColumnNotFound(name.to_string())),
    }
}

/// Reads the window column as owned flags, one per row.
pub(crate) fn window_flags(
    df: &DataFrame,
    window_column: &str,
) -> Result<Vec<Option<String>>, FrameError> {
    let column = require_column(df, window_column)?;
    if column.dtype() != &DataType::String {
        return Err(FrameError::ColumnWrongType {
            column_name: window_column.to_string(),
            expected_type: "text flag (Y or N)",
            found_type: format!("{:?}", column.dtype()),
        });
    }
    Ok(column
        .str()?
        .into_iter()
        .map(|flag| flag.map(str::to_string))
        .collect())
}

/// Names of all text-typed columns, in frame order.
pub(crate) fn text_column_names(df: &DataFrame) -> Vec<String> {
    df.get_columns()
        .iter()
        .filter(|column| column.dtype() == &DataType::String)
        .map(|column| column.name().to_string())
        .collect()
}
