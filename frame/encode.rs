//! Turns a cleaned DataFrame into numeric training and test partitions.

use super::{
    FeatureMatrix, FrameError, PREDICTION_FLAG, TRAINING_FLAG, require_column, window_flags,
};
use itertools::Itertools;
use ndarray::{Array1, Array2};
use polars::prelude::*;

/// The numeric partitions that every estimator consumes.
#[derive(Debug, Clone)]
pub struct Partitions {
    pub x_train: FeatureMatrix,
    pub y_train: Array1<f64>,
    pub x_test: FeatureMatrix,
}

/// Converts a `Y`/`N` target column into 1.0/0.0.
///
/// Missing values stay missing. A target that is already numeric is accepted only if
/// every present value is 0 or 1.
pub fn binarize_target(mut df: DataFrame, predicted_column: &str) -> Result<DataFrame, FrameError> {
    let column = require_column(&df, predicted_column)?;
    let mut binary: Vec<Option<f64>> = Vec::with_capacity(column.len());

    if column.dtype() == &DataType::String {
        for value in column.str()?.into_iter() {
            binary.push(match value {
                None => None,
                Some("Y") => Some(1.0),
                Some("N") => Some(0.0),
                Some(other) => {
                    return Err(FrameError::TargetNotBinary {
                        column_name: predicted_column.to_string(),
                        value: other.to_string(),
                    });
                }
            });
        }
    } else {
        let numbers = column.cast(&DataType::Float64)?;
        for value in numbers.f64()?.into_iter() {
            if let Some(number) = value {
                if number != 0.0 && number != 1.0 {
                    return Err(FrameError::TargetNotBinary {
                        column_name: predicted_column.to_string(),
                        value: number.to_string(),
                    });
                }
            }
            binary.push(value);
        }
    }

    let binary: Float64Chunked = binary.into_iter().collect();
    df.with_column(binary.with_name(predicted_column.into()).into_series())?;
    log::debug!("Converted '{predicted_column}' from Y/N to 1/0");
    Ok(df)
}

/// Converts a regression target column to Float64, rejecting non-numeric text.
pub fn numeric_target(mut df: DataFrame, predicted_column: &str) -> Result<DataFrame, FrameError> {
    let column = require_column(&df, predicted_column)?;
    let numbers = column
        .as_materialized_series()
        .strict_cast(&DataType::Float64)
        .map_err(|_| FrameError::ColumnWrongType {
            column_name: predicted_column.to_string(),
            expected_type: "f64 (numeric)",
            found_type: format!("{:?}", column.dtype()),
        })?;
    df.with_column(numbers)?;
    Ok(df)
}

/// Splits the grain identifiers of the rows awaiting prediction off the frame.
///
/// Returns the frame without the grain column together with one identifier per
/// prediction row, in row order.
pub fn split_grain(
    df: DataFrame,
    grain_column: &str,
    window_column: &str,
) -> Result<(DataFrame, Vec<i64>), FrameError> {
    let flags = window_flags(&df, window_column)?;
    let column = require_column(&df, grain_column)?;
    let invalid = |value: String| FrameError::GrainNotInteger {
        column_name: grain_column.to_string(),
        value,
    };

    // Only rows awaiting prediction are converted; training grains are dropped unused.
    let identifiers: Vec<Option<Result<i64, String>>> = if column.dtype() == &DataType::String {
        column
            .str()?
            .into_iter()
            .map(|value| value.map(|raw| raw.trim().parse::<i64>().map_err(|_| raw.to_string())))
            .collect()
    } else {
        let numbers = column.cast(&DataType::Float64)?;
        numbers
            .f64()?
            .into_iter()
            .map(|value| {
                value.map(|number| {
                    if number.is_finite() && number.fract() == 0.0 {
                        Ok(number as i64)
                    } else {
                        Err(number.to_string())
                    }
                })
            })
            .collect()
    };

    let mut grain = Vec::new();
    for (flag, identifier) in flags.iter().zip(identifiers) {
        if flag.as_deref() != Some(PREDICTION_FLAG) {
            continue;
        }
        match identifier {
            Some(parsed) => grain.push(parsed.map_err(invalid)?),
            None => return Err(FrameError::MissingValuesFound(grain_column.to_string())),
        }
    }

    log::debug!("Split {} grain identifiers off the prediction rows", grain.len());
    Ok((df.drop(grain_column)?, grain))
}

/// Replaces every text column not listed in `keep` by dummy indicator columns.
///
/// Categories are sorted ascending and the first one is dropped. Dummy columns are
/// named `<column>.<category>` and follow all retained columns, grouped by source
/// column in frame order. A missing value encodes as zero in every dummy.
pub fn one_hot_encode(df: DataFrame, keep: &[&str]) -> Result<DataFrame, FrameError> {
    let mut retained: Vec<Column> = Vec::new();
    let mut dummies: Vec<Column> = Vec::new();

    for column in df.get_columns() {
        let name = column.name().as_str();
        if keep.contains(&name) || column.dtype() != &DataType::String {
            retained.push(column.clone());
            continue;
        }

        let text = column.str()?;
        let categories: Vec<&str> = text.into_iter().flatten().sorted_unstable().dedup().collect();
        for category in categories.iter().skip(1) {
            let indicator: Float64Chunked = text
                .into_iter()
                .map(|value| Some(if value == Some(*category) { 1.0 } else { 0.0 }))
                .collect();
            dummies.push(
                indicator
                    .with_name(format!("{name}.{category}").into())
                    .into_series()
                    .into(),
            );
        }
        log::debug!(
            "Encoded '{name}' into {} dummy columns",
            categories.len().saturating_sub(1)
        );
    }

    retained.extend(dummies);
    Ok(DataFrame::new(retained)?)
}

/// Partitions rows into training and test matrices by their window flag.
///
/// Training rows whose target is missing are dropped; rows with an unknown window
/// flag are dropped from both partitions. The window and target columns are excluded
/// from the features.
pub fn partition(
    df: &DataFrame,
    window_column: &str,
    predicted_column: &str,
) -> Result<Partitions, FrameError> {
    let flags = window_flags(df, window_column)?;
    let target = require_column(df, predicted_column)?.cast(&DataType::Float64)?;
    let target = target.f64()?;

    let mut train_rows = Vec::new();
    let mut test_rows = Vec::new();
    let mut unlabeled = 0usize;
    let mut unknown_window = 0usize;
    for (row, flag) in flags.iter().enumerate() {
        match flag.as_deref() {
            Some(TRAINING_FLAG) if target.get(row).is_some() => train_rows.push(row),
            Some(TRAINING_FLAG) => unlabeled += 1,
            Some(PREDICTION_FLAG) => test_rows.push(row),
            _ => unknown_window += 1,
        }
    }
    if unlabeled > 0 {
        log::debug!("Removed {unlabeled} training rows where '{predicted_column}' is missing");
    }
    if unknown_window > 0 {
        log::warn!(
            "Ignoring {unknown_window} rows whose '{window_column}' flag is neither {TRAINING_FLAG} nor {PREDICTION_FLAG}"
        );
    }
    if train_rows.is_empty() {
        return Err(FrameError::EmptyPartition("training"));
    }

    let mut features: Vec<(String, Vec<Option<f64>>)> = Vec::new();
    for column in df.get_columns() {
        let name = column.name().as_str();
        if name == window_column || name == predicted_column {
            continue;
        }
        let numbers = column
            .as_materialized_series()
            .strict_cast(&DataType::Float64)
            .map_err(|_| FrameError::ColumnWrongType {
                column_name: name.to_string(),
                expected_type: "f64 (numeric)",
                found_type: format!("{:?}", column.dtype()),
            })?;
        features.push((name.to_string(), numbers.f64()?.into_iter().collect()));
    }

    let names: Vec<String> = features.iter().map(|(name, _)| name.clone()).collect();
    let y_train: Array1<f64> = train_rows
        .iter()
        .filter_map(|&row| target.get(row))
        .collect();

    let partitions = Partitions {
        x_train: FeatureMatrix {
            names: names.clone(),
            values: gather_rows(&features, &train_rows)?,
        },
        y_train,
        x_test: FeatureMatrix {
            names,
            values: gather_rows(&features, &test_rows)?,
        },
    };

    log::info!(
        "Training partition: {} rows x {} features; test partition: {} rows",
        partitions.x_train.nrows(),
        partitions.x_train.ncols(),
        partitions.x_test.nrows()
    );
    Ok(partitions)
}

/// Copies the selected rows of every feature column into a dense row-major matrix.
fn gather_rows(
    features: &[(String, Vec<Option<f64>>)],
    rows: &[usize],
) -> Result<Array2<f64>, FrameError> {
    let mut values = Array2::zeros((rows.len(), features.len()));
    for (j, (name, column)) in features.iter().enumerate() {
        for (i, &row) in rows.iter().enumerate() {
            let value = column[row].ok_or_else(|| FrameError::MissingValuesFound(name.clone()))?;
            if !value.is_finite() {
                return Err(FrameError::NonFiniteValuesFound(name.clone()));
            }
            values[[i, j]] = value;
        }
    }
    Ok(values)
}
