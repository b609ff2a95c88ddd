//! Row and column hygiene applied before any encoding takes place.

use super::{FrameError, TRAINING_FLAG, text_column_names, window_flags};
use ahash::AHashMap;
use polars::prelude::*;

/// Columns whose names end with this suffix hold timestamps and are never modeled.
pub const TIMESTAMP_SUFFIX: &str = "DTS";
/// The literal text that upstream extracts use in place of a missing value.
pub const NULL_SENTINEL: &str = "NULL";

/// Drops every column whose name carries the timestamp suffix.
pub fn strip_timestamp_columns(df: DataFrame) -> Result<DataFrame, FrameError> {
    let (dropped, kept): (Vec<String>, Vec<String>) = df
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .partition(|name| name.ends_with(TIMESTAMP_SUFFIX));

    if dropped.is_empty() {
        return Ok(df);
    }
    log::debug!("Removing timestamp columns: {dropped:?}");
    Ok(df.select(kept)?)
}

/// Replaces the [`NULL_SENTINEL`] text with a real missing value.
///
/// A text column that only ever held numbers and sentinels is converted to a
/// Float64 column afterwards, so that it is modeled as a number rather than
/// exploded into dummy columns.
pub fn normalize_null_sentinels(mut df: DataFrame) -> Result<DataFrame, FrameError> {
    for name in text_column_names(&df) {
        let replaced: StringChunked = df
            .column(&name)?
            .str()?
            .into_iter()
            .map(|value| value.filter(|text| *text != NULL_SENTINEL))
            .collect();
        let normalized = recover_numeric(replaced.with_name(name.as_str().into()));
        if normalized.dtype() == &DataType::Float64 {
            log::debug!("Column '{name}' holds only numbers once sentinels are removed");
        }
        df.with_column(normalized)?;
    }
    Ok(df)
}

/// Parses a text column as Float64 when every present value is numeric.
fn recover_numeric(text: StringChunked) -> Series {
    if text.null_count() == text.len() {
        return text.into_series();
    }

    let parsed: Option<Vec<Option<f64>>> = text
        .into_iter()
        .map(|value| match value {
            None => Some(None),
            Some(raw) => raw.trim().parse::<f64>().ok().map(Some),
        })
        .collect();

    match parsed {
        Some(values) => {
            let numbers: Float64Chunked = values.into_iter().collect();
            numbers.with_name(text.name().clone()).into_series()
        }
        None => text.into_series(),
    }
}

/// Fills missing values column by column.
///
/// Numeric columns receive their mean and text columns their most frequent value.
/// Columns without any present value are left untouched.
pub fn impute_missing(mut df: DataFrame) -> Result<DataFrame, FrameError> {
    let names: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .collect();

    for name in names {
        let column = df.column(&name)?;
        let missing = column.null_count();
        if missing == 0 || missing == column.len() {
            continue;
        }

        let filled = if column.dtype() == &DataType::String {
            let text = column.str()?;
            let mode = most_frequent(text);
            let values: StringChunked = text
                .into_iter()
                .map(|value| value.or(mode.as_deref()))
                .collect();
            values.with_name(name.as_str().into()).into_series()
        } else {
            let numbers = column.cast(&DataType::Float64)?;
            let numbers = numbers.f64()?;
            let mean = numbers.mean();
            let values: Float64Chunked = numbers.into_iter().map(|value| value.or(mean)).collect();
            values.with_name(name.as_str().into()).into_series()
        };

        log::debug!("Imputed {missing} missing values in column '{name}'");
        df.with_column(filled)?;
    }
    Ok(df)
}

/// The most frequent present value; ties go to the value seen first.
fn most_frequent(text: &StringChunked) -> Option<String> {
    let mut counts: AHashMap<&str, (usize, usize)> = AHashMap::new();
    for (position, value) in text.into_iter().enumerate() {
        if let Some(value) = value {
            counts.entry(value).or_insert((0, position)).0 += 1;
        }
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.0.cmp(&b.1.0).then(b.1.1.cmp(&a.1.1)))
        .map(|(value, _)| value.to_string())
}

/// Removes training rows that contain any missing value.
///
/// Rows awaiting prediction are kept exactly as they are, as are rows whose window
/// flag is neither training nor prediction; those are dealt with at partition time.
pub fn drop_incomplete_training_rows(
    df: DataFrame,
    window_column: &str,
) -> Result<DataFrame, FrameError> {
    let flags = window_flags(&df, window_column)?;

    let mut complete = vec![true; df.height()];
    for column in df.get_columns() {
        if column.null_count() == 0 {
            continue;
        }
        for (row, is_null) in column.is_null().into_iter().enumerate() {
            if is_null == Some(true) {
                complete[row] = false;
            }
        }
    }

    let keep: BooleanChunked = flags
        .iter()
        .zip(complete.iter())
        .map(|(flag, &is_complete)| is_complete || flag.as_deref() != Some(TRAINING_FLAG))
        .collect();

    let before = df.height();
    let filtered = df.filter(&keep)?;
    log::debug!(
        "Dropped {} training rows containing missing values ({} rows remain)",
        before - filtered.height(),
        filtered.height()
    );
    Ok(filtered)
}
