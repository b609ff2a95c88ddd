//! # Supervised Deployment
//!
//! The end-to-end workflow: prepare a dataset once, then score its prediction rows
//! and write them to the destination table.
//!
//! ```text
//! prepare:  strip *DTS -> NULL to missing -> impute | drop -> target -> grain
//!           -> one-hot -> partition
//! deploy:   probe destination -> fit | load model -> score -> fit | load factor
//!           model -> top factors -> output rows -> insert
//! ```

use crate::frame::clean::{
    drop_incomplete_training_rows, impute_missing, normalize_null_sentinels,
    strip_timestamp_columns,
};
use crate::frame::encode::{
    binarize_target, numeric_target, one_hot_encode, partition, split_grain,
};
use crate::frame::{FrameError, Partitions};
use crate::learn::factors::{TopFactors, fit_or_load_factors};
use crate::learn::{ForestSettings, Method, ModelError, ModelType, fit_or_load};
use crate::store::{
    BINDING_ID, BINDING_NAME, Destination, PredictionRow, StoreError, load_timestamp,
    validate_destination, write_predictions,
};
use ndarray::ArrayView1;
use polars::prelude::DataFrame;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

/// How the raw dataset is turned into partitions.
#[derive(Debug, Clone)]
pub struct PrepareSettings {
    pub model_type: ModelType,
    /// Row identifier copied to the output and excluded from the features.
    pub grain_column: String,
    /// `N` marks a training row, `Y` a row awaiting prediction.
    pub window_column: String,
    pub predicted_column: String,
    /// Fill missing values instead of dropping incomplete training rows.
    pub impute: bool,
}

/// How the model is obtained and where its output goes.
#[derive(Debug, Clone)]
pub struct DeploySettings {
    pub method: Method,
    pub cores: usize,
    pub database: PathBuf,
    pub destination_table: String,
    pub trees: usize,
    pub mtry: Option<usize>,
    pub use_saved_model: bool,
    pub model_dir: PathBuf,
    pub seed: Option<u64>,
    pub verbose: bool,
}

#[derive(Error, Debug)]
pub enum DeployError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Could not prepare the model directory: {0}")]
    Io(#[from] std::io::Error),
    #[error(
        "Output rows cannot be assembled: {grain} grain values, {predictions} predictions, and {factors} factor sets."
    )]
    RowCountMismatch {
        grain: usize,
        predictions: usize,
        factors: usize,
    },
}

/// The outcome of a deployment run.
#[derive(Debug, Clone)]
pub struct DeployReport {
    pub rows: Vec<PredictionRow>,
    pub written: usize,
}

/// A prepared dataset that is ready to be scored.
#[derive(Debug)]
pub struct SupervisedDeployment {
    settings: PrepareSettings,
    partitions: Partitions,
    grain_test: Vec<i64>,
}

impl SupervisedDeployment {
    /// Cleans and encodes `df`, then splits it into training and test partitions.
    pub fn prepare(df: DataFrame, settings: PrepareSettings) -> Result<Self, DeployError> {
        log::info!(
            "Preparing {} rows for a {} model of '{}'",
            df.height(),
            settings.model_type,
            settings.predicted_column
        );

        let df = strip_timestamp_columns(df)?;
        let df = normalize_null_sentinels(df)?;
        let df = if settings.impute {
            impute_missing(df)?
        } else {
            drop_incomplete_training_rows(df, &settings.window_column)?
        };
        log::debug!("Dataframe after removing or imputing missing values:\n{}", df.head(Some(5)));

        let df = match settings.model_type {
            ModelType::Classification => binarize_target(df, &settings.predicted_column)?,
            ModelType::Regression => numeric_target(df, &settings.predicted_column)?,
        };

        let (df, grain_test) = split_grain(df, &settings.grain_column, &settings.window_column)?;
        let df = one_hot_encode(
            df,
            &[settings.window_column.as_str(), settings.predicted_column.as_str()],
        )?;
        log::debug!("Dataframe after one-hot encoding:\n{}", df.head(Some(5)));

        let partitions = partition(&df, &settings.window_column, &settings.predicted_column)?;
        if partitions.x_test.nrows() == 0 {
            log::warn!("No rows are flagged for prediction; nothing will be written");
        }

        Ok(Self {
            settings,
            partitions,
            grain_test,
        })
    }

    pub fn partitions(&self) -> &Partitions {
        &self.partitions
    }

    pub fn grain_test(&self) -> &[i64] {
        &self.grain_test
    }

    /// Scores the test partition and writes one row per test row to the destination.
    ///
    /// The destination is probed before any model is fitted, so a bad table name fails
    /// fast.
    pub fn deploy(&self, settings: &DeploySettings) -> Result<DeployReport, DeployError> {
        let model_type = self.settings.model_type;
        let destination = Destination {
            database: settings.database.clone(),
            table: settings.destination_table.clone(),
            grain_column: self.settings.grain_column.clone(),
            predicted_column: model_type.output_column().to_string(),
        };
        validate_destination(&destination)?;

        if !settings.use_saved_model {
            fs::create_dir_all(&settings.model_dir)?;
        }

        let forest = ForestSettings {
            trees: settings.trees,
            mtry: settings.mtry,
            cores: settings.cores,
            seed: settings.seed,
            verbose: settings.verbose,
        };
        let model = fit_or_load(
            model_type,
            settings.method,
            &self.partitions,
            &forest,
            settings.use_saved_model,
            &settings.model_dir,
        )?;
        let predictions = model.predict(&self.partitions.x_test)?;
        log::debug!(
            "First predictions: {:?}",
            predictions.iter().take(5).collect::<Vec<_>>()
        );

        let factor_model = fit_or_load_factors(
            model_type,
            &self.partitions,
            settings.use_saved_model,
            &settings.model_dir,
        )?;
        let factors = factor_model.top_three_factors(&self.partitions.x_test)?;

        let rows = build_output_rows(&self.grain_test, predictions.view(), factors, load_timestamp()?)?;
        let written = write_predictions(&destination, &rows)?;
        Ok(DeployReport { rows, written })
    }
}

/// Zips grain, prediction, and factors into destination rows that share one load
/// timestamp.
fn build_output_rows(
    grain: &[i64],
    predictions: ArrayView1<f64>,
    factors: Vec<TopFactors>,
    last_load_dts: String,
) -> Result<Vec<PredictionRow>, DeployError> {
    if grain.len() != predictions.len() || grain.len() != factors.len() {
        return Err(DeployError::RowCountMismatch {
            grain: grain.len(),
            predictions: predictions.len(),
            factors: factors.len(),
        });
    }

    Ok(grain
        .iter()
        .zip(predictions.iter())
        .zip(factors)
        .map(|((&grain, &prediction), factors)| PredictionRow {
            binding_id: BINDING_ID,
            binding_name: BINDING_NAME.to_string(),
            last_load_dts: last_load_dts.clone(),
            grain,
            prediction,
            factors,
        })
        .collect())
}
