//! # Model Selection and Scoring
//!
//! Four estimators are available, chosen by the pair of [`ModelType`] and [`Method`]:
//!
//! | model type     | method   | estimator                                   |
//! |----------------|----------|---------------------------------------------|
//! | classification | linear   | L2-penalized logistic regression            |
//! | regression     | linear   | ordinary least squares                      |
//! | classification | rf       | random forest of Gini trees (probabilities) |
//! | regression     | rf       | random forest of variance trees             |
//!
//! A fitted estimator is wrapped in a [`FittedModel`] which remembers the feature
//! names it was trained on, so that a model reloaded from disk can refuse a test
//! matrix laid out differently. Models are persisted as TOML artifacts.

pub mod factors;
pub mod forest;
pub mod linear;

use crate::frame::{FeatureMatrix, Partitions};
use forest::{Criterion, RandomForest};
use linear::{LinearRegression, LogisticRegression};
use ndarray::{Array1, ArrayView1};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

pub use forest::ForestSettings;

/// File name of the persisted prediction model inside the model directory.
pub const PREDICTION_MODEL_FILE: &str = "probability.toml";
/// File name of the persisted factor model inside the model directory.
pub const FACTOR_MODEL_FILE: &str = "factorlogit.toml";

/// The kind of target being predicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    Classification,
    Regression,
}

impl ModelType {
    /// Name of the destination column that receives the prediction.
    pub fn output_column(self) -> &'static str {
        match self {
            ModelType::Classification => "PredictedProbNBR",
            ModelType::Regression => "PredictedValueNBR",
        }
    }

    pub fn criterion(self) -> Criterion {
        match self {
            ModelType::Classification => Criterion::Gini,
            ModelType::Regression => Criterion::Variance,
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelType::Classification => write!(f, "classification"),
            ModelType::Regression => write!(f, "regression"),
        }
    }
}

/// The algorithm family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Linear,
    Rf,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Linear => write!(f, "linear"),
            Method::Rf => write!(f, "rf"),
        }
    }
}

/// Custom error type for fitting, scoring, and persisting models.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("A linear system could not be solved while fitting: {0}")]
    LinearSystemSolveFailed(ndarray_linalg::error::LinalgError),
    #[error("The training partition has no rows; nothing can be fitted.")]
    EmptyTrainingSet,
    #[error("The feature matrix has {rows} rows but the target has {targets} values.")]
    ShapeMismatch { rows: usize, targets: usize },
    #[error("Prediction data has {found} feature columns, but the model was trained on {expected}.")]
    FeatureCountMismatch { expected: usize, found: usize },
    #[error(
        "The saved model was trained on features {expected:?}, but the prepared data has {found:?}."
    )]
    FeatureMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("The model file '{path}' holds a {found} model, but a {expected} model was requested.")]
    ArtifactMismatch {
        path: String,
        expected: String,
        found: String,
    },
    #[error("Failed to build the worker thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("Invalid hyperparameter: {0}")]
    InvalidHyperparameter(String),
}

/// The concrete fitted estimator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Estimator {
    Logistic(LogisticRegression),
    Linear(LinearRegression),
    Forest(RandomForest),
}

/// A fitted estimator together with what it was fitted for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedModel {
    pub model_type: ModelType,
    pub method: Method,
    pub feature_names: Vec<String>,
    pub estimator: Estimator,
}

impl FittedModel {
    /// Fits the estimator selected by `model_type` and `method`.
    ///
    /// `forest` is only consulted for the random forest method.
    pub fn fit(
        model_type: ModelType,
        method: Method,
        x_train: &FeatureMatrix,
        y_train: ArrayView1<f64>,
        forest: &ForestSettings,
    ) -> Result<Self, ModelError> {
        log::info!(
            "Fitting {model_type} model ({method}) on {} rows and {} features",
            x_train.nrows(),
            x_train.ncols()
        );
        let x = x_train.values.view();
        let estimator = match (model_type, method) {
            (ModelType::Classification, Method::Linear) => {
                Estimator::Logistic(LogisticRegression::fit(x, y_train)?)
            }
            (ModelType::Regression, Method::Linear) => {
                Estimator::Linear(LinearRegression::fit(x, y_train)?)
            }
            (_, Method::Rf) => {
                Estimator::Forest(RandomForest::fit(x, y_train, model_type.criterion(), forest)?)
            }
        };
        Ok(Self {
            model_type,
            method,
            feature_names: x_train.names.clone(),
            estimator,
        })
    }

    /// Scores every row of `x`: the positive-class probability for classification,
    /// the predicted value for regression.
    pub fn predict(&self, x: &FeatureMatrix) -> Result<Array1<f64>, ModelError> {
        ensure_same_features(&self.feature_names, &x.names)?;
        let values = x.values.view();
        match &self.estimator {
            Estimator::Logistic(model) => model.predict_proba(values),
            Estimator::Linear(model) => model.predict(values),
            Estimator::Forest(model) => model.predict(values),
        }
    }
}

/// Loads the saved prediction model from `model_dir` when `use_saved_model` is set,
/// otherwise fits a fresh one on the training partition and saves it there.
pub fn fit_or_load(
    model_type: ModelType,
    method: Method,
    partitions: &Partitions,
    forest: &ForestSettings,
    use_saved_model: bool,
    model_dir: &Path,
) -> Result<FittedModel, ModelError> {
    let path = model_dir.join(PREDICTION_MODEL_FILE);
    let model = restore_or_fit(&path, use_saved_model, || {
        FittedModel::fit(
            model_type,
            method,
            &partitions.x_train,
            partitions.y_train.view(),
            forest,
        )
    })?;

    if model.model_type != model_type || model.method != method {
        return Err(ModelError::ArtifactMismatch {
            path: path.display().to_string(),
            expected: format!("{model_type}/{method}"),
            found: format!("{}/{}", model.model_type, model.method),
        });
    }
    ensure_same_features(&model.feature_names, &partitions.x_test.names)?;
    Ok(model)
}

/// Either loads the artifact at `path` or runs `fit` and saves its result there.
pub(crate) fn restore_or_fit<T, F>(path: &Path, use_saved: bool, fit: F) -> Result<T, ModelError>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Result<T, ModelError>,
{
    if use_saved {
        log::info!("Loading saved model from '{}'", path.display());
        return load_artifact(path);
    }
    let fitted = fit()?;
    save_artifact(&fitted, path)?;
    log::info!("Model saved to '{}'", path.display());
    Ok(fitted)
}

pub(crate) fn ensure_same_features(expected: &[String], found: &[String]) -> Result<(), ModelError> {
    if expected.len() != found.len() {
        return Err(ModelError::FeatureCountMismatch {
            expected: expected.len(),
            found: found.len(),
        });
    }
    if expected != found {
        return Err(ModelError::FeatureMismatch {
            expected: expected.to_vec(),
            found: found.to_vec(),
        });
    }
    Ok(())
}

pub(crate) fn save_artifact<T: Serialize>(value: &T, path: &Path) -> Result<(), ModelError> {
    let toml_string = toml::to_string_pretty(value)?;
    let mut file = BufWriter::new(fs::File::create(path)?);
    file.write_all(toml_string.as_bytes())?;
    file.flush()?;
    Ok(())
}

pub(crate) fn load_artifact<T: DeserializeOwned>(path: &Path) -> Result<T, ModelError> {
    let toml_string = fs::read_to_string(path)?;
    let value = toml::from_str(&toml_string)?;
    Ok(value)
}
