//! Per-row explanatory factors from a linear surrogate model.

use super::linear::{LinearRegression, LogisticRegression};
use super::{
    FACTOR_MODEL_FILE, ModelError, ModelType, ensure_same_features, restore_or_fit,
};
use crate::frame::{FeatureMatrix, Partitions};
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::Path;

/// Number of factors reported for every prediction.
pub const FACTOR_COUNT: usize = 3;

/// The three highest-ranked feature names of one row; `None` where fewer features exist.
pub type TopFactors = [Option<String>; FACTOR_COUNT];

/// A linear model whose coefficients rank feature contributions.
///
/// Classification uses logistic regression and regression uses least squares,
/// regardless of which method produced the predictions themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorModel {
    pub model_type: ModelType,
    pub feature_names: Vec<String>,
    pub intercept: f64,
    pub coefficients: Vec<f64>,
}

impl FactorModel {
    pub fn fit(
        model_type: ModelType,
        x_train: &FeatureMatrix,
        y_train: ArrayView1<f64>,
    ) -> Result<Self, ModelError> {
        let x = x_train.values.view();
        let (intercept, coefficients) = match model_type {
            ModelType::Classification => {
                let model = LogisticRegression::fit(x, y_train)?;
                (model.intercept, model.coefficients)
            }
            ModelType::Regression => {
                let model = LinearRegression::fit(x, y_train)?;
                (model.intercept, model.coefficients)
            }
        };
        Ok(Self {
            model_type,
            feature_names: x_train.names.clone(),
            intercept,
            coefficients,
        })
    }

    /// Ranks `coefficient * value` for every row of `x` and keeps the three largest.
    ///
    /// Ties keep column order. Contributions are compared as signed values, so a
    /// strongly negative contribution ranks last.
    pub fn top_three_factors(&self, x: &FeatureMatrix) -> Result<Vec<TopFactors>, ModelError> {
        ensure_same_features(&self.feature_names, &x.names)?;

        let mut order: Vec<usize> = Vec::with_capacity(self.coefficients.len());
        let mut contributions = vec![0.0; self.coefficients.len()];
        let factors = x
            .values
            .outer_iter()
            .map(|row| {
                for (j, contribution) in contributions.iter_mut().enumerate() {
                    *contribution = self.coefficients[j] * row[j];
                }
                order.clear();
                order.extend(0..self.coefficients.len());
                order.sort_by(|&a, &b| {
                    contributions[b]
                        .partial_cmp(&contributions[a])
                        .unwrap_or(Ordering::Equal)
                });
                std::array::from_fn(|rank| {
                    order
                        .get(rank)
                        .map(|&column| self.feature_names[column].clone())
                })
            })
            .collect();
        Ok(factors)
    }
}

/// Loads the factor model from `model_dir` when `use_saved_model` is set, otherwise
/// fits one on the training partition and saves it there.
pub fn fit_or_load_factors(
    model_type: ModelType,
    partitions: &Partitions,
    use_saved_model: bool,
    model_dir: &Path,
) -> Result<FactorModel, ModelError> {
    let path = model_dir.join(FACTOR_MODEL_FILE);
    let model = restore_or_fit(&path, use_saved_model, || {
        FactorModel::fit(model_type, &partitions.x_train, partitions.y_train.view())
    })?;
    if model.model_type != model_type {
        return Err(ModelError::ArtifactMismatch {
            path: path.display().to_string(),
            expected: model_type.to_string(),
            found: model.model_type.to_string(),
        });
    }
    ensure_same_features(&model.feature_names, &partitions.x_test.names)?;
    Ok(model)
}
