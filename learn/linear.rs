//! # Linear Estimators
//!
//! Ordinary least squares and L2-penalized logistic regression. Both keep an
//! unpenalized intercept and expose their coefficients, which the factor ranking in
//! `factors` relies on.
//!
//! The logistic fit is a Newton (IRLS) iteration on the penalized log-likelihood
//!
//! ```text
//!     sum_i [ y_i * eta_i - log(1 + exp(eta_i)) ] - (1 / 2C) * ||w||^2
//! ```
//!
//! which keeps the penalized Hessian positive definite even when the classes are
//! perfectly separable.

use super::ModelError;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, concatenate, s};
use ndarray_linalg::{LeastSquaresSvd, Solve};
use serde::{Deserialize, Serialize};

/// Inverse regularization strength for the logistic fit.
pub const DEFAULT_INVERSE_REGULARIZATION: f64 = 1.0;
const LOGISTIC_MAX_ITERATIONS: usize = 100;
const LOGISTIC_TOLERANCE: f64 = 1e-8;

/// Ordinary least squares with an intercept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearRegression {
    pub intercept: f64,
    pub coefficients: Vec<f64>,
}

impl LinearRegression {
    /// Fits on centered data so that the intercept is recovered from the means and the
    /// slope vector is the minimum-norm least squares solution when `x` is rank deficient.
    pub fn fit(x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<Self, ModelError> {
        validate_shapes(x, y)?;
        let x_mean = x.mean_axis(Axis(0)).ok_or(ModelError::EmptyTrainingSet)?;
        let y_mean = y.mean().ok_or(ModelError::EmptyTrainingSet)?;

        if x.ncols() == 0 {
            return Ok(Self {
                intercept: y_mean,
                coefficients: Vec::new(),
            });
        }

        let x_centered = &x - &x_mean.view().insert_axis(Axis(0));
        let y_centered = &y - y_mean;
        let solution = x_centered
            .least_squares(&y_centered)
            .map_err(ModelError::LinearSystemSolveFailed)?
            .solution;

        let intercept = y_mean - x_mean.dot(&solution);
        log::debug!(
            "Linear regression fitted: intercept {intercept:.6}, {} coefficients",
            solution.len()
        );
        Ok(Self {
            intercept,
            coefficients: solution.to_vec(),
        })
    }

    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, ModelError> {
        linear_predictor(x, self.intercept, &self.coefficients)
    }
}

/// Binary logistic regression with an L2 penalty on the slopes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    pub intercept: f64,
    pub coefficients: Vec<f64>,
    pub inverse_regularization: f64,
    pub iterations: usize,
    pub converged: bool,
}

impl LogisticRegression {
    pub fn fit(x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<Self, ModelError> {
        Self::fit_with_penalty(x, y, DEFAULT_INVERSE_REGULARIZATION)
    }

    /// Fits by penalized Newton iterations; `inverse_regularization` is `C`.
    pub fn fit_with_penalty(
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        inverse_regularization: f64,
    ) -> Result<Self, ModelError> {
        validate_shapes(x, y)?;
        if !(inverse_regularization > 0.0) {
            return Err(ModelError::InvalidHyperparameter(format!(
                "inverse regularization must be positive, got {inverse_regularization}"
            )));
        }

        let n = x.nrows();
        let design = concatenate(Axis(1), &[Array2::ones((n, 1)).view(), x.view()])
            .map_err(|_| ModelError::ShapeMismatch { rows: n, targets: y.len() })?;
        let p = design.ncols();
        let lambda = 1.0 / inverse_regularization;

        let mut beta = Array1::<f64>::zeros(p);
        let mut converged = false;
        let mut iterations = 0;

        for iter in 1..=LOGISTIC_MAX_ITERATIONS {
            iterations = iter;
            let mu = design.dot(&beta).mapv(sigmoid);
            let weights = mu.mapv(|m| (m * (1.0 - m)).max(1e-10));

            let mut penalized_beta = beta.clone();
            penalized_beta[0] = 0.0;
            let gradient = design.t().dot(&(&y - &mu)) - lambda * &penalized_beta;

            let weighted = &design * &weights.view().insert_axis(Axis(1));
            let mut hessian = design.t().dot(&weighted);
            for j in 1..p {
                hessian[[j, j]] += lambda;
            }

            let step = hessian
                .solve(&gradient)
                .map_err(ModelError::LinearSystemSolveFailed)?;
            beta += &step;

            let largest_step = step.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
            log::trace!("Logistic iteration {iter}: largest step {largest_step:.3e}");
            if largest_step < LOGISTIC_TOLERANCE {
                converged = true;
                break;
            }
        }

        if !converged {
            log::warn!(
                "Logistic regression did not converge within {LOGISTIC_MAX_ITERATIONS} iterations"
            );
        }

        Ok(Self {
            intercept: beta[0],
            coefficients: beta.slice(s![1..]).to_vec(),
            inverse_regularization,
            iterations,
            converged,
        })
    }

    /// Probability of the positive class for every row of `x`.
    pub fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, ModelError> {
        Ok(linear_predictor(x, self.intercept, &self.coefficients)?.mapv(sigmoid))
    }
}

fn linear_predictor(
    x: ArrayView2<f64>,
    intercept: f64,
    coefficients: &[f64],
) -> Result<Array1<f64>, ModelError> {
    if x.ncols() != coefficients.len() {
        return Err(ModelError::FeatureCountMismatch {
            expected: coefficients.len(),
            found: x.ncols(),
        });
    }
    let coefficients = ArrayView1::from(coefficients);
    Ok(x.dot(&coefficients) + intercept)
}

fn validate_shapes(x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<(), ModelError> {
    if x.nrows() == 0 {
        return Err(ModelError::EmptyTrainingSet);
    }
    if x.nrows() != y.len() {
        return Err(ModelError::ShapeMismatch {
            rows: x.nrows(),
            targets: y.len(),
        });
    }
    Ok(())
}

/// Logistic function with the linear predictor clamped against overflow in `exp`.
pub(crate) fn sigmoid(eta: f64) -> f64 {
    let eta = eta.clamp(-700.0, 700.0);
    1.0 / (1.0 + (-eta).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn linear_regression_recovers_exact_plane() {
        let x = array![[1.0, 2.0], [2.0, 1.0], [3.0, 4.0], [4.0, 3.0], [5.0, 7.0]];
        let y = x.map_axis(Axis(1), |row| 3.0 + 2.0 * row[0] - 0.5 * row[1]);
        let model = LinearRegression::fit(x.view(), y.view()).unwrap();

        assert_abs_diff_eq!(model.intercept, 3.0, epsilon = 1e-8);
        assert_abs_diff_eq!(model.coefficients[0], 2.0, epsilon = 1e-8);
        assert_abs_diff_eq!(model.coefficients[1], -0.5, epsilon = 1e-8);

        let predicted = model.predict(array![[10.0, 0.0]].view()).unwrap();
        assert_abs_diff_eq!(predicted[0], 23.0, epsilon = 1e-8);
    }

    #[test]
    fn linear_regression_tolerates_duplicate_columns() {
        let x = array![[1.0, 1.0], [2.0, 2.0], [3.0, 3.0], [4.0, 4.0]];
        let y = array![2.0, 4.0, 6.0, 8.0];
        let model = LinearRegression::fit(x.view(), y.view()).unwrap();

        // The minimum-norm solution splits the slope evenly.
        assert_abs_diff_eq!(model.coefficients[0], 1.0, epsilon = 1e-8);
        assert_abs_diff_eq!(model.coefficients[1], 1.0, epsilon = 1e-8);
        assert_abs_diff_eq!(model.intercept, 0.0, epsilon = 1e-8);
    }

    #[test]
    fn logistic_regression_orders_probabilities() {
        let x = array![[-3.0], [-2.0], [-1.0], [-0.5], [0.5], [1.0], [2.0], [3.0]];
        let y = array![0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 1.0];
        let model = LogisticRegression::fit(x.view(), y.view()).unwrap();

        assert!(model.converged);
        assert!(model.coefficients[0] > 0.0);

        let probs = model.predict_proba(array![[-3.0], [0.0], [3.0]].view()).unwrap();
        assert!(probs[0] < probs[1] && probs[1] < probs[2]);
        assert!(probs.iter().all(|&p| (0.0..=1.0).contains(&p)));
    }

    #[test]
    fn logistic_regression_survives_separable_classes() {
        let x = array![[-2.0], [-1.0], [1.0], [2.0]];
        let y = array![0.0, 0.0, 1.0, 1.0];
        let model = LogisticRegression::fit(x.view(), y.view()).unwrap();
        assert!(model.converged);
        assert!(model.coefficients[0].is_finite());
    }

    #[test]
    fn logistic_regression_gradient_vanishes_at_optimum() {
        let x = array![[0.2, 1.0], [1.4, 0.0], [2.1, 1.0], [0.7, 0.0], [3.3, 1.0], [1.9, 0.0]];
        let y = array![0.0, 0.0, 1.0, 0.0, 1.0, 1.0];
        let model = LogisticRegression::fit(x.view(), y.view()).unwrap();

        let mu = model.predict_proba(x.view()).unwrap();
        let residual = &y - &mu;
        assert_abs_diff_eq!(residual.sum(), 0.0, epsilon = 1e-6);
        for j in 0..2 {
            let score = x.column(j).dot(&residual) - model.coefficients[j];
            assert_abs_diff_eq!(score, 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let x = array![[1.0], [2.0]];
        let y = array![1.0];
        assert!(matches!(
            LinearRegression::fit(x.view(), y.view()),
            Err(ModelError::ShapeMismatch { rows: 2, targets: 1 })
        ));
    }
}
