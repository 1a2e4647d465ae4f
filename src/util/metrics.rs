// External crates
use burn::tensor::cast::ToElement;
use burn::tensor::{backend::Backend, Tensor};
use log::warn;

// Local modules
use crate::error::{GridError, GridResult};

/// Coefficient of determination computed with tensor operations
///
/// R² = 1 - SS_res / SS_tot. A constant target vector has SS_tot = 0 and
/// yields a non-finite result, which callers log as-is.
pub fn r2_score_tensor<B: Backend>(y_true: Tensor<B, 1>, y_pred: Tensor<B, 1>) -> f64 {
    let y_true_mean = y_true.clone().mean().into_scalar().to_f64();

    // Residual sum of squares
    let residuals = y_true.clone() - y_pred;
    let ss_res = (residuals.clone() * residuals).sum().into_scalar().to_f64();

    // Total sum of squares
    let deviations = y_true.sub_scalar(y_true_mean);
    let ss_tot = (deviations.clone() * deviations).sum().into_scalar().to_f64();

    1.0 - ss_res / ss_tot
}

/// Coefficient of determination over plain slices
///
/// Follows the usual reference semantics: fewer than two samples is not
/// well-defined and returns NaN; a constant target scores 1.0 for a perfect
/// fit and 0.0 otherwise.
pub fn r2_score(y_true: &[f64], y_pred: &[f64]) -> GridResult<f64> {
    if y_true.len() != y_pred.len() {
        return Err(GridError::LengthMismatch {
            expected: y_true.len(),
            actual: y_pred.len(),
        });
    }
    if y_true.len() < 2 {
        warn!("R² is not well-defined with fewer than two samples");
        return Ok(f64::NAN);
    }

    let mean = y_true.iter().sum::<f64>() / y_true.len() as f64;
    let ss_res: f64 = y_true
        .iter()
        .zip(y_pred)
        .map(|(t, p)| (t - p) * (t - p))
        .sum();
    let ss_tot: f64 = y_true.iter().map(|t| (t - mean) * (t - mean)).sum();

    if ss_tot == 0.0 {
        return Ok(if ss_res == 0.0 { 1.0 } else { 0.0 });
    }
    Ok(1.0 - ss_res / ss_tot)
}
