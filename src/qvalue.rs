//! Storey-Tibshirani q-values.

use crate::error::{HaystackError, Result};
use log::{debug, warn};

/// Below this many tests the null proportion is not estimated and is fixed at 1
pub const MIN_TESTS_FOR_PI0: usize = 100;

/// Interpolating cubic spline with zero second derivative at both ends.
#[derive(Debug, Clone)]
struct NaturalCubicSpline {
    x: Vec<f64>,
    y: Vec<f64>,
    /// Second derivative at every knot
    m: Vec<f64>,
}

impl NaturalCubicSpline {
    /// `x` must be strictly increasing and hold at least two knots
    fn fit(x: &[f64], y: &[f64]) -> Result<Self> {
        let n = x.len();
        if n < 2 || y.len() != n {
            return Err(HaystackError::InvalidInput(
                "spline needs at least two knots with one value each".into(),
            ));
        }
        if x.windows(2).any(|w| w[1] <= w[0]) {
            return Err(HaystackError::InvalidInput(
                "spline knots must be strictly increasing".into(),
            ));
        }

        let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();
        let mut m = vec![0.0; n];
        if n > 2 {
            // Thomas algorithm on the interior second derivatives
            let k = n - 2;
            let mut diag = vec![0.0; k];
            let mut rhs = vec![0.0; k];
            for i in 0..k {
                diag[i] = 2.0 * (h[i] + h[i + 1]);
                rhs[i] = 6.0 * ((y[i + 2] - y[i + 1]) / h[i + 1] - (y[i + 1] - y[i]) / h[i]);
            }
            for i in 1..k {
                let w = h[i] / diag[i - 1];
                diag[i] -= w * h[i];
                rhs[i] -= w * rhs[i - 1];
            }
            m[k] = rhs[k - 1] / diag[k - 1];
            for i in (0..k - 1).rev() {
                m[i + 1] = (rhs[i] - h[i + 1] * m[i + 2]) / diag[i];
            }
        }

        Ok(NaturalCubicSpline {
            x: x.to_vec(),
            y: y.to_vec(),
            m,
        })
    }

    /// Value at `t`; outside the knots the spline continues linearly
    fn evaluate(&self, t: f64) -> f64 {
        let n = self.x.len();
        let seg = match self.x.iter().position(|xi| *xi > t) {
            Some(0) => 0,
            Some(i) => i - 1,
            None => n - 2,
        };
        let (x0, x1) = (self.x[seg], self.x[seg + 1]);
        let (y0, y1) = (self.y[seg], self.y[seg + 1]);
        let (m0, m1) = (self.m[seg], self.m[seg + 1]);
        let h = x1 - x0;

        if t < x0 || t > x1 {
            let slope = (y1 - y0) / h - h * (2.0 * m0 + m1) / 6.0;
            let end_slope = (y1 - y0) / h + h * (m0 + 2.0 * m1) / 6.0;
            return if t < x0 {
                y0 + slope * (t - x0)
            } else {
                y1 + end_slope * (t - x1)
            };
        }

        let a = (x1 - t) / h;
        let b = (t - x0) / h;
        a * y0 + b * y1 + ((a * a * a - a) * m0 + (b * b * b - b) * m1) * h * h / 6.0
    }
}

/// Estimates the proportion of true null hypotheses.
///
/// `pi0(λ) = #{p > λ} / (m (1 - λ))` is computed on λ = 0, 0.01, ..., 0.89,
/// a natural cubic spline is fitted through it and evaluated at the last λ.
/// Estimates above 1 are clamped.
pub fn estimate_pi0(p_values: &[f64]) -> Result<f64> {
    let m = p_values.len();
    if m < MIN_TESTS_FOR_PI0 {
        return Ok(1.0);
    }

    let lambdas: Vec<f64> = (0..90).map(|i| i as f64 / 100.0).collect();
    let pi0s: Vec<f64> = lambdas
        .iter()
        .map(|lam| {
            let above = p_values.iter().filter(|p| **p > *lam).count();
            above as f64 / (m as f64 * (1.0 - lam))
        })
        .collect();

    let spline = NaturalCubicSpline::fit(&lambdas, &pi0s)?;
    let last = lambdas[lambdas.len() - 1];
    let pi0 = spline.evaluate(last);
    debug!("pi0 estimated at {} from {} tests", pi0, m);

    if pi0 > 1.0 {
        warn!(
            "got pi0 > 1 ({:.3}) while estimating qvalues, setting it to 1",
            pi0
        );
        return Ok(1.0);
    }
    if !(pi0 >= 0.0) {
        return Err(HaystackError::degenerate(format!(
            "estimated pi0 {} is not between 0 and 1",
            pi0
        )));
    }
    Ok(pi0)
}

/// q-values for `p_values`, returned in input order.
///
/// With `pi0 = None` the null proportion is estimated by [`estimate_pi0`].
/// q-values are monotone in p: walking from the largest p-value down,
/// each q-value is the minimum of its own `pi0 m p / rank` and the q-value
/// above it.
///
/// # Errors
/// * `HaystackError::InvalidInput` if a p-value is outside [0, 1]
/// * `HaystackError::InvalidParameter` if a given `pi0` is outside [0, 1]
pub fn estimate_qvalues(p_values: &[f64], pi0: Option<f64>) -> Result<Vec<f64>> {
    if let Some(p) = p_values.iter().find(|p| !(**p >= 0.0 && **p <= 1.0)) {
        return Err(HaystackError::InvalidInput(format!(
            "p-value {} is not between 0 and 1",
            p
        )));
    }
    if p_values.is_empty() {
        return Ok(Vec::new());
    }
    let pi0 = match pi0 {
        Some(pi0) if (0.0..=1.0).contains(&pi0) => pi0,
        Some(pi0) => {
            return Err(HaystackError::invalid_parameter(
                "pi0",
                pi0,
                "must be between 0 and 1",
            ))
        }
        None => estimate_pi0(p_values)?,
    };

    let m = p_values.len();
    let mut order: Vec<usize> = (0..m).collect();
    order.sort_by(|&a, &b| p_values[a].total_cmp(&p_values[b]));

    let mut q_values = vec![0.0; m];
    let mut running = 1.0_f64;
    for (rank, &idx) in order.iter().enumerate().rev() {
        let q = pi0 * m as f64 * p_values[idx] / (rank + 1) as f64;
        running = running.min(q);
        q_values[idx] = running;
    }
    Ok(q_values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spline_interpolates_its_knots() {
        let x: Vec<f64> = (0..10).map(|i| i as f64 * 0.5).collect();
        let y: Vec<f64> = x.iter().map(|v| (v * 1.3).sin()).collect();
        let spline = NaturalCubicSpline::fit(&x, &y).unwrap();
        for (xi, yi) in x.iter().zip(&y) {
            assert!((spline.evaluate(*xi) - yi).abs() < 1e-10);
        }
    }

    #[test]
    fn spline_reproduces_a_line() {
        let x = [0.0, 1.0, 3.0, 4.0];
        let y = [1.0, 3.0, 7.0, 9.0];
        let spline = NaturalCubicSpline::fit(&x, &y).unwrap();
        assert!((spline.evaluate(2.0) - 5.0).abs() < 1e-12);
        assert!((spline.evaluate(5.0) - 11.0).abs() < 1e-12);
    }

    #[test]
    fn uniform_p_values_give_pi0_near_one() {
        let p: Vec<f64> = (0..1000).map(|i| (i as f64 + 0.5) / 1000.0).collect();
        let pi0 = estimate_pi0(&p).unwrap();
        assert!((pi0 - 1.0).abs() < 0.05);
    }
}
