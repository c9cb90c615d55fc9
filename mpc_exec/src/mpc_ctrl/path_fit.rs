//! # Path fitting
//!
//! The sparse reference waypoints are approximated by a single polynomial
//! `y = f(x)` in the vehicle frame. The fit is an ordinary least squares fit
//! solved through a QR decomposition of the Vandermonde matrix, which avoids
//! squaring the condition number as the normal equations would.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nalgebra::{DMatrix, DVector, Point2};
use num_dual::Dual64;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Smallest permitted ratio between the smallest and largest diagonal
/// elements of the triangular factor. Below this the fit is rejected as
/// rank deficient.
const MIN_RANK_RATIO: f64 = 1e-12;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A polynomial `f(x) = c_0 + c_1 x + ... + c_n x^n`.
///
/// The polynomial is only meaningful in the frame it was fitted in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathPolynomial {
    /// Coefficients, lowest degree first.
    coeffs: Vec<f64>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum FittingError {
    #[error("Expected at least {required} points for the fit, found {found}")]
    TooFewPoints { required: usize, found: usize },

    #[error("The number of x values ({0}) doesn't match the number of y values ({1})")]
    LengthMismatch(usize, usize),

    #[error("Cannot fit a degree 0 polynomial")]
    ZeroDegree,

    #[error("The fit inputs contain a non-finite value")]
    NonFinite,

    #[error("The fit is ill-conditioned, the points do not determine a degree {0} polynomial")]
    IllConditioned(usize),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl PathPolynomial {
    /// Create a polynomial directly from its coefficients, lowest degree first.
    pub fn from_coeffs(coeffs: Vec<f64>) -> Self {
        Self { coeffs }
    }

    /// Fit a polynomial of the given degree to the points `(xs[i], ys[i])`.
    pub fn fit(xs: &[f64], ys: &[f64], degree: usize) -> Result<Self, FittingError> {
        if xs.len() != ys.len() {
            return Err(FittingError::LengthMismatch(xs.len(), ys.len()));
        }
        if degree == 0 {
            return Err(FittingError::ZeroDegree);
        }
        if xs.len() < degree + 1 {
            return Err(FittingError::TooFewPoints {
                required: degree + 1,
                found: xs.len(),
            });
        }
        if xs.iter().chain(ys.iter()).any(|v| !v.is_finite()) {
            return Err(FittingError::NonFinite);
        }

        let num_coeffs = degree + 1;

        // Vandermonde design matrix, a[i][j] = x_i^j
        let a = DMatrix::from_fn(xs.len(), num_coeffs, |i, j| xs[i].powi(j as i32));
        let b = DVector::from_column_slice(ys);

        let qr = a.qr();
        let r = qr.r();

        // Reject rank deficient factors, i.e. repeated x values or points
        // which are too closely clustered to determine the higher terms.
        let diag_max = r.diagonal().iter().fold(0f64, |m, d| m.max(d.abs()));
        let diag_min = r
            .diagonal()
            .iter()
            .fold(std::f64::INFINITY, |m, d| m.min(d.abs()));
        if !(diag_max > 0.0) || !(diag_min / diag_max > MIN_RANK_RATIO) {
            return Err(FittingError::IllConditioned(degree));
        }

        // Solve R c = Q^T b
        let qtb = qr.q().transpose() * b;
        let c = r
            .solve_upper_triangular(&qtb)
            .ok_or(FittingError::IllConditioned(degree))?;

        if c.iter().any(|v| !v.is_finite()) {
            return Err(FittingError::NonFinite);
        }

        Ok(Self {
            coeffs: c.iter().cloned().collect(),
        })
    }

    /// Fit a polynomial through a list of points.
    pub fn fit_points(points: &[Point2<f64>], degree: usize) -> Result<Self, FittingError> {
        let xs: Vec<f64> = points.iter().map(|p| p.x).collect();
        let ys: Vec<f64> = points.iter().map(|p| p.y).collect();

        Self::fit(&xs, &ys, degree)
    }

    /// The coefficients of the polynomial, lowest degree first.
    pub fn coeffs(&self) -> &[f64] {
        &self.coeffs
    }

    pub fn degree(&self) -> usize {
        self.coeffs.len().saturating_sub(1)
    }

    /// Evaluate the polynomial at `x`.
    pub fn eval(&self, x: f64) -> f64 {
        // Horner's method
        self.coeffs.iter().rev().fold(0.0, |acc, &c| acc * x + c)
    }

    /// Evaluate the first derivative of the polynomial at `x`.
    pub fn slope(&self, x: f64) -> f64 {
        self.coeffs
            .iter()
            .enumerate()
            .skip(1)
            .rev()
            .fold(0.0, |acc, (j, &c)| acc * x + j as f64 * c)
    }

    /// Evaluate the polynomial on a dual number, propagating the derivative
    /// with respect to whichever input `x` depends on.
    pub fn eval_dual(&self, x: Dual64) -> Dual64 {
        self.coeffs
            .iter()
            .rev()
            .fold(Dual64::from(0.0), |acc, &c| acc * x + Dual64::from(c))
    }

    /// Evaluate the first derivative on a dual number.
    pub fn slope_dual(&self, x: Dual64) -> Dual64 {
        self.coeffs
            .iter()
            .enumerate()
            .skip(1)
            .rev()
            .fold(Dual64::from(0.0), |acc, (j, &c)| {
                acc * x + Dual64::from(j as f64 * c)
            })
    }

    /// Sample the polynomial at `x = 0, step, 2 step, ...` returning `count`
    /// points.
    pub fn resample(&self, step: f64, count: usize) -> Vec<Point2<f64>> {
        (0..count)
            .map(|i| {
                let x = i as f64 * step;
                Point2::new(x, self.eval(x))
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_cubic_recovery() {
        let truth = PathPolynomial::from_coeffs(vec![1.5, -0.3, 0.02, -0.001]);
        let xs: Vec<f64> = (0..6).map(|i| i as f64 * 10.0 - 5.0).collect();
        let ys: Vec<f64> = xs.iter().map(|&x| truth.eval(x)).collect();

        let fit = PathPolynomial::fit(&xs, &ys, 3).unwrap();

        assert_eq!(fit.degree(), 3);
        for (c, t) in fit.coeffs().iter().zip(truth.coeffs().iter()) {
            assert!((c - t).abs() < 1e-8, "{:?} != {:?}", fit.coeffs(), truth.coeffs());
        }
    }

    #[test]
    fn test_exact_with_minimum_points() {
        // Four points exactly determine a cubic
        let truth = PathPolynomial::from_coeffs(vec![0.0, 1.0, 0.0, 0.5]);
        let xs = [0.0, 1.0, 2.0, 3.0];
        let ys: Vec<f64> = xs.iter().map(|&x| truth.eval(x)).collect();

        let fit = PathPolynomial::fit(&xs, &ys, 3).unwrap();
        for (x, y) in xs.iter().zip(ys.iter()) {
            assert!((fit.eval(*x) - y).abs() < 1e-9);
        }
    }

    #[test]
    fn test_least_squares_line() {
        // Hand computed: slope = Sxy / Sxx = 9.8 / 5
        let xs = [0.0, 1.0, 2.0, 3.0];
        let ys = [0.1, 1.9, 4.1, 5.9];

        let fit = PathPolynomial::fit(&xs, &ys, 1).unwrap();
        assert!((fit.coeffs()[1] - 1.96).abs() < 1e-9);
        assert!((fit.coeffs()[0] - 0.06).abs() < 1e-9);
    }

    #[test]
    fn test_fit_errors() {
        assert_eq!(
            PathPolynomial::fit(&[0.0, 1.0, 2.0], &[0.0, 1.0, 2.0], 3),
            Err(FittingError::TooFewPoints { required: 4, found: 3 })
        );
        assert_eq!(
            PathPolynomial::fit(&[0.0, 1.0, 2.0, 3.0], &[0.0, 1.0, 2.0], 3),
            Err(FittingError::LengthMismatch(4, 3))
        );
        assert_eq!(
            PathPolynomial::fit(&[0.0, 1.0, std::f64::NAN, 3.0], &[0.0; 4], 3),
            Err(FittingError::NonFinite)
        );

        // Repeated x values can't determine a cubic
        assert_eq!(
            PathPolynomial::fit(&[1.0, 1.0, 2.0, 2.0], &[0.0, 1.0, 2.0, 3.0], 3),
            Err(FittingError::IllConditioned(3))
        );
    }

    #[test]
    fn test_slope() {
        let p = PathPolynomial::from_coeffs(vec![1.0, 2.0, 3.0, 4.0]);

        assert_eq!(p.eval(0.0), 1.0);
        assert_eq!(p.eval(2.0), 1.0 + 4.0 + 12.0 + 32.0);
        assert_eq!(p.slope(0.0), 2.0);
        assert_eq!(p.slope(2.0), 2.0 + 12.0 + 48.0);

        // The dual evaluation carries the slope in its derivative part
        let mut x = Dual64::from(2.0);
        x.eps = 1.0;
        let y = p.eval_dual(x);
        assert_eq!(y.re, p.eval(2.0));
        assert!((y.eps - p.slope(2.0)).abs() < 1e-12);
    }

    #[test]
    fn test_resample() {
        let p = PathPolynomial::from_coeffs(vec![1.0, 0.5]);
        let pts = p.resample(2.5, 25);

        assert_eq!(pts.len(), 25);
        assert_eq!(pts[0], Point2::new(0.0, 1.0));
        assert_eq!(pts[4], Point2::new(10.0, 6.0));
    }
}
