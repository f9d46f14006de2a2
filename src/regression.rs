//! Polynomial least-squares regression.
//!
//! Fits `y ≈ β₀ + β₁x + … + β_d x^d` by solving the Vandermonde system with a
//! Householder QR decomposition. When the Vandermonde matrix is rank deficient
//! (too few distinct `x` values for the requested degree) the degree is lowered
//! one step at a time until the system is full rank.
//!
//! # Example
//!
//! ```
//! use spectrascan::regression::fit;
//!
//! let points = [(0.0, 1.0), (1.0, 3.0), (2.0, 5.0), (3.0, 7.0)];
//! let line = fit(&points, 1)?;
//! assert!((line.coefficients()[1] - 2.0).abs() < 1e-12);
//! # Ok::<(), spectrascan::Error>(())
//! ```

use std::ops::{Index, IndexMut};

use serde::Serialize;

use rs_usb4000::CalibrationCoefficients;

use crate::error::{Error, Result};

/// A diagonal entry of R smaller than this fraction of its column's norm is
/// treated as zero.
pub const RANK_TOLERANCE: f64 = 1e-10;

/// Dense row-major matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// `V[i][j] = xᵢ^j` for `j` in `0..=degree`.
    pub fn vandermonde(xs: impl ExactSizeIterator<Item = f64>, degree: usize) -> Self {
        let mut m = Self::zeros(xs.len(), degree + 1);
        for (i, x) in xs.enumerate() {
            let mut power = 1.0;
            for j in 0..=degree {
                m[(i, j)] = power;
                power *= x;
            }
        }
        m
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }
}

impl Index<(usize, usize)> for Matrix {
    type Output = f64;

    fn index(&self, (r, c): (usize, usize)) -> &f64 {
        &self.data[r * self.cols + c]
    }
}

impl IndexMut<(usize, usize)> for Matrix {
    fn index_mut(&mut self, (r, c): (usize, usize)) -> &mut f64 {
        &mut self.data[r * self.cols + c]
    }
}

/// Householder QR decomposition of a tall matrix (`rows ≥ cols`).
///
/// The Householder vectors are stored in the lower trapezoid of `qr` and the
/// strict upper triangle of R above the diagonal; R's diagonal is kept apart
/// in `rdiag`.
#[derive(Debug, Clone)]
pub struct QrDecomposition {
    qr: Matrix,
    rdiag: Vec<f64>,
    column_norms: Vec<f64>,
}

impl QrDecomposition {
    /// Decompose `a`, taking ownership of it as working storage.
    pub fn new(mut a: Matrix) -> Self {
        let (rows, cols) = (a.rows, a.cols);
        debug_assert!(rows >= cols, "QR needs rows >= cols");
        let mut rdiag = vec![0.0; cols];
        let mut column_norms = vec![0.0; cols];

        for k in 0..cols {
            // Reflections are orthogonal, so the full column still has its
            // original norm.
            column_norms[k] = (0..rows).fold(0.0, |acc: f64, i| acc.hypot(a[(i, k)]));

            // 2-norm of the trailing part, without under/overflow
            let mut nrm = (k..rows).fold(0.0, |acc: f64, i| acc.hypot(a[(i, k)]));

            if nrm != 0.0 {
                if a[(k, k)] < 0.0 {
                    nrm = -nrm;
                }
                for i in k..rows {
                    a[(i, k)] /= nrm;
                }
                a[(k, k)] += 1.0;

                for j in k + 1..cols {
                    let mut s = 0.0;
                    for i in k..rows {
                        s += a[(i, k)] * a[(i, j)];
                    }
                    s = -s / a[(k, k)];
                    for i in k..rows {
                        let v = a[(i, k)];
                        a[(i, j)] += s * v;
                    }
                }
            }
            rdiag[k] = -nrm;
        }

        Self {
            qr: a,
            rdiag,
            column_norms,
        }
    }

    /// Diagonal of R.
    pub fn rdiag(&self) -> &[f64] {
        &self.rdiag
    }

    /// True when no diagonal entry of R vanishes relative to its column.
    pub fn is_full_rank(&self) -> bool {
        self.rdiag
            .iter()
            .zip(&self.column_norms)
            .all(|(&r, &norm)| r != 0.0 && r.abs() > RANK_TOLERANCE * norm)
    }

    /// Least-squares solution of `A·x ≈ b`.
    ///
    /// `b` is copied before the reflections are applied. Only meaningful when
    /// [`is_full_rank`](Self::is_full_rank) holds.
    pub fn solve(&self, b: &[f64]) -> Vec<f64> {
        let (rows, cols) = (self.qr.rows, self.qr.cols);
        debug_assert_eq!(b.len(), rows);
        let qr = &self.qr;
        let mut y = b.to_vec();

        // y = Qᵀ·b
        for k in 0..cols {
            let mut s = 0.0;
            for i in k..rows {
                s += qr[(i, k)] * y[i];
            }
            s = -s / qr[(k, k)];
            for i in k..rows {
                y[i] += s * qr[(i, k)];
            }
        }

        // R·x = y, highest order first
        for k in (0..cols).rev() {
            y[k] /= self.rdiag[k];
            for i in 0..k {
                y[i] -= y[k] * qr[(i, k)];
            }
        }

        y.truncate(cols);
        y
    }
}

/// Result of a polynomial fit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolynomialFit {
    coefficients: Vec<f64>,
    requested_degree: usize,
    r_squared: f64,
}

impl PolynomialFit {
    /// Coefficients from the constant term upward.
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// Degree actually fitted, possibly lower than requested.
    pub fn degree(&self) -> usize {
        self.coefficients.len() - 1
    }

    pub fn requested_degree(&self) -> usize {
        self.requested_degree
    }

    /// Whether rank deficiency forced a lower degree.
    pub fn was_reduced(&self) -> bool {
        self.degree() < self.requested_degree
    }

    /// Coefficient of determination over the fitted samples.
    pub fn r_squared(&self) -> f64 {
        self.r_squared
    }

    /// Evaluate the polynomial at `x` (Horner).
    pub fn evaluate(&self, x: f64) -> f64 {
        self.coefficients.iter().rev().fold(0.0, |acc, &c| acc * x + c)
    }

    /// Use this fit as a pixel → wavelength calibration.
    pub fn to_calibration(&self) -> Result<CalibrationCoefficients> {
        if self.degree() > 3 {
            return Err(Error::format(format!(
                "Wavelength calibration is at most cubic, fit has degree {}",
                self.degree()
            )));
        }
        let mut c = [0.0; 4];
        c[..self.coefficients.len()].copy_from_slice(&self.coefficients);
        Ok(CalibrationCoefficients::from(c))
    }

    pub fn into_coefficients(self) -> Vec<f64> {
        self.coefficients
    }
}

/// Least-squares polynomial of at most `degree` through `points`.
///
/// # Errors
///
/// - [`Error::Dimensionality`] if there are fewer than `degree + 1` points;
///   nothing is computed in that case.
/// - [`Error::RankDeficiencyExhausted`] if even a constant cannot be fitted.
pub fn fit(points: &[(f64, f64)], degree: usize) -> Result<PolynomialFit> {
    if points.len() < degree + 1 {
        return Err(Error::Dimensionality {
            points: points.len(),
            degree,
        });
    }

    let requested_degree = degree;
    let mut degree = degree;
    let qr = loop {
        let v = Matrix::vandermonde(points.iter().map(|p| p.0), degree);
        let qr = QrDecomposition::new(v);
        if qr.is_full_rank() {
            break qr;
        }
        if degree == 0 {
            return Err(Error::RankDeficiencyExhausted {
                requested: requested_degree,
            });
        }
        tracing::debug!(
            "Vandermonde matrix rank deficient at degree {}, retrying at {}",
            degree,
            degree - 1
        );
        degree -= 1;
    };

    let ys: Vec<f64> = points.iter().map(|p| p.1).collect();
    let coefficients = qr.solve(&ys);

    let mut result = PolynomialFit {
        coefficients,
        requested_degree,
        r_squared: 0.0,
    };
    result.r_squared = r_squared(&result, points);
    Ok(result)
}

fn r_squared(fit: &PolynomialFit, points: &[(f64, f64)]) -> f64 {
    let n = points.len() as f64;
    let mean = points.iter().map(|p| p.1).sum::<f64>() / n;
    let sst: f64 = points.iter().map(|p| (p.1 - mean).powi(2)).sum();
    let sse: f64 = points
        .iter()
        .map(|&(x, y)| (y - fit.evaluate(x)).powi(2))
        .sum();
    if sst == 0.0 {
        1.0
    } else {
        1.0 - sse / sst
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    #[test]
    fn test_vandermonde() {
        let v = Matrix::vandermonde([2.0, 3.0].into_iter(), 3);
        assert_eq!((v.rows(), v.cols()), (2, 4));
        assert_eq!(v[(0, 0)], 1.0);
        assert_eq!(v[(0, 3)], 8.0);
        assert_eq!(v[(1, 2)], 9.0);
    }

    #[test]
    fn test_rdiag_sign_opposes_leading_entry() {
        let v = Matrix::vandermonde([1.0, 2.0, 3.0].into_iter(), 1);
        let qr = QrDecomposition::new(v);
        // first column is all ones: norm √3, sign flipped
        assert_relative_eq!(qr.rdiag()[0], -(3.0f64).sqrt(), epsilon = 1e-12);
        assert!(qr.is_full_rank());
    }

    #[test]
    fn test_norm_does_not_overflow() {
        let mut a = Matrix::zeros(2, 1);
        a[(0, 0)] = 3e200;
        a[(1, 0)] = 4e200;
        let qr = QrDecomposition::new(a);
        assert_relative_eq!(qr.rdiag()[0], -5e200, max_relative = 1e-12);
    }

    #[test]
    fn test_zero_column_is_rank_deficient() {
        let a = Matrix::zeros(3, 2);
        assert!(!QrDecomposition::new(a).is_full_rank());
    }

    #[test]
    fn test_exact_line() {
        let points = [(0.0, 1.0), (1.0, 3.0), (2.0, 5.0), (3.0, 7.0)];
        let result = fit(&points, 1).unwrap();
        assert_eq!(result.degree(), 1);
        assert_abs_diff_eq!(result.coefficients()[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(result.coefficients()[1], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(result.r_squared(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_degree_zero_is_mean() {
        let points = [(0.0, 2.0), (5.0, 4.0), (9.0, 9.0)];
        let result = fit(&points, 0).unwrap();
        assert_eq!(result.coefficients().len(), 1);
        assert_relative_eq!(result.coefficients()[0], 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_evaluate_horner() {
        let points = [(0.0, 1.0), (1.0, 2.0), (2.0, 5.0), (3.0, 10.0)];
        let result = fit(&points, 2).unwrap();
        // y = 1 + x²
        assert_abs_diff_eq!(result.evaluate(4.0), 17.0, epsilon = 1e-9);
    }

    #[test]
    fn test_to_calibration_pads_missing_orders() {
        let points = [(0.0, 200.0), (100.0, 236.0), (200.0, 272.0)];
        let cal = fit(&points, 1).unwrap().to_calibration().unwrap();
        assert_abs_diff_eq!(cal.c0, 200.0, epsilon = 1e-9);
        assert_abs_diff_eq!(cal.c1, 0.36, epsilon = 1e-12);
        assert_eq!(cal.c2, 0.0);
        assert_eq!(cal.c3, 0.0);
    }

    #[test]
    fn test_to_calibration_rejects_quartic() {
        let points: Vec<(f64, f64)> = (0..8).map(|i| (i as f64, (i * i * i * i) as f64)).collect();
        let result = fit(&points, 4).unwrap();
        assert_eq!(result.degree(), 4);
        assert!(matches!(result.to_calibration(), Err(Error::Format(_))));
    }
}
