use crate::{DVec, Mat};
use log::warn;

const JITTER_START: f64 = 1e-10;
const JITTER_GROWTH: f64 = 10.0;
const MAX_JITTER_TRIES: usize = 8;
const MIN_PRECISION: f64 = 1e-12;

/// Gaussian posterior `q(w) = N(mean, cov)` over one cluster's regression
/// weights in one region
#[derive(Debug, Clone)]
pub struct WeightPosterior {
    /// Posterior mean `m`
    pub mean: DVec,
    /// Posterior covariance `S`
    pub cov: Mat,
    /// `ln |S|`
    pub log_det_cov: f64,
}

impl WeightPosterior {
    /// Fixed mean with identity covariance
    pub fn from_mean(mean: DVec) -> Self {
        let dim = mean.len();
        Self {
            mean,
            cov: Mat::identity(dim, dim),
            log_det_cov: 0.0,
        }
    }

    /// Posterior from natural parameters: `S = P^{-1}`, `m = S b`.
    ///
    /// The Cholesky factorisation is retried with growing diagonal jitter.
    /// If every attempt fails, the off-diagonal entries of `P` are dropped.
    pub fn from_natural(precision: &Mat, shift: &DVec) -> Self {
        let dim = precision.nrows();
        let scale = (precision.trace() / dim.max(1) as f64).abs().max(1.0);

        let mut jitter = 0.0;
        for _ in 0..MAX_JITTER_TRIES {
            let mut pp = precision.clone();
            if jitter > 0.0 {
                for j in 0..dim {
                    pp[(j, j)] += jitter;
                }
            }
            if let Some(chol) = pp.cholesky() {
                let log_det_prec: f64 = chol.l_dirty().diagonal().iter().map(|l| l.ln()).sum();
                let mean = chol.solve(shift);
                let cov = chol.inverse();
                return Self {
                    mean,
                    cov,
                    log_det_cov: -2.0 * log_det_prec,
                };
            }
            jitter = if jitter > 0.0 {
                jitter * JITTER_GROWTH
            } else {
                JITTER_START * scale
            };
        }

        warn!("weight precision not positive definite; using its diagonal");
        Self::diagonal(precision, shift)
    }

    fn diagonal(precision: &Mat, shift: &DVec) -> Self {
        let prec = precision.diagonal().map(|p| p.max(MIN_PRECISION));
        let var = prec.map(|p| 1.0 / p);
        Self {
            mean: shift.component_mul(&var),
            log_det_cov: var.iter().map(|v| v.ln()).sum(),
            cov: Mat::from_diagonal(&var),
        }
    }

    /// Dimension
    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    /// `E[w'w] = |m|^2 + tr(S)`
    pub fn second_moment_trace(&self) -> f64 {
        self.mean.norm_squared() + self.cov.trace()
    }

    /// Optimal variational points `xi_i = sqrt(E[(h_i' w)^2])` for the rows
    /// of design matrix `h`
    pub fn site_xi(&self, h: &Mat) -> DVec {
        let a = h * &self.mean;
        let var = (h * &self.cov).component_mul(h).column_sum();
        a.zip_map(&var, |a, v| (a * a + v.max(0.0)).sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_fixed_mean_moments() {
        let q = WeightPosterior::from_mean(DVec::from_vec(vec![1.0, -2.0, 0.5]));
        assert_abs_diff_eq!(q.second_moment_trace(), 5.25 + 3.0);
        assert_abs_diff_eq!(q.log_det_cov, 0.0);
    }

    #[test]
    fn test_natural_parameters() {
        let pp = Mat::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]);
        let b = DVec::from_vec(vec![1.0, 2.0]);
        let q = WeightPosterior::from_natural(&pp, &b);

        let ident = &pp * &q.cov;
        assert_abs_diff_eq!(ident[(0, 0)], 1.0, epsilon = 1e-10);
        assert_abs_diff_eq!(ident[(0, 1)], 0.0, epsilon = 1e-10);

        let back = &pp * &q.mean;
        assert_abs_diff_eq!(back[0], 1.0, epsilon = 1e-10);
        assert_abs_diff_eq!(back[1], 2.0, epsilon = 1e-10);

        // |P| = 11
        assert_abs_diff_eq!(q.log_det_cov, -(11f64.ln()), epsilon = 1e-10);
    }

    #[test]
    fn test_singular_precision_is_not_fatal() {
        let pp = Mat::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let b = DVec::from_vec(vec![1.0, 1.0]);
        let q = WeightPosterior::from_natural(&pp, &b);
        assert!(q.mean.iter().all(|x| x.is_finite()));
        assert!(q.log_det_cov.is_finite());

        let broken = Mat::from_row_slice(2, 2, &[-1.0, 0.0, 0.0, -2.0]);
        let q = WeightPosterior::from_natural(&broken, &b);
        assert!(q.mean.iter().all(|x| x.is_finite()));
        assert!(q.cov.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_site_xi() {
        let q = WeightPosterior {
            mean: DVec::from_vec(vec![1.0, -2.0]),
            cov: Mat::identity(2, 2) * 0.5,
            log_det_cov: 2.0 * 0.5f64.ln(),
        };
        let h = Mat::from_row_slice(2, 2, &[1.0, 0.0, 1.0, 1.0]);
        let xi = q.site_xi(&h);
        // row 1: a = 1, var = 0.5; row 2: a = -1, var = 1
        assert_abs_diff_eq!(xi[0], 1.5f64.sqrt(), epsilon = 1e-12);
        assert_abs_diff_eq!(xi[1], 2f64.sqrt(), epsilon = 1e-12);
    }
}
