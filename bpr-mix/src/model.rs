//! Jaakkola-Jordan logistic bound and conjugate expectation terms.
//!
//! # Logistic bound
//!
//! ```text
//! log sigmoid(a) >= log sigmoid(xi) + (a - xi)/2 - lambda(xi) (a^2 - xi^2)
//! lambda(xi)      = tanh(xi/2) / (4 xi),    lambda(0) = 1/8
//! ```
//!
//! With `a = h'w` and `y` in `{0, 1}`, the Bernoulli log-likelihood
//! `y a + log sigmoid(-a)` is bounded by a quadratic in `w`. The bound is
//! tight at `xi = |a|`.
//!
//! # Evidence lower bound terms
//!
//! Each `*_elbo` function returns `E_q[log p] - E_q[log q]` for one
//! conjugate block; they are summed with the expected data term.

use special::Gamma as SpecialGamma;

const LAMBDA_AT_ZERO: f64 = 0.125;
const XI_SMALL: f64 = 1e-6;

/// Logistic function, stable for large `|a|`
#[inline]
pub fn sigmoid(a: f64) -> f64 {
    if a >= 0.0 {
        1.0 / (1.0 + (-a).exp())
    } else {
        let e = a.exp();
        e / (1.0 + e)
    }
}

/// `log sigmoid(a)`, stable for large `|a|`
#[inline]
pub fn log_sigmoid(a: f64) -> f64 {
    if a >= 0.0 {
        -(-a).exp().ln_1p()
    } else {
        a - a.exp().ln_1p()
    }
}

/// `lambda(xi) = tanh(xi/2) / (4 xi)`; even in `xi`
#[inline]
pub fn jj_lambda(xi: f64) -> f64 {
    let xi = xi.abs();
    if xi < XI_SMALL {
        LAMBDA_AT_ZERO
    } else {
        (0.5 * xi).tanh() / (4.0 * xi)
    }
}

/// Expected bound of one CpG, less the data term `(y - 1/2) h'E[w]`, when
/// `xi` sits at its optimum `xi^2 = E[(h'w)^2]`.
///
/// The quadratic terms cancel there, leaving `log sigmoid(xi) - xi/2`.
#[inline]
pub fn jj_site_offset(xi: f64) -> f64 {
    log_sigmoid(xi) - 0.5 * xi
}

/// `E[ln pi_k] = psi(delta_k) - psi(sum delta)`
pub fn dirichlet_expected_log(delta: &[f64]) -> Vec<f64> {
    let total: f64 = delta.iter().sum();
    let psi_total = total.digamma();
    delta.iter().map(|d| d.digamma() - psi_total).collect()
}

/// `ln C(a) = ln Gamma(sum a) - sum ln Gamma(a)`
pub fn ln_dirichlet_norm(alpha: &[f64]) -> f64 {
    let total: f64 = alpha.iter().sum();
    SpecialGamma::ln_gamma(total).0 - alpha.iter().map(|&a| SpecialGamma::ln_gamma(a).0).sum::<f64>()
}

/// `E[ln p(pi)] - E[ln q(pi)]` for a symmetric `Dir(delta0)` prior and
/// `Dir(delta)` posterior
pub fn dirichlet_elbo(delta0: f64, delta: &[f64]) -> f64 {
    let prior = vec![delta0; delta.len()];
    let e_ln_pi = dirichlet_expected_log(delta);
    let cross: f64 = delta
        .iter()
        .zip(e_ln_pi.iter())
        .map(|(d, e)| (delta0 - d) * e)
        .sum();
    ln_dirichlet_norm(&prior) - ln_dirichlet_norm(delta) + cross
}

/// Mean of `Gamma(shape, rate)`
#[inline]
pub fn gamma_mean(shape: f64, rate: f64) -> f64 {
    shape / rate
}

/// `E[ln tau]` under `Gamma(shape, rate)`
#[inline]
pub fn gamma_expected_log(shape: f64, rate: f64) -> f64 {
    shape.digamma() - rate.ln()
}

/// `E[ln p(tau)] - E[ln q(tau)]` for a `Gamma(a0, b0)` prior and
/// `Gamma(a, b)` posterior (shape-rate)
pub fn gamma_elbo(a0: f64, b0: f64, a: f64, b: f64) -> f64 {
    let e_tau = gamma_mean(a, b);
    let e_ln_tau = gamma_expected_log(a, b);

    let ln_prior = a0 * b0.ln() - SpecialGamma::ln_gamma(a0).0 + (a0 - 1.0) * e_ln_tau - b0 * e_tau;
    // negative entropy of Gamma(a, b)
    let ln_post = a * b.ln() - SpecialGamma::ln_gamma(a).0 + (a - 1.0) * e_ln_tau - a;

    ln_prior - ln_post
}

/// `E[ln p(w | tau)] - E[ln q(w)]` for a `dim`-dimensional weight vector.
///
/// * `e_tau`, `e_ln_tau` - prior precision moments
/// * `second_moment` - `|m|^2 + tr(S)`
/// * `log_det_cov` - `ln |S|`
pub fn gaussian_weight_elbo(
    dim: usize,
    e_tau: f64,
    e_ln_tau: f64,
    second_moment: f64,
    log_det_cov: f64,
) -> f64 {
    let d = dim as f64;
    0.5 * d * e_ln_tau + 0.5 * d - 0.5 * e_tau * second_moment + 0.5 * log_det_cov
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_sigmoid_is_stable() {
        assert_abs_diff_eq!(sigmoid(0.0), 0.5);
        assert_abs_diff_eq!(sigmoid(800.0), 1.0);
        assert_abs_diff_eq!(sigmoid(-800.0), 0.0);
        assert!(log_sigmoid(-800.0).is_finite());
        assert_abs_diff_eq!(log_sigmoid(-800.0), -800.0, epsilon = 1e-9);
        assert_abs_diff_eq!(log_sigmoid(1.3), sigmoid(1.3).ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_lambda_limit() {
        assert_abs_diff_eq!(jj_lambda(0.0), 0.125);
        assert_abs_diff_eq!(jj_lambda(1e-4), 0.125, epsilon = 1e-8);
        assert_abs_diff_eq!(jj_lambda(-2.0), jj_lambda(2.0));
        assert!(jj_lambda(5.0) < jj_lambda(1.0));
    }

    fn log_sigmoid_bound(a: f64, xi: f64) -> f64 {
        log_sigmoid(xi) + 0.5 * (a - xi) - jj_lambda(xi) * (a * a - xi * xi)
    }

    #[test]
    fn test_bound_is_below_and_tight() {
        for &a in &[-6.0, -1.5, 0.0, 0.7, 3.2] {
            for &xi in &[0.0, 0.5, 1.0, 4.0] {
                assert!(log_sigmoid_bound(a, xi) <= log_sigmoid(a) + 1e-12);
            }
            let xi: f64 = a;
            assert_abs_diff_eq!(log_sigmoid_bound(a, xi.abs()), log_sigmoid(a), epsilon = 1e-10);
        }
    }

    #[test]
    fn test_site_offset_recovers_likelihood_at_optimum() {
        // point mass weights: xi = |a|, bound = y a + log sigmoid(-a)
        for &a in &[-2.5, 0.3, 1.7, 4.0] {
            let xi: f64 = a;
            let xi = xi.abs();
            assert_abs_diff_eq!(jj_site_offset(xi) + 0.5 * a, log_sigmoid(a), epsilon = 1e-12);
            assert_abs_diff_eq!(jj_site_offset(xi) - 0.5 * a, log_sigmoid(-a), epsilon = 1e-12);
            assert_abs_diff_eq!(jj_site_offset(xi), log_sigmoid_bound(a, xi) - 0.5 * a, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_dirichlet_terms() {
        // E[ln pi] under Dir(1, 1) = psi(1) - psi(2) = -1
        let e = dirichlet_expected_log(&[1.0, 1.0]);
        assert_abs_diff_eq!(e[0], -1.0, epsilon = 1e-10);
        // ln C(1, 1, 1) = ln Gamma(3) = ln 2
        assert_abs_diff_eq!(ln_dirichlet_norm(&[1.0; 3]), 2f64.ln(), epsilon = 1e-10);
        assert_abs_diff_eq!(dirichlet_elbo(1.0, &[1.0; 4]), 0.0, epsilon = 1e-10);
        assert!(dirichlet_elbo(1.0, &[20.0, 3.0, 1.0]) < 0.0);
    }

    #[test]
    fn test_gamma_terms() {
        assert_abs_diff_eq!(gamma_elbo(0.5, 2.0, 0.5, 2.0), 0.0, epsilon = 1e-10);
        assert!(gamma_elbo(0.5, 2.0, 10.0, 3.0) < 0.0);
        assert_abs_diff_eq!(gamma_mean(3.0, 2.0), 1.5);
    }

    #[test]
    fn test_gaussian_term_vanishes_at_prior() {
        // q(w) = N(0, 1/tau I) with tau fixed
        let (d, tau) = (4, 2.5f64);
        let second = d as f64 / tau;
        let log_det = -(d as f64) * tau.ln();
        let elbo = gaussian_weight_elbo(d, tau, tau.ln(), second, log_det);
        assert_abs_diff_eq!(elbo, 0.0, epsilon = 1e-12);
    }
}
