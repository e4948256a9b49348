pub use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;

/// Sample d,n matrix from U(0,1) using the caller's generator
pub fn runif<R: Rng + ?Sized>(dd: usize, nn: usize, rng: &mut R) -> DMatrix<f64> {
    DMatrix::<f64>::from_fn(dd, nn, |_, _| rng.random::<f64>())
}

/// Sample d,n matrix from N(0,1) using the caller's generator
pub fn rnorm<R: Rng + ?Sized>(dd: usize, nn: usize, rng: &mut R) -> DMatrix<f64> {
    DMatrix::<f64>::from_fn(dd, nn, |_, _| rng.sample(StandardNormal))
}

/// `log(sum(exp(x)))` without overflow; `-inf` for an empty or all `-inf` input
pub fn log_sum_exp(xs: &[f64]) -> f64 {
    let max = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    let sum: f64 = xs.iter().map(|&x| (x - max).exp()).sum();
    max + sum.ln()
}

/// Turn each row of log-weights into a probability vector in place.
///
/// Returns the log-normaliser of every row.
pub fn softmax_rows_inplace(log_weights: &mut DMatrix<f64>) -> Vec<f64> {
    let mut log_norm = Vec::with_capacity(log_weights.nrows());
    for mut row in log_weights.row_iter_mut() {
        let xs: Vec<f64> = row.iter().copied().collect();
        let lse = log_sum_exp(&xs);
        row.apply(|x| *x = (*x - lse).exp());
        log_norm.push(lse);
    }
    log_norm
}

/// Column index of the largest entry of each row (first one on ties)
pub fn argmax_rows(mat: &DMatrix<f64>) -> Vec<usize> {
    mat.row_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |(best, best_val), (k, &v)| {
                    if v > best_val {
                        (k, v)
                    } else {
                        (best, best_val)
                    }
                })
                .0
        })
        .collect()
}
