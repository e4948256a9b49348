//! Basis function expansion.
//!
//! A basis maps a relative position `x` in `[-1, 1]` to a feature vector
//! `h(x)` whose first entry is always the constant bias `1`.
//!
//! ```text
//! radial:      [1, exp(-gamma (x - mu_1)^2), ..., exp(-gamma (x - mu_M)^2)]
//! polynomial:  [1, x, x^2, ..., x^M]
//! fourier:     [1, cos(2 pi x / T), sin(2 pi x / T), ..., cos(2 pi M x / T), sin(2 pi M x / T)]
//! ```

use crate::{DVec, Mat};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Width of the relative position domain `[-1, 1]`
const DOMAIN_WIDTH: f64 = 2.0;

/// Basis family with its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "lowercase")]
pub enum Basis {
    /// Gaussian radial basis functions with fixed centres
    Radial {
        /// Centres `mu_j`, evenly spaced over the domain
        centers: Vec<f64>,
        /// Inverse squared scale of every kernel
        gamma: f64,
    },
    /// Monomials up to `degree`
    Polynomial {
        /// Highest power
        degree: usize,
    },
    /// Cosine/sine pairs up to harmonic `order`
    Fourier {
        /// Number of harmonics
        order: usize,
        /// Period of the first harmonic
        period: f64,
    },
}

impl Basis {
    /// `m` radial functions evenly spaced over `[-1, 1]`.
    ///
    /// * `gamma` - kernel scale; defaults to `m^2 / 4`
    pub fn radial(m: usize, gamma: Option<f64>) -> anyhow::Result<Self> {
        anyhow::ensure!(m >= 1, "radial basis needs at least one centre");
        let centers = if m == 1 {
            vec![0.0]
        } else {
            let step = DOMAIN_WIDTH / (m - 1) as f64;
            (0..m).map(|j| -1.0 + step * j as f64).collect()
        };
        let gamma = gamma.unwrap_or((m * m) as f64 / (DOMAIN_WIDTH * DOMAIN_WIDTH));
        let ret = Basis::Radial { centers, gamma };
        ret.validate()?;
        Ok(ret)
    }

    /// Polynomial of degree `m`
    pub fn polynomial(m: usize) -> anyhow::Result<Self> {
        let ret = Basis::Polynomial { degree: m };
        ret.validate()?;
        Ok(ret)
    }

    /// `m` Fourier harmonics; `period` defaults to the domain width
    pub fn fourier(m: usize, period: Option<f64>) -> anyhow::Result<Self> {
        let ret = Basis::Fourier {
            order: m,
            period: period.unwrap_or(DOMAIN_WIDTH),
        };
        ret.validate()?;
        Ok(ret)
    }

    /// Check the parameters
    pub fn validate(&self) -> anyhow::Result<()> {
        match self {
            Basis::Radial { centers, gamma } => {
                anyhow::ensure!(!centers.is_empty(), "radial basis needs at least one centre");
                anyhow::ensure!(
                    gamma.is_finite() && *gamma > 0.0,
                    "radial basis gamma must be positive, got {}",
                    gamma
                );
                anyhow::ensure!(
                    centers.iter().all(|c| c.is_finite()),
                    "radial basis centres must be finite"
                );
            }
            Basis::Polynomial { degree } => {
                anyhow::ensure!(*degree >= 1, "polynomial basis degree must be >= 1");
            }
            Basis::Fourier { order, period } => {
                anyhow::ensure!(*order >= 1, "Fourier basis order must be >= 1");
                anyhow::ensure!(
                    period.is_finite() && *period > 0.0,
                    "Fourier basis period must be positive, got {}",
                    period
                );
            }
        }
        Ok(())
    }

    /// Number of basis functions excluding the bias
    pub fn order(&self) -> usize {
        match self {
            Basis::Radial { centers, .. } => centers.len(),
            Basis::Polynomial { degree } => *degree,
            Basis::Fourier { order, .. } => *order,
        }
    }

    /// Length of the feature vector including the bias
    pub fn dim(&self) -> usize {
        match self {
            Basis::Radial { centers, .. } => centers.len() + 1,
            Basis::Polynomial { degree } => degree + 1,
            Basis::Fourier { order, .. } => 2 * order + 1,
        }
    }

    /// Family name
    pub fn family(&self) -> &'static str {
        match self {
            Basis::Radial { .. } => "radial",
            Basis::Polynomial { .. } => "polynomial",
            Basis::Fourier { .. } => "fourier",
        }
    }

    /// Write `h(x)` into `out` (length `dim()`)
    fn fill_features(&self, x: f64, out: &mut [f64]) {
        out[0] = 1.0;
        match self {
            Basis::Radial { centers, gamma } => {
                for (o, mu) in out[1..].iter_mut().zip(centers) {
                    *o = (-gamma * (x - mu) * (x - mu)).exp();
                }
            }
            Basis::Polynomial { degree } => {
                let mut pow = 1.0;
                for o in out[1..=*degree].iter_mut() {
                    pow *= x;
                    *o = pow;
                }
            }
            Basis::Fourier { order, period } => {
                for j in 1..=*order {
                    let arg = 2.0 * PI * j as f64 * x / period;
                    out[2 * j - 1] = arg.cos();
                    out[2 * j] = arg.sin();
                }
            }
        }
    }

    /// Feature vector `h(x)`
    pub fn features(&self, x: f64) -> DVec {
        let mut out = vec![0.0; self.dim()];
        self.fill_features(x, &mut out);
        DVec::from_vec(out)
    }

    /// Design matrix with one row `h(x_i)` per position
    pub fn design_matrix(&self, xs: &[f64]) -> Mat {
        let dd = self.dim();
        let mut hh = Mat::zeros(xs.len(), dd);
        let mut buf = vec![0.0; dd];
        for (i, &x) in xs.iter().enumerate() {
            self.fill_features(x, &mut buf);
            for (j, &v) in buf.iter().enumerate() {
                hh[(i, j)] = v;
            }
        }
        hh
    }
}
