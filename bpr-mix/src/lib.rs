//! Joint clustering and imputation of single-cell DNA methylation profiles.
//!
//! Every cell is a collection of genomic regions, every region a sequence of
//! binary CpG methylation calls at relative positions in `[-1, 1]`. Cells
//! belong to one of K latent subpopulations; each subpopulation has, per
//! region, a smooth methylation profile expressed as a weighted sum of basis
//! functions passed through a logistic link.
//!
//! # Model
//!
//! ```text
//! c_n ~ Categorical(pi),            pi ~ Dirichlet(delta_0)
//! w_mk | tau_k ~ N(0, 1/tau_k I),   tau_k ~ Gamma(alpha_0, beta_0)
//! y_nmi | c_n = k ~ Bernoulli(sigmoid(h(x_nmi)' w_mk))
//! ```
//!
//! Inference is mean-field variational Bayes. The logistic likelihood is
//! replaced by the Jaakkola-Jordan quadratic bound, so every coordinate
//! update is in closed form and the evidence lower bound never decreases.
//!
//! # References
//!
//! Jaakkola & Jordan (2000). "Bayesian parameter estimation via variational
//! methods." Statistics and Computing 10:25-37.

#![warn(missing_docs)]

/// Basis function expansion of relative CpG positions
pub mod basis;

/// Per-cell, per-region CpG calls and their basis expansion
pub mod data;

/// Held-out partitioning of CpG calls
pub mod partition;

/// Logistic bound and conjugate expectation helpers
pub mod model;

/// Gaussian posteriors over regression weights
pub mod weights;

/// Restart initialisation: per-cell profile fits and seeded k-means
pub mod init;

/// Variational EM over cluster memberships and weight posteriors
pub mod variational;

/// Clustering quality: adjusted Rand index and assignment error
pub mod evaluation;

/// Imputation quality: AUC, F-measure, ROC and PR curves
pub mod imputation;

/// Synthetic methylation data with known subpopulations
pub mod simulate;

/// Long-table and fit persistence
pub mod io;

#[cfg(test)]
mod test;

/// Dense matrix used throughout the crate
pub type Mat = nalgebra::DMatrix<f64>;

/// Dense column vector used throughout the crate
pub type DVec = nalgebra::DVector<f64>;

pub use basis::Basis;
pub use data::{CpgCall, MethylData};
pub use evaluation::{ClusterEval, FitReport};
pub use imputation::ImputationEval;
pub use partition::PartitionArgs;
pub use variational::{fit_mixture, InitMethod, MixtureFit, VbOptions};
