//! Mean-field variational EM for the mixture of basis function regressions.
//!
//! # Updates
//!
//! ```text
//! E-step:  ln rho_nk = E[ln pi_k] + sum_m sum_i [ln sigmoid(xi) - xi/2] + hty_nm' m_mk
//! M-step:  delta_k   = delta_0 + sum_n r_nk
//!          S_mk^-1   = E[tau_k] I + 2 sum_n r_nk H' diag(lambda(xi)) H
//!          m_mk      = S_mk sum_n r_nk H' (y - 1/2)
//!          alpha_k   = alpha_0 + M D / 2
//!          beta_k    = beta_0 + 1/2 sum_m (|m_mk|^2 + tr S_mk)
//! ```
//!
//! `xi` is re-optimised (`xi^2 = h'(S + m m')h`) after every M-step, so the
//! evidence lower bound never decreases.

use crate::basis::Basis;
use crate::data::{ExpandedData, MethylData};
use crate::init::{initial_weights, CellProfiles};
use crate::model::*;
use crate::weights::WeightPosterior;
use crate::{DVec, Mat};
use indicatif::ParallelProgressIterator;
use log::{info, warn};
use matrix_util::dmatrix_util::{argmax_rows, softmax_rows_inplace};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub use crate::init::InitMethod;

const MIN_RESP: f64 = 1e-12;
const EMPTY_CLUSTER_MASS: f64 = 1e-3;
const ELBO_DECREASE_TOL: f64 = 1e-6;
const LOG_EVERY: usize = 10;

/// Options for variational inference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VbOptions {
    /// Number of clusters K. Default: 2
    pub num_clusters: usize,
    /// Maximum number of iterations, restarts included. Default: 300
    pub max_iter: usize,
    /// Number of restarts. Default: 10
    pub init_nstart: usize,
    /// Iterations of every restart before the best is selected. Default: 20
    pub init_max_iter: usize,
    /// Stop when the bound changes less than this. Default: 1e-4
    pub epsilon_conv: f64,
    /// Run restarts in parallel. Default: true
    pub is_parallel: bool,
    /// Initialisation of the weight posteriors. Default: k-means
    pub init_method: InitMethod,
    /// Dirichlet concentration of the mixing proportions. Default: 1
    pub delta_0: f64,
    /// Gamma shape of the weight precision. Default: 0.5
    pub alpha_0: f64,
    /// Gamma rate of the weight precision; `None` uses `sqrt(D)`
    pub beta_0: Option<f64>,
    /// Random seed; restart `r` uses `seed + r`. Default: 42
    pub seed: u64,
}

impl Default for VbOptions {
    fn default() -> Self {
        Self {
            num_clusters: 2,
            max_iter: 300,
            init_nstart: 10,
            init_max_iter: 20,
            epsilon_conv: 1e-4,
            is_parallel: true,
            init_method: InitMethod::Kmeans,
            delta_0: 1.0,
            alpha_0: 0.5,
            beta_0: None,
            seed: 42,
        }
    }
}

impl VbOptions {
    /// Same options with `k` clusters
    pub fn with_clusters(k: usize) -> Self {
        Self {
            num_clusters: k,
            ..Default::default()
        }
    }

    /// Reject options no fit can run with
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.num_clusters >= 1, "need at least one cluster");
        anyhow::ensure!(self.max_iter >= 1, "max_iter must be at least 1");
        anyhow::ensure!(self.init_nstart >= 1, "init_nstart must be at least 1");
        anyhow::ensure!(self.init_max_iter >= 1, "init_max_iter must be at least 1");
        anyhow::ensure!(
            self.epsilon_conv.is_finite() && self.epsilon_conv > 0.0,
            "epsilon_conv must be positive, got {}",
            self.epsilon_conv
        );
        anyhow::ensure!(
            self.delta_0 > 0.0,
            "delta_0 must be positive, got {}",
            self.delta_0
        );
        anyhow::ensure!(
            self.alpha_0 > 0.0,
            "alpha_0 must be positive, got {}",
            self.alpha_0
        );
        if let Some(b) = self.beta_0 {
            anyhow::ensure!(b > 0.0, "beta_0 must be positive, got {}", b);
        }
        Ok(())
    }

    /// Gamma rate prior for a basis of dimension `dim`
    pub fn beta_0_for(&self, dim: usize) -> f64 {
        self.beta_0.unwrap_or((dim as f64).sqrt())
    }
}

/// Read-only inputs shared by all restarts
struct FitContext<'a> {
    data: &'a ExpandedData,
    opts: &'a VbOptions,
    beta_0: f64,
    profiles: Option<(CellProfiles, Mat)>,
}

/// Variational state of one restart
struct VbState {
    /// N x K responsibilities
    resp: Mat,
    /// Dirichlet posterior of the mixing proportions
    delta: Vec<f64>,
    tau_shape: Vec<f64>,
    tau_rate: Vec<f64>,
    /// `[region][cluster]`
    weights: Vec<Vec<WeightPosterior>>,
    /// N x K expected bounded log-likelihood under the current weights
    ell: Mat,
    /// `lambda(xi)` per covered cell-region, CpG x K
    lambda: Vec<Vec<Option<Mat>>>,
    elbo_trace: Vec<f64>,
    converged: bool,
}

/// Expected log-likelihood bound of every cell under every cluster, with
/// `xi` at its optimum for the given weight posteriors
fn expected_log_lik(
    data: &ExpandedData,
    weights: &[Vec<WeightPosterior>],
    kk: usize,
) -> (Mat, Vec<Vec<Option<Mat>>>) {
    let per_cell: Vec<(Vec<f64>, Vec<Option<Mat>>)> = data
        .designs
        .par_iter()
        .map(|cell| {
            let mut ell = vec![0.0; kk];
            let lambda: Vec<Option<Mat>> = cell
                .iter()
                .zip(weights.iter())
                .map(|(design, qq)| {
                    design.as_ref().map(|d| {
                        let mut lam = Mat::zeros(d.len(), kk);
                        for (k, q) in qq.iter().enumerate() {
                            let xi = q.site_xi(&d.h);
                            let offset: f64 = xi.iter().map(|&x| jj_site_offset(x)).sum();
                            ell[k] += offset + d.hty.dot(&q.mean);
                            lam.set_column(k, &xi.map(jj_lambda));
                        }
                        lam
                    })
                })
                .collect();
            (ell, lambda)
        })
        .collect();

    let ell = Mat::from_fn(per_cell.len(), kk, |n, k| per_cell[n].0[k]);
    let lambda = per_cell.into_iter().map(|(_, lam)| lam).collect();
    (ell, lambda)
}

impl VbState {
    fn new(ctx: &FitContext, rng: &mut SmallRng) -> Self {
        let data = ctx.data;
        let kk = ctx.opts.num_clusters;

        let weights = initial_weights(
            ctx.opts.init_method,
            ctx.profiles.as_ref().map(|(p, f)| (p, f)),
            data.num_regions,
            data.dim,
            kk,
            rng,
        );
        let (ell, lambda) = expected_log_lik(data, &weights, kk);

        Self {
            resp: Mat::from_element(data.num_cells, kk, 1.0 / kk as f64),
            delta: vec![ctx.opts.delta_0; kk],
            tau_shape: vec![ctx.opts.alpha_0; kk],
            tau_rate: vec![ctx.beta_0; kk],
            weights,
            ell,
            lambda,
            elbo_trace: vec![],
            converged: false,
        }
    }

    fn num_clusters(&self) -> usize {
        self.delta.len()
    }

    fn iterations(&self) -> usize {
        self.elbo_trace.len()
    }

    fn elbo(&self) -> f64 {
        self.elbo_trace.last().copied().unwrap_or(f64::NEG_INFINITY)
    }

    fn e_step(&mut self) {
        let e_ln_pi = dirichlet_expected_log(&self.delta);
        let mut log_rho = self.ell.clone();
        for mut row in log_rho.row_iter_mut() {
            for (x, e) in row.iter_mut().zip(e_ln_pi.iter()) {
                *x += e;
            }
        }
        softmax_rows_inplace(&mut log_rho);
        self.resp = log_rho;
    }

    fn m_step(&mut self, ctx: &FitContext) {
        let data = ctx.data;
        let (kk, dd) = (self.num_clusters(), data.dim);

        for (k, d) in self.delta.iter_mut().enumerate() {
            *d = ctx.opts.delta_0 + self.resp.column(k).sum();
        }

        let e_tau: Vec<f64> = (0..kk)
            .map(|k| gamma_mean(self.tau_shape[k], self.tau_rate[k]))
            .collect();

        let resp = &self.resp;
        let lambda = &self.lambda;
        self.weights = (0..data.num_regions)
            .into_par_iter()
            .map(|m| {
                let mut precision: Vec<Mat> =
                    e_tau.iter().map(|&t| Mat::identity(dd, dd) * t).collect();
                let mut shift = vec![DVec::zeros(dd); kk];

                for (n, cell) in data.designs.iter().enumerate() {
                    let (Some(design), Some(lam)) = (cell[m].as_ref(), lambda[n][m].as_ref())
                    else {
                        continue;
                    };
                    for k in 0..kk {
                        let r = resp[(n, k)];
                        if r < MIN_RESP {
                            continue;
                        }
                        let scaled = Mat::from_fn(design.len(), dd, |i, j| {
                            2.0 * r * lam[(i, k)] * design.h[(i, j)]
                        });
                        precision[k] += design.h.tr_mul(&scaled);
                        shift[k].axpy(r, &design.hty, 1.0);
                    }
                }

                precision
                    .iter()
                    .zip(shift.iter())
                    .map(|(p, b)| WeightPosterior::from_natural(p, b))
                    .collect::<Vec<_>>()
            })
            .collect();

        let shape = ctx.opts.alpha_0 + (data.num_regions * dd) as f64 / 2.0;
        for k in 0..kk {
            let second: f64 = self.weights.iter().map(|w| w[k].second_moment_trace()).sum();
            self.tau_shape[k] = shape;
            self.tau_rate[k] = ctx.beta_0 + 0.5 * second;
        }
    }

    fn compute_elbo(&self, ctx: &FitContext) -> f64 {
        let kk = self.num_clusters();
        let dd = ctx.data.dim;
        let e_ln_pi = dirichlet_expected_log(&self.delta);

        let mut ret = 0.0;
        for n in 0..self.resp.nrows() {
            for k in 0..kk {
                let r = self.resp[(n, k)];
                ret += r * (self.ell[(n, k)] + e_ln_pi[k]);
                if r > 0.0 {
                    ret -= r * r.ln();
                }
            }
        }

        ret += dirichlet_elbo(ctx.opts.delta_0, &self.delta);

        for k in 0..kk {
            let (a, b) = (self.tau_shape[k], self.tau_rate[k]);
            let (e_tau, e_ln_tau) = (gamma_mean(a, b), gamma_expected_log(a, b));
            ret += self
                .weights
                .iter()
                .map(|w| {
                    let q = &w[k];
                    gaussian_weight_elbo(dd, e_tau, e_ln_tau, q.second_moment_trace(), q.log_det_cov)
                })
                .sum::<f64>();
            ret += gamma_elbo(ctx.opts.alpha_0, ctx.beta_0, a, b);
        }
        ret
    }

    fn iterate(&mut self, ctx: &FitContext) {
        self.e_step();
        self.m_step(ctx);

        let (ell, lambda) = expected_log_lik(ctx.data, &self.weights, self.num_clusters());
        self.ell = ell;
        self.lambda = lambda;

        let elbo = self.compute_elbo(ctx);
        if let Some(&prev) = self.elbo_trace.last() {
            let delta = elbo - prev;
            if delta < -ELBO_DECREASE_TOL * prev.abs().max(1.0) {
                warn!("ELBO decreased by {:.3e} at iteration {}", -delta, self.iterations() + 1);
            }
            if delta.abs() < ctx.opts.epsilon_conv {
                self.converged = true;
            }
        }
        self.elbo_trace.push(elbo);
    }

    /// Iterate until convergence or `num_iter` more iterations
    fn run(&mut self, ctx: &FitContext, num_iter: usize, verbose: bool) {
        for _ in 0..num_iter {
            if self.converged {
                break;
            }
            self.iterate(ctx);
            if verbose && self.iterations() % LOG_EVERY == 0 {
                info!("iteration {}: ELBO {:.4}", self.iterations(), self.elbo());
            }
        }
    }
}

/// Run one restart for its initial budget
fn run_restart(ctx: &FitContext, r: usize) -> VbState {
    let mut rng = SmallRng::seed_from_u64(ctx.opts.seed.wrapping_add(r as u64));
    let mut state = VbState::new(ctx, &mut rng);
    state.run(ctx, ctx.opts.init_max_iter.min(ctx.opts.max_iter), false);
    state
}

/// Keep the restart with the higher bound, the earlier one on ties
fn better(a: (usize, VbState), b: (usize, VbState)) -> (usize, VbState) {
    match b.1.elbo().total_cmp(&a.1.elbo()) {
        std::cmp::Ordering::Greater => b,
        std::cmp::Ordering::Less => a,
        std::cmp::Ordering::Equal => {
            if b.0 < a.0 {
                b
            } else {
                a
            }
        }
    }
}

/// Fit a K-cluster mixture of basis function regressions to the training
/// calls of `data`.
///
/// `init_nstart` restarts run for `init_max_iter` iterations each; the one
/// with the highest evidence lower bound continues up to `max_iter`
/// iterations in total. Not converging is not an error: the fit comes back
/// with `converged = false`.
pub fn fit_mixture(data: &MethylData, basis: &Basis, opts: &VbOptions) -> anyhow::Result<MixtureFit> {
    opts.validate()?;
    basis.validate()?;
    anyhow::ensure!(data.num_cells() > 0, "no cells to cluster");
    anyhow::ensure!(data.num_regions() > 0, "no regions");
    anyhow::ensure!(data.num_calls() > 0, "no CpG calls in the training data");
    if opts.num_clusters > data.num_cells() {
        warn!(
            "{} clusters for {} cells; some clusters will stay empty",
            opts.num_clusters,
            data.num_cells()
        );
    }

    let expanded = data.expand(basis);
    info!(
        "{} cells, {} regions, {} covered cell-regions, basis {} (D = {})",
        expanded.num_cells,
        expanded.num_regions,
        expanded.num_covered(),
        basis.family(),
        expanded.dim
    );

    let profiles = match opts.init_method {
        InitMethod::Kmeans => {
            let profiles = CellProfiles::fit(&expanded);
            let features = profiles.feature_matrix();
            Some((profiles, features))
        }
        InitMethod::Random => None,
    };

    let ctx = FitContext {
        data: &expanded,
        opts,
        beta_0: opts.beta_0_for(expanded.dim),
        profiles,
    };

    let nstart = opts.init_nstart;
    info!("{} restarts x {} iterations", nstart, opts.init_max_iter);

    let best = if opts.is_parallel {
        (0..nstart)
            .into_par_iter()
            .progress_count(nstart as u64)
            .map(|r| (r, run_restart(&ctx, r)))
            .reduce_with(better)
    } else {
        (0..nstart).map(|r| (r, run_restart(&ctx, r))).reduce(better)
    };
    let (best_restart, mut state) =
        best.ok_or_else(|| anyhow::anyhow!("no restart produced a fit"))?;

    info!(
        "best restart {} with ELBO {:.4} after {} iterations",
        best_restart,
        state.elbo(),
        state.iterations()
    );

    let remaining = opts.max_iter.saturating_sub(state.iterations());
    state.run(&ctx, remaining, true);

    if state.converged {
        info!(
            "converged after {} iterations, ELBO {:.4}",
            state.iterations(),
            state.elbo()
        );
    } else {
        warn!(
            "not converged after {} iterations; best ELBO {:.4}",
            state.iterations(),
            state.elbo()
        );
    }

    for (k, d) in state.delta.iter().enumerate() {
        if d - opts.delta_0 < EMPTY_CLUSTER_MASS {
            warn!("cluster {} is empty", k);
        }
    }

    Ok(MixtureFit::from_state(state, basis, data, opts, best_restart))
}

/// Result of a variational fit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixtureFit {
    /// Basis the weights refer to
    pub basis: Basis,
    /// Cell names, rows of `responsibilities`
    pub cells: Vec<Box<str>>,
    /// Region names, entries of `weights`
    pub regions: Vec<Box<str>>,
    /// Expected mixing proportions `E[pi]`
    pub mixing: Vec<f64>,
    /// N x K posterior cluster memberships
    pub responsibilities: Mat,
    /// Per region, the D x K matrix of posterior mean weights
    pub weights: Vec<Mat>,
    /// Gamma shape of every cluster's weight precision
    pub tau_shape: Vec<f64>,
    /// Gamma rate of every cluster's weight precision
    pub tau_rate: Vec<f64>,
    /// Evidence lower bound after every iteration
    pub elbo_trace: Vec<f64>,
    /// Whether the bound stopped changing within the budget
    pub converged: bool,
    /// Total number of iterations
    pub iterations: usize,
    /// Index of the selected restart
    pub best_restart: usize,
    /// Options the fit ran with
    pub options: VbOptions,
}

impl MixtureFit {
    fn from_state(
        state: VbState,
        basis: &Basis,
        data: &MethylData,
        opts: &VbOptions,
        best_restart: usize,
    ) -> Self {
        let total: f64 = state.delta.iter().sum();
        let mixing = state.delta.iter().map(|d| d / total).collect();
        let dd = basis.dim();
        let weights = state
            .weights
            .iter()
            .map(|qq| Mat::from_fn(dd, qq.len(), |j, k| qq[k].mean[j]))
            .collect();

        Self {
            basis: basis.clone(),
            cells: data.cells().to_vec(),
            regions: data.regions().to_vec(),
            mixing,
            responsibilities: state.resp,
            weights,
            tau_shape: state.tau_shape,
            tau_rate: state.tau_rate,
            iterations: state.elbo_trace.len(),
            elbo_trace: state.elbo_trace,
            converged: state.converged,
            best_restart,
            options: opts.clone(),
        }
    }

    /// Number of clusters
    pub fn num_clusters(&self) -> usize {
        self.mixing.len()
    }

    /// Number of cells
    pub fn num_cells(&self) -> usize {
        self.responsibilities.nrows()
    }

    /// Number of regions
    pub fn num_regions(&self) -> usize {
        self.weights.len()
    }

    /// Final evidence lower bound
    pub fn elbo(&self) -> f64 {
        self.elbo_trace.last().copied().unwrap_or(f64::NEG_INFINITY)
    }

    /// Most probable cluster of every cell
    pub fn hard_assignments(&self) -> Vec<usize> {
        argmax_rows(&self.responsibilities)
    }

    /// Number of cells assigned to each cluster
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.num_clusters()];
        for k in self.hard_assignments() {
            sizes[k] += 1;
        }
        sizes
    }

    /// Methylation probability of `cluster` at relative position `pos`
    /// within `region`
    pub fn predict(&self, region: usize, cluster: usize, pos: f64) -> f64 {
        let h = self.basis.features(pos);
        sigmoid(h.dot(&self.weights[region].column(cluster)))
    }
}
