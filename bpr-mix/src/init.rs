use crate::data::{ExpandedData, RegionDesign};
use crate::model::jj_lambda;
use crate::weights::WeightPosterior;
use crate::{DVec, Mat};
use log::info;
use matrix_util::clustering::{Kmeans, KmeansArgs};
use matrix_util::dmatrix_util::rnorm;
use rand::rngs::SmallRng;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

const PROFILE_PRIOR_PRECISION: f64 = 1.0;
const PROFILE_MAX_ITER: usize = 20;
const PROFILE_TOL: f64 = 1e-6;
const KMEANS_MAX_ITER: usize = 100;

/// How a restart chooses its first weight posteriors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InitMethod {
    /// Cluster per-cell profile fits with seeded k-means++
    #[default]
    Kmeans,
    /// Draw every weight from `N(0, 1)`
    Random,
}

/// Independent Bayesian logistic fit of one cell-region under a fixed
/// `N(0, I)` prior, iterating the Jaakkola-Jordan updates
pub fn fit_region_profile(design: &RegionDesign) -> DVec {
    let dim = design.h.ncols();
    let mut xi = DVec::zeros(design.len());
    let mut mean = DVec::zeros(dim);

    for _ in 0..PROFILE_MAX_ITER {
        let lam = xi.map(jj_lambda);
        let mut precision = Mat::identity(dim, dim) * PROFILE_PRIOR_PRECISION;
        let weighted = Mat::from_fn(design.h.nrows(), dim, |i, j| lam[i] * design.h[(i, j)]);
        precision += design.h.tr_mul(&weighted) * 2.0;

        let q = WeightPosterior::from_natural(&precision, &design.hty);
        xi = q.site_xi(&design.h);
        let change = (&q.mean - &mean).norm();
        mean = q.mean;
        if change < PROFILE_TOL {
            break;
        }
    }
    mean
}

/// Profile fits of every covered cell-region, computed once and shared by
/// all restarts
#[derive(Debug, Clone)]
pub struct CellProfiles {
    /// `fits[n][m]`, `None` where the cell has no calls in the region
    pub fits: Vec<Vec<Option<DVec>>>,
    /// Per-region mean over covered cells (zero if nobody covers it)
    pub region_means: Vec<DVec>,
    /// Basis dimension
    pub dim: usize,
}

impl CellProfiles {
    /// Fit every covered cell-region in parallel
    pub fn fit(data: &ExpandedData) -> Self {
        let fits: Vec<Vec<Option<DVec>>> = data
            .designs
            .par_iter()
            .map(|cell| {
                cell.iter()
                    .map(|d| d.as_ref().map(fit_region_profile))
                    .collect()
            })
            .collect();

        let region_means = (0..data.num_regions)
            .map(|m| {
                let mut sum = DVec::zeros(data.dim);
                let mut count = 0usize;
                for w in fits.iter().filter_map(|cell| cell[m].as_ref()) {
                    sum += w;
                    count += 1;
                }
                if count > 0 {
                    sum / count as f64
                } else {
                    sum
                }
            })
            .collect();

        info!("Fitted {} per-cell region profiles", data.num_covered());

        Self {
            fits,
            region_means,
            dim: data.dim,
        }
    }

    /// Number of cells
    pub fn num_cells(&self) -> usize {
        self.fits.len()
    }

    /// Number of regions
    pub fn num_regions(&self) -> usize {
        self.region_means.len()
    }

    /// Cell × (region · dim) matrix of profile weights; regions a cell does
    /// not cover take the region's mean profile
    pub fn feature_matrix(&self) -> Mat {
        let (nn, mm, dd) = (self.num_cells(), self.num_regions(), self.dim);
        let mut features = Mat::zeros(nn, mm * dd);
        for (n, cell) in self.fits.iter().enumerate() {
            for (m, fit) in cell.iter().enumerate() {
                let w = fit.as_ref().unwrap_or(&self.region_means[m]);
                for (j, &v) in w.iter().enumerate() {
                    features[(n, m * dd + j)] = v;
                }
            }
        }
        features
    }
}

/// Initial weight posteriors, indexed `[region][cluster]`
pub fn initial_weights(
    method: InitMethod,
    profiles: Option<(&CellProfiles, &Mat)>,
    num_regions: usize,
    dim: usize,
    num_clusters: usize,
    rng: &mut SmallRng,
) -> Vec<Vec<WeightPosterior>> {
    match (method, profiles) {
        (InitMethod::Kmeans, Some((profiles, features))) => {
            kmeans_weights(profiles, features, num_clusters, rng)
        }
        _ => random_weights(num_regions, dim, num_clusters, rng),
    }
}

fn random_weights(
    num_regions: usize,
    dim: usize,
    num_clusters: usize,
    rng: &mut SmallRng,
) -> Vec<Vec<WeightPosterior>> {
    (0..num_regions)
        .map(|_| {
            let ww = rnorm(dim, num_clusters, rng);
            ww.column_iter()
                .map(|w| WeightPosterior::from_mean(w.into_owned()))
                .collect()
        })
        .collect()
}

/// Cluster weights start at the mean profile of the cells k-means puts in
/// the cluster. A cluster with no member covering a region falls back to
/// the region's mean profile; a cluster with no member at all is drawn at
/// random.
fn kmeans_weights(
    profiles: &CellProfiles,
    features: &Mat,
    num_clusters: usize,
    rng: &mut SmallRng,
) -> Vec<Vec<WeightPosterior>> {
    let args = KmeansArgs {
        num_clusters,
        max_iter: KMEANS_MAX_ITER,
        seed: rng.random::<u64>(),
    };
    let membership = features.kmeans_rows(args);

    let mut sizes = vec![0usize; num_clusters];
    for &k in membership.iter() {
        sizes[k] += 1;
    }

    let dd = profiles.dim;
    (0..profiles.num_regions())
        .map(|m| {
            let mut sums = vec![DVec::zeros(dd); num_clusters];
            let mut counts = vec![0usize; num_clusters];
            for (cell, &k) in profiles.fits.iter().zip(membership.iter()) {
                if let Some(w) = cell[m].as_ref() {
                    sums[k] += w;
                    counts[k] += 1;
                }
            }

            sums.into_iter()
                .zip(counts)
                .enumerate()
                .map(|(k, (sum, count))| {
                    let mean = if count > 0 {
                        sum / count as f64
                    } else if sizes[k] > 0 {
                        profiles.region_means[m].clone()
                    } else {
                        DVec::from_fn(dd, |_, _| rng.sample(rand_distr::StandardNormal))
                    };
                    WeightPosterior::from_mean(mean)
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::Basis;
    use crate::data::{CpgCall, MethylData};
    use crate::model::sigmoid;
    use rand::SeedableRng;

    fn two_group_data() -> anyhow::Result<MethylData> {
        // cells 0..5 methylated everywhere, cells 5..10 nowhere
        let met = (0..10)
            .map(|n| {
                (0..3)
                    .map(|m| {
                        if (n + m) % 4 == 3 {
                            return vec![];
                        }
                        (0..12)
                            .map(|i| CpgCall::new(-0.9 + 0.15 * i as f64, n < 5))
                            .collect()
                    })
                    .collect()
            })
            .collect();
        MethylData::new(
            (0..10).map(|n| format!("c{}", n).into()).collect(),
            (0..3).map(|m| format!("r{}", m).into()).collect(),
            met,
        )
    }

    #[test]
    fn test_profile_fit_follows_calls() -> anyhow::Result<()> {
        let basis = Basis::radial(3, None)?;
        let calls: Vec<CpgCall> = (0..20).map(|i| CpgCall::new(-0.95 + 0.1 * i as f64, true)).collect();
        let design = RegionDesign::from_calls(&basis, &calls).unwrap();
        let w = fit_region_profile(&design);
        assert!(sigmoid(basis.features(0.0).dot(&w)) > 0.7);
        Ok(())
    }

    #[test]
    fn test_feature_matrix_fills_uncovered_regions() -> anyhow::Result<()> {
        let basis = Basis::polynomial(1)?;
        let expanded = two_group_data()?.expand(&basis);
        let profiles = CellProfiles::fit(&expanded);
        let features = profiles.feature_matrix();
        assert_eq!(features.shape(), (10, 3 * 2));

        // cell 3 does not cover region 0
        assert!(profiles.fits[3][0].is_none());
        assert_eq!(features[(3, 0)], profiles.region_means[0][0]);
        Ok(())
    }

    #[test]
    fn test_kmeans_weights_separate_groups() -> anyhow::Result<()> {
        let basis = Basis::polynomial(1)?;
        let expanded = two_group_data()?.expand(&basis);
        let profiles = CellProfiles::fit(&expanded);
        let features = profiles.feature_matrix();
        let mut rng = SmallRng::seed_from_u64(1);

        let weights = initial_weights(
            InitMethod::Kmeans,
            Some((&profiles, &features)),
            3,
            2,
            2,
            &mut rng,
        );
        assert_eq!(weights.len(), 3);
        assert_eq!(weights[0].len(), 2);

        // the two clusters disagree in the sign of the intercept
        let b0 = weights[1][0].mean[0];
        let b1 = weights[1][1].mean[0];
        assert!(b0 * b1 < 0.0, "intercepts {} and {}", b0, b1);
        Ok(())
    }

    #[test]
    fn test_random_weights_shape() {
        let mut rng = SmallRng::seed_from_u64(5);
        let weights = initial_weights(InitMethod::Random, None, 4, 3, 2, &mut rng);
        assert_eq!(weights.len(), 4);
        assert!(weights.iter().all(|w| w.len() == 2 && w[0].dim() == 3));
    }
}
