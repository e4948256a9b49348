use crate::basis::Basis;
use crate::data::{CpgCall, MethylData};
use crate::model::sigmoid;
use crate::Mat;
use log::info;
use matrix_util::dmatrix_util::rnorm;
use rand::rngs::SmallRng;
use rand::seq::{index, SliceRandom};
use rand::{Rng, SeedableRng};

/// Parameters of a synthetic data set
#[derive(Debug, Clone)]
pub struct SimArgs {
    /// Number of cells
    pub num_cells: usize,
    /// Number of regions
    pub num_regions: usize,
    /// Number of true subpopulations
    pub num_clusters: usize,
    /// Inclusive range of CpGs per covered cell-region
    pub cpgs_per_region: (usize, usize),
    /// Probability that a cell covers a region
    pub region_coverage: f64,
    /// Standard deviation of the true weights
    pub weight_scale: f64,
    /// Fraction of regions whose profile is the same in every cluster
    pub shared_region_prcg: f64,
    /// Basis of the true profiles
    pub basis: Basis,
    /// Random seed
    pub seed: u64,
}

impl Default for SimArgs {
    fn default() -> Self {
        Self {
            num_cells: 200,
            num_regions: 100,
            num_clusters: 4,
            cpgs_per_region: (10, 30),
            region_coverage: 0.8,
            weight_scale: 2.0,
            shared_region_prcg: 0.0,
            basis: Basis::Radial {
                centers: vec![-1.0, 0.0, 1.0],
                gamma: 2.25,
            },
            seed: 42,
        }
    }
}

impl SimArgs {
    /// Check the parameters
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.num_cells >= 1, "need at least one cell");
        anyhow::ensure!(self.num_regions >= 1, "need at least one region");
        anyhow::ensure!(self.num_clusters >= 1, "need at least one cluster");
        let (lo, hi) = self.cpgs_per_region;
        anyhow::ensure!(
            lo >= 1 && lo <= hi,
            "invalid CpG range per region: {}..={}",
            lo,
            hi
        );
        anyhow::ensure!(
            self.region_coverage > 0.0 && self.region_coverage <= 1.0,
            "region coverage must be in (0, 1], got {}",
            self.region_coverage
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.shared_region_prcg),
            "shared region fraction must be in [0, 1], got {}",
            self.shared_region_prcg
        );
        anyhow::ensure!(
            self.weight_scale.is_finite() && self.weight_scale > 0.0,
            "weight scale must be positive, got {}",
            self.weight_scale
        );
        self.basis.validate()
    }
}

/// A synthetic data set with its ground truth
#[derive(Debug, Clone)]
pub struct Simulated {
    /// Simulated calls
    pub data: MethylData,
    /// True cluster of every cell
    pub labels: Vec<usize>,
    /// Per region, the D x K matrix of true weights
    pub weights: Vec<Mat>,
}

/// Draw cells from a mixture of region-wise methylation profiles.
///
/// Clusters are balanced: labels `n mod K` are shuffled over cells.
pub fn simulate(args: &SimArgs) -> anyhow::Result<Simulated> {
    args.validate()?;
    let mut rng = SmallRng::seed_from_u64(args.seed);
    let (kk, mm, dd) = (args.num_clusters, args.num_regions, args.basis.dim());

    let mut labels: Vec<usize> = (0..args.num_cells).map(|n| n % kk).collect();
    labels.shuffle(&mut rng);

    let mut weights: Vec<Mat> = (0..mm)
        .map(|_| rnorm(dd, kk, &mut rng) * args.weight_scale)
        .collect();

    let num_shared = (args.shared_region_prcg * mm as f64).round() as usize;
    for m in index::sample(&mut rng, mm, num_shared.min(mm)) {
        let first = weights[m].column(0).into_owned();
        for k in 1..kk {
            weights[m].set_column(k, &first);
        }
    }

    let (lo, hi) = args.cpgs_per_region;
    let met = labels
        .iter()
        .map(|&k| {
            (0..mm)
                .map(|m| {
                    if rng.random::<f64>() >= args.region_coverage {
                        return vec![];
                    }
                    let n_cpg = rng.random_range(lo..=hi);
                    let mut pos: Vec<f64> =
                        (0..n_cpg).map(|_| rng.random_range(-1.0..=1.0)).collect();
                    pos.sort_by(|a, b| a.total_cmp(b));
                    pos.into_iter()
                        .map(|x| {
                            let p = sigmoid(args.basis.features(x).dot(&weights[m].column(k)));
                            CpgCall::new(x, rng.random::<f64>() < p)
                        })
                        .collect()
                })
                .collect()
        })
        .collect();

    let cells = (0..args.num_cells).map(|n| format!("cell_{}", n).into()).collect();
    let regions = (0..mm).map(|m| format!("region_{}", m).into()).collect();
    let data = MethylData::new(cells, regions, met)?;

    info!(
        "Simulated {} cells x {} regions, {} clusters, {} calls",
        data.num_cells(),
        data.num_regions(),
        kk,
        data.num_calls()
    );

    Ok(Simulated {
        data,
        labels,
        weights,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_and_balance() -> anyhow::Result<()> {
        let sim = simulate(&SimArgs {
            num_cells: 30,
            num_regions: 6,
            num_clusters: 3,
            cpgs_per_region: (2, 5),
            ..Default::default()
        })?;
        assert_eq!(sim.data.num_cells(), 30);
        assert_eq!(sim.data.num_regions(), 6);
        assert_eq!(sim.weights.len(), 6);
        for k in 0..3 {
            assert_eq!(sim.labels.iter().filter(|&&l| l == k).count(), 10);
        }
        for cell in sim.data.met() {
            for calls in cell {
                assert!(calls.is_empty() || (2..=5).contains(&calls.len()));
                assert!(calls.windows(2).all(|w| w[0].pos <= w[1].pos));
            }
        }
        Ok(())
    }

    #[test]
    fn test_same_seed_same_data() -> anyhow::Result<()> {
        let args = SimArgs {
            num_cells: 10,
            num_regions: 4,
            ..Default::default()
        };
        let a = simulate(&args)?;
        let b = simulate(&args)?;
        assert_eq!(a.data.met(), b.data.met());
        assert_eq!(a.labels, b.labels);
        Ok(())
    }

    #[test]
    fn test_shared_regions_have_one_profile() -> anyhow::Result<()> {
        let sim = simulate(&SimArgs {
            num_cells: 8,
            num_regions: 10,
            num_clusters: 3,
            shared_region_prcg: 1.0,
            ..Default::default()
        })?;
        for w in sim.weights.iter() {
            assert_eq!(w.column(0), w.column(2));
        }
        Ok(())
    }

    #[test]
    fn test_invalid_arguments_are_rejected() {
        let bad = SimArgs {
            cpgs_per_region: (5, 2),
            ..Default::default()
        };
        assert!(simulate(&bad).is_err());
        let bad = SimArgs {
            region_coverage: 0.0,
            ..Default::default()
        };
        assert!(simulate(&bad).is_err());
    }
}
