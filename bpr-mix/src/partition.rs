//! Split CpG calls into training and held-out sets.
//!
//! Partitioning works region by region within each cell; a cell is never
//! held out as a whole. Every cell draws from its own generator seeded by
//! `(seed, cell index)`, so the split does not depend on thread scheduling.

use crate::data::{CallTable, CpgCall, MethylData, RegionCalls};
use log::info;
use rand::rngs::SmallRng;
use rand::seq::{index, SliceRandom};
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Regions with fewer calls than this are never split
pub const MIN_CPGS_TO_SPLIT: usize = 2;

/// Fractions controlling the train/test split
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionArgs {
    /// Fraction of the kept regions used fully for training (no CpG held out)
    pub data_train_prcg: f64,
    /// Fraction of covered regions kept for training; the others are
    /// held out entirely
    pub region_train_prcg: f64,
    /// Fraction of CpGs kept for training within a split region
    pub cpg_train_prcg: f64,
    /// Random seed
    pub seed: u64,
}

impl Default for PartitionArgs {
    fn default() -> Self {
        Self {
            data_train_prcg: 0.5,
            region_train_prcg: 0.95,
            cpg_train_prcg: 0.5,
            seed: 42,
        }
    }
}

impl PartitionArgs {
    /// All fractions must lie in `[0, 1]`
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, value) in [
            ("data_train_prcg", self.data_train_prcg),
            ("region_train_prcg", self.region_train_prcg),
            ("cpg_train_prcg", self.cpg_train_prcg),
        ] {
            anyhow::ensure!(
                (0.0..=1.0).contains(&value),
                "{} must be in [0, 1], got {}",
                name,
                value
            );
        }
        Ok(())
    }
}

/// Split one region's calls; returns `(train, test)` in positional order
fn split_region(
    calls: &[CpgCall],
    cpg_train_prcg: f64,
    rng: &mut SmallRng,
) -> (RegionCalls, RegionCalls) {
    let n = calls.len();
    if n < MIN_CPGS_TO_SPLIT {
        return (calls.to_vec(), vec![]);
    }

    let mut n_train = (cpg_train_prcg * n as f64).round() as usize;
    if cpg_train_prcg > 0.0 {
        n_train = n_train.max(1);
    }
    let n_train = n_train.min(n);

    let mut is_train = vec![false; n];
    for i in index::sample(rng, n, n_train) {
        is_train[i] = true;
    }

    let mut train = Vec::with_capacity(n_train);
    let mut test = Vec::with_capacity(n - n_train);
    for (c, &t) in calls.iter().zip(is_train.iter()) {
        if t {
            train.push(*c);
        } else {
            test.push(*c);
        }
    }
    (train, test)
}

fn partition_cell(
    cell: &[RegionCalls],
    args: &PartitionArgs,
    rng: &mut SmallRng,
) -> (Vec<RegionCalls>, Vec<RegionCalls>) {
    let num_regions = cell.len();
    let mut train = vec![vec![]; num_regions];
    let mut test = vec![vec![]; num_regions];

    let mut covered: Vec<usize> = (0..num_regions).filter(|&m| !cell[m].is_empty()).collect();
    covered.shuffle(rng);

    let mut n_keep = (args.region_train_prcg * covered.len() as f64).round() as usize;
    if args.region_train_prcg > 0.0 && !covered.is_empty() {
        n_keep = n_keep.max(1);
    }
    let (kept, held_out) = covered.split_at(n_keep.min(covered.len()));

    let n_full = (args.data_train_prcg * kept.len() as f64).floor() as usize;
    let (full, split) = kept.split_at(n_full.min(kept.len()));

    for &m in full {
        train[m] = cell[m].clone();
    }

    let mut split = split.to_vec();
    split.sort_unstable();
    for m in split {
        let (tr, te) = split_region(&cell[m], args.cpg_train_prcg, rng);
        train[m] = tr;
        test[m] = te;
    }

    for &m in held_out {
        test[m] = cell[m].clone();
    }

    (train, test)
}

impl MethylData {
    /// Derive a partitioned data set: training calls replace `met`,
    /// held-out calls go to the `test` slot.
    ///
    /// Per cell, `round(region_train_prcg * C)` of the `C` covered regions
    /// are kept (at least one unless the fraction is zero) and the rest held
    /// out entirely. Of the kept regions `floor(data_train_prcg * kept)` are
    /// used fully; in the others `round(cpg_train_prcg * n)` CpGs are sampled
    /// for training. Regions with fewer than [`MIN_CPGS_TO_SPLIT`] calls are
    /// never split.
    pub fn partition(&self, args: &PartitionArgs) -> anyhow::Result<MethylData> {
        args.validate()?;

        let (train, test): (CallTable, CallTable) = self
            .met()
            .par_iter()
            .enumerate()
            .map(|(n, cell)| {
                let mut rng = SmallRng::seed_from_u64(args.seed.wrapping_add(n as u64));
                partition_cell(cell, args, &mut rng)
            })
            .unzip();

        let ret = self.clone().into_partitioned(train, test);

        info!(
            "Partitioned {} calls: {} train, {} test",
            self.num_calls(),
            ret.num_calls(),
            ret.num_test_calls()
        );

        Ok(ret)
    }
}
