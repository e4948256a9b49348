//! K-means clustering traits for matrices
//!
//! k-means++ seeding followed by Lloyd iterations. The random generator is
//! seeded from the arguments so the same input always gives the same
//! membership.

use log::warn;
use nalgebra::DMatrix;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Arguments for k-means clustering
#[derive(Debug, Clone)]
pub struct KmeansArgs {
    /// Number of clusters
    pub num_clusters: usize,
    /// Maximum number of iterations
    pub max_iter: usize,
    /// Seed of the k-means++ initialisation
    pub seed: u64,
}

impl Default for KmeansArgs {
    fn default() -> Self {
        Self {
            num_clusters: 1,
            max_iter: 100,
            seed: 42,
        }
    }
}

impl KmeansArgs {
    /// Create args with specified number of clusters
    pub fn with_clusters(num_clusters: usize) -> Self {
        Self {
            num_clusters,
            ..Default::default()
        }
    }

    /// Same arguments with a different seed
    pub fn with_seed(self, seed: u64) -> Self {
        Self { seed, ..self }
    }
}

/// Trait for k-means clustering on matrices
pub trait Kmeans {
    /// Cluster columns and return membership vector
    ///
    /// # Arguments
    /// * `args` - Clustering parameters
    ///
    /// # Returns
    /// Vector of cluster assignments, one per column
    fn kmeans_columns(&self, args: KmeansArgs) -> Vec<usize>;

    /// Cluster rows and return membership vector
    ///
    /// # Arguments
    /// * `args` - Clustering parameters
    ///
    /// # Returns
    /// Vector of cluster assignments, one per row
    fn kmeans_rows(&self, args: KmeansArgs) -> Vec<usize>;
}

impl<T> Kmeans for DMatrix<T>
where
    T: nalgebra::Scalar + Copy + Into<f64>,
{
    fn kmeans_columns(&self, args: KmeansArgs) -> Vec<usize> {
        let data: Vec<Vec<f64>> = self
            .column_iter()
            .map(|x| x.iter().map(|&v| v.into()).collect())
            .collect();
        kmeans_points(&data, &args)
    }

    fn kmeans_rows(&self, args: KmeansArgs) -> Vec<usize> {
        let data: Vec<Vec<f64>> = self
            .row_iter()
            .map(|x| x.iter().map(|&v| v.into()).collect())
            .collect();
        kmeans_points(&data, &args)
    }
}

fn sq_dist(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn nearest(point: &[f64], centers: &[Vec<f64>]) -> (usize, f64) {
    centers
        .iter()
        .enumerate()
        .map(|(k, c)| (k, sq_dist(point, c)))
        .fold((0, f64::INFINITY), |best, cur| if cur.1 < best.1 { cur } else { best })
}

/// k-means++ seeding: the first centre uniformly, the others with
/// probability proportional to the squared distance to the closest centre
fn kmeans_pp_centers(points: &[Vec<f64>], k: usize, rng: &mut SmallRng) -> Vec<Vec<f64>> {
    let n = points.len();
    let mut centers = vec![points[rng.random_range(0..n)].clone()];
    let mut dist: Vec<f64> = points.iter().map(|p| sq_dist(p, &centers[0])).collect();

    while centers.len() < k {
        let total: f64 = dist.iter().sum();
        let next = if total <= 0.0 {
            // every point sits on an existing centre
            rng.random_range(0..n)
        } else {
            let mut u = rng.random::<f64>() * total;
            let mut chosen = n - 1;
            for (i, &d) in dist.iter().enumerate() {
                if u < d {
                    chosen = i;
                    break;
                }
                u -= d;
            }
            chosen
        };
        centers.push(points[next].clone());
        for (d, p) in dist.iter_mut().zip(points) {
            *d = d.min(sq_dist(p, &centers[centers.len() - 1]));
        }
    }
    centers
}

fn kmeans_points(points: &[Vec<f64>], args: &KmeansArgs) -> Vec<usize> {
    let n = points.len();
    if args.num_clusters <= 1 || n == 0 {
        return vec![0; n];
    }

    let k = args.num_clusters.min(n);
    if k < args.num_clusters {
        warn!(
            "k-means: {} clusters requested for {} points",
            args.num_clusters, n
        );
    }

    let dim = points[0].len();
    let mut rng = SmallRng::seed_from_u64(args.seed);
    let mut centers = kmeans_pp_centers(points, k, &mut rng);
    let mut membership: Vec<usize> = points.iter().map(|p| nearest(p, &centers).0).collect();

    for _iter in 0..args.max_iter {
        let mut sums = vec![vec![0.0; dim]; k];
        let mut counts = vec![0usize; k];
        for (p, &c) in points.iter().zip(membership.iter()) {
            counts[c] += 1;
            for (s, &x) in sums[c].iter_mut().zip(p) {
                *s += x;
            }
        }

        for c in 0..k {
            if counts[c] > 0 {
                centers[c] = sums[c].iter().map(|s| s / counts[c] as f64).collect();
            } else {
                // re-seed an empty cluster at the point farthest from its centre
                let far = points
                    .iter()
                    .enumerate()
                    .map(|(i, p)| (i, sq_dist(p, &centers[membership[i]])))
                    .fold((0, f64::NEG_INFINITY), |b, x| if x.1 > b.1 { x } else { b })
                    .0;
                centers[c] = points[far].clone();
            }
        }

        let updated: Vec<usize> = points.iter().map(|p| nearest(p, &centers).0).collect();
        if updated == membership {
            break;
        }
        membership = updated;
    }

    membership
}
