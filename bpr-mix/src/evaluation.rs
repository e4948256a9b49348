use crate::imputation::ImputationEval;
use crate::variational::MixtureFit;
use log::info;
use serde::{Deserialize, Serialize};

/// Clustering quality against known labels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClusterEval {
    /// Adjusted Rand index
    pub ari: f64,
    /// Fraction of cells misassigned under the best cluster matching
    pub error: f64,
}

/// A fit with the evaluations appended to it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitReport {
    /// The fitted model
    pub fit: MixtureFit,
    /// Agreement with known labels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clustering: Option<ClusterEval>,
    /// Prediction of held-out CpG calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imputation: Option<ImputationEval>,
}

impl FitReport {
    /// Report without evaluations
    pub fn new(fit: MixtureFit) -> Self {
        Self {
            fit,
            clustering: None,
            imputation: None,
        }
    }

    /// Attach a clustering evaluation
    pub fn with_clustering(self, eval: ClusterEval) -> Self {
        Self {
            clustering: Some(eval),
            ..self
        }
    }

    /// Attach an imputation evaluation
    pub fn with_imputation(self, eval: ImputationEval) -> Self {
        Self {
            imputation: Some(eval),
            ..self
        }
    }
}

/// Dense contingency table of two labellings
fn contingency(labels_a: &[usize], labels_b: &[usize]) -> Vec<Vec<usize>> {
    let ka = labels_a.iter().max().map_or(0, |&x| x + 1);
    let kb = labels_b.iter().max().map_or(0, |&x| x + 1);
    let mut table = vec![vec![0usize; kb]; ka];
    for (&a, &b) in labels_a.iter().zip(labels_b.iter()) {
        table[a][b] += 1;
    }
    table
}

/// Adjusted Rand index between two labellings of the same items.
///
/// 1 iff the partitions agree up to relabelling; around 0 for independent
/// ones. Label values need not be contiguous.
pub fn adjusted_rand_index(labels_a: &[usize], labels_b: &[usize]) -> anyhow::Result<f64> {
    anyhow::ensure!(
        labels_a.len() == labels_b.len(),
        "label vectors differ in length: {} vs {}",
        labels_a.len(),
        labels_b.len()
    );
    let n = labels_a.len();
    if n < 2 {
        return Ok(1.0);
    }

    let table = contingency(labels_a, labels_b);
    let choose2 = |x: usize| -> f64 { (x * x.saturating_sub(1)) as f64 / 2.0 };

    let sum_nij_c2: f64 = table.iter().flatten().map(|&x| choose2(x)).sum();
    let sum_ni_c2: f64 = table.iter().map(|row| choose2(row.iter().sum())).sum();
    let kb = table.first().map_or(0, |row| row.len());
    let sum_nj_c2: f64 = (0..kb)
        .map(|j| choose2(table.iter().map(|row| row[j]).sum()))
        .sum();
    let n_c2 = choose2(n);

    let expected = sum_ni_c2 * sum_nj_c2 / n_c2;
    let max_index = (sum_ni_c2 + sum_nj_c2) / 2.0;

    if (max_index - expected).abs() < 1e-10 {
        return Ok(1.0);
    }

    Ok((sum_nij_c2 - expected) / (max_index - expected))
}

/// Minimum-cost assignment on a square cost matrix (Hungarian method with
/// potentials, `O(n^3)`). Returns the column assigned to every row.
pub fn hungarian(cost: &[Vec<f64>]) -> Vec<usize> {
    let n = cost.len();
    if n == 0 {
        return vec![];
    }

    // 1-based potentials; column 0 is a sentinel
    let mut u = vec![0.0; n + 1];
    let mut v = vec![0.0; n + 1];
    let mut row_of = vec![0usize; n + 1];
    let mut way = vec![0usize; n + 1];

    for i in 1..=n {
        row_of[0] = i;
        let mut j0 = 0;
        let mut minv = vec![f64::INFINITY; n + 1];
        let mut used = vec![false; n + 1];

        loop {
            used[j0] = true;
            let i0 = row_of[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0;
            for j in 1..=n {
                if used[j] {
                    continue;
                }
                let cur = cost[i0 - 1][j - 1] - u[i0] - v[j];
                if cur < minv[j] {
                    minv[j] = cur;
                    way[j] = j0;
                }
                if minv[j] < delta {
                    delta = minv[j];
                    j1 = j;
                }
            }
            for j in 0..=n {
                if used[j] {
                    u[row_of[j]] += delta;
                    v[j] -= delta;
                } else {
                    minv[j] -= delta;
                }
            }
            j0 = j1;
            if row_of[j0] == 0 {
                break;
            }
        }

        loop {
            let j1 = way[j0];
            row_of[j0] = row_of[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut assignment = vec![0usize; n];
    for j in 1..=n {
        if row_of[j] > 0 {
            assignment[row_of[j] - 1] = j - 1;
        }
    }
    assignment
}

/// Fraction of items whose predicted cluster disagrees with the true one
/// under the optimal one-to-one matching of cluster labels
pub fn assignment_error(predicted: &[usize], truth: &[usize]) -> anyhow::Result<f64> {
    anyhow::ensure!(
        predicted.len() == truth.len(),
        "label vectors differ in length: {} vs {}",
        predicted.len(),
        truth.len()
    );
    let n = predicted.len();
    if n == 0 {
        return Ok(0.0);
    }

    let table = contingency(predicted, truth);
    let size = table.len().max(table.first().map_or(0, |row| row.len()));
    let count = |i: usize, j: usize| -> usize {
        table.get(i).and_then(|row| row.get(j)).copied().unwrap_or(0)
    };

    let cost: Vec<Vec<f64>> = (0..size)
        .map(|i| (0..size).map(|j| -(count(i, j) as f64)).collect())
        .collect();
    let matched: usize = hungarian(&cost)
        .into_iter()
        .enumerate()
        .map(|(i, j)| count(i, j))
        .sum();

    Ok(1.0 - matched as f64 / n as f64)
}

/// Compare the fit's hard assignments with known labels
pub fn evaluate_clustering(fit: &MixtureFit, truth: &[usize]) -> anyhow::Result<ClusterEval> {
    anyhow::ensure!(
        truth.len() == fit.num_cells(),
        "{} labels for {} cells",
        truth.len(),
        fit.num_cells()
    );
    let predicted = fit.hard_assignments();
    let ret = ClusterEval {
        ari: adjusted_rand_index(&predicted, truth)?,
        error: assignment_error(&predicted, truth)?,
    };
    info!("clustering: ARI {:.4}, error {:.4}", ret.ari, ret.error);
    Ok(ret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_ari_is_one_under_relabelling() -> anyhow::Result<()> {
        let a = [0, 0, 1, 1, 2, 2, 2];
        let b = [5, 5, 0, 0, 3, 3, 3];
        assert_abs_diff_eq!(adjusted_rand_index(&a, &b)?, 1.0);
        assert_abs_diff_eq!(adjusted_rand_index(&[0; 6], &[1; 6])?, 1.0);
        Ok(())
    }

    #[test]
    fn test_ari_decreases_with_disagreement() -> anyhow::Result<()> {
        let truth = [0, 0, 0, 0, 1, 1, 1, 1];
        let one_off = [0, 0, 0, 1, 1, 1, 1, 1];
        let two_off = [0, 0, 1, 1, 1, 1, 0, 0];
        let a1 = adjusted_rand_index(&truth, &one_off)?;
        let a2 = adjusted_rand_index(&truth, &two_off)?;
        assert!(a1 < 1.0);
        assert!(a2 < a1);
        assert!(adjusted_rand_index(&truth, &[0, 1]).is_err());
        Ok(())
    }

    #[test]
    fn test_hungarian_finds_optimum() {
        let cost = vec![
            vec![4.0, 1.0, 3.0],
            vec![2.0, 0.0, 5.0],
            vec![3.0, 2.0, 2.0],
        ];
        let assignment = hungarian(&cost);
        let total: f64 = assignment.iter().enumerate().map(|(i, &j)| cost[i][j]).sum();
        assert_abs_diff_eq!(total, 5.0);
        let mut cols = assignment.clone();
        cols.sort_unstable();
        assert_eq!(cols, vec![0, 1, 2]);
    }

    #[test]
    fn test_hungarian_matches_brute_force() {
        let cost = vec![
            vec![7.0, 3.0, 9.0, 1.0],
            vec![2.0, 8.0, 4.0, 6.0],
            vec![5.0, 5.0, 1.0, 8.0],
            vec![9.0, 2.0, 6.0, 3.0],
        ];
        let mut best = f64::INFINITY;
        for a in 0..4 {
            for b in 0..4 {
                for c in 0..4 {
                    for d in 0..4 {
                        let p = [a, b, c, d];
                        let mut seen = p.to_vec();
                        seen.sort_unstable();
                        seen.dedup();
                        if seen.len() == 4 {
                            best = best.min((0..4).map(|i| cost[i][p[i]]).sum());
                        }
                    }
                }
            }
        }
        let assignment = hungarian(&cost);
        let total: f64 = (0..4).map(|i| cost[i][assignment[i]]).sum();
        assert_abs_diff_eq!(total, best);
    }

    #[test]
    fn test_assignment_error() -> anyhow::Result<()> {
        let truth = [0, 0, 1, 1, 2, 2];
        assert_abs_diff_eq!(assignment_error(&[2, 2, 0, 0, 1, 1], &truth)?, 0.0);
        assert_abs_diff_eq!(assignment_error(&[2, 2, 0, 1, 1, 1], &truth)?, 1.0 / 6.0);
        // more predicted clusters than true ones
        assert_abs_diff_eq!(assignment_error(&[0, 0, 1, 1, 3, 4], &truth)?, 1.0 / 6.0);
        Ok(())
    }
}
