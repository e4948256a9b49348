use crate::data::MethylData;
use crate::variational::MixtureFit;
use log::info;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Default probability threshold of the F-measure
pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// Prediction quality on held-out CpG calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImputationEval {
    /// Area under the ROC curve
    pub auc: f64,
    /// F-measure at `threshold`
    pub f_measure: f64,
    /// Probability at or above which a call is predicted methylated
    pub threshold: f64,
    /// ROC curve as `(false positive rate, true positive rate)`
    pub roc: Vec<(f64, f64)>,
    /// Precision-recall curve as `(recall, precision)`
    pub pr: Vec<(f64, f64)>,
    /// Number of held-out calls
    pub num_sites: usize,
}

/// Predicted methylation probability of every held-out call, paired with
/// the observed call.
///
/// A cell's calls are predicted from the profile of its most probable
/// cluster.
pub fn impute_test_sites(fit: &MixtureFit, data: &MethylData) -> anyhow::Result<Vec<(f64, bool)>> {
    let test = data
        .test()
        .ok_or_else(|| anyhow::anyhow!("no held-out calls to impute"))?;
    anyhow::ensure!(
        data.num_cells() == fit.num_cells() && data.num_regions() == fit.num_regions(),
        "data has {} cells x {} regions, the fit {} x {}",
        data.num_cells(),
        data.num_regions(),
        fit.num_cells(),
        fit.num_regions()
    );

    let clusters = fit.hard_assignments();
    let sites: Vec<Vec<(f64, bool)>> = test
        .par_iter()
        .zip(clusters.par_iter())
        .map(|(cell, &k)| {
            cell.iter()
                .enumerate()
                .flat_map(|(m, calls)| calls.iter().map(move |c| (fit.predict(m, k, c.pos), c.met)))
                .collect()
        })
        .collect();

    Ok(sites.into_iter().flatten().collect())
}

fn class_counts(scores: &[(f64, bool)]) -> anyhow::Result<(usize, usize)> {
    let pos = scores.iter().filter(|(_, y)| *y).count();
    let neg = scores.len() - pos;
    anyhow::ensure!(
        pos > 0 && neg > 0,
        "held-out calls contain a single class ({} methylated, {} unmethylated)",
        pos,
        neg
    );
    Ok((pos, neg))
}

/// Scores sorted from the highest, cut into groups of equal score; returns
/// the cumulative `(tp, fp)` after every group
fn cumulative_counts(scores: &[(f64, bool)]) -> Vec<(usize, usize)> {
    let mut sorted = scores.to_vec();
    sorted.sort_by(|a, b| b.0.total_cmp(&a.0));

    let mut ret = Vec::new();
    let (mut tp, mut fp) = (0, 0);
    let mut i = 0;
    while i < sorted.len() {
        let s = sorted[i].0;
        while i < sorted.len() && sorted[i].0 == s {
            if sorted[i].1 {
                tp += 1;
            } else {
                fp += 1;
            }
            i += 1;
        }
        ret.push((tp, fp));
    }
    ret
}

/// ROC curve from `(0, 0)` to `(1, 1)`; tied scores form a single step
pub fn roc_curve(scores: &[(f64, bool)]) -> anyhow::Result<Vec<(f64, f64)>> {
    let (pos, neg) = class_counts(scores)?;
    let mut ret = vec![(0.0, 0.0)];
    ret.extend(
        cumulative_counts(scores)
            .into_iter()
            .map(|(tp, fp)| (fp as f64 / neg as f64, tp as f64 / pos as f64)),
    );
    Ok(ret)
}

/// Precision-recall curve starting at `(0, 1)`
pub fn pr_curve(scores: &[(f64, bool)]) -> anyhow::Result<Vec<(f64, f64)>> {
    let (pos, _) = class_counts(scores)?;
    let mut ret = vec![(0.0, 1.0)];
    ret.extend(
        cumulative_counts(scores)
            .into_iter()
            .map(|(tp, fp)| (tp as f64 / pos as f64, tp as f64 / (tp + fp) as f64)),
    );
    Ok(ret)
}

/// Trapezoidal area under a curve of `(x, y)` points sorted by `x`
pub fn auc(curve: &[(f64, f64)]) -> f64 {
    curve
        .windows(2)
        .map(|w| (w[1].0 - w[0].0) * (w[1].1 + w[0].1) / 2.0)
        .sum()
}

/// Harmonic mean of precision and recall, predicting methylated when the
/// probability is at least `threshold`
pub fn f_measure(scores: &[(f64, bool)], threshold: f64) -> f64 {
    let (mut tp, mut fp, mut fn_) = (0usize, 0usize, 0usize);
    for &(p, y) in scores {
        match (p >= threshold, y) {
            (true, true) => tp += 1,
            (true, false) => fp += 1,
            (false, true) => fn_ += 1,
            (false, false) => {}
        }
    }
    if tp == 0 {
        return 0.0;
    }
    let precision = tp as f64 / (tp + fp) as f64;
    let recall = tp as f64 / (tp + fn_) as f64;
    2.0 * precision * recall / (precision + recall)
}

/// Impute the held-out calls of `data` and score the predictions
pub fn evaluate_imputation(fit: &MixtureFit, data: &MethylData) -> anyhow::Result<ImputationEval> {
    let scores = impute_test_sites(fit, data)?;
    let roc = roc_curve(&scores)?;
    let pr = pr_curve(&scores)?;
    let ret = ImputationEval {
        auc: auc(&roc),
        f_measure: f_measure(&scores, DEFAULT_THRESHOLD),
        threshold: DEFAULT_THRESHOLD,
        roc,
        pr,
        num_sites: scores.len(),
    };
    info!(
        "imputation of {} calls: AUC {:.4}, F-measure {:.4}",
        ret.num_sites, ret.auc, ret.f_measure
    );
    Ok(ret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn toy_scores() -> Vec<(f64, bool)> {
        vec![
            (0.9, true),
            (0.8, true),
            (0.7, false),
            (0.6, true),
            (0.55, false),
            (0.4, true),
            (0.3, false),
            (0.1, false),
        ]
    }

    #[test]
    fn test_perfect_and_inverted_ranking() -> anyhow::Result<()> {
        let perfect = vec![(0.9, true), (0.8, true), (0.2, false), (0.1, false)];
        assert_abs_diff_eq!(auc(&roc_curve(&perfect)?), 1.0);
        let inverted: Vec<(f64, bool)> = perfect.iter().map(|&(p, y)| (1.0 - p, y)).collect();
        assert_abs_diff_eq!(auc(&roc_curve(&inverted)?), 0.0);
        Ok(())
    }

    #[test]
    fn test_auc_counts_ordered_pairs() -> anyhow::Result<()> {
        // 13 of the 16 positive-negative pairs are ranked correctly
        let roc = roc_curve(&toy_scores())?;
        assert_abs_diff_eq!(auc(&roc), 13.0 / 16.0, epsilon = 1e-12);
        assert_eq!(roc.first(), Some(&(0.0, 0.0)));
        assert_eq!(roc.last(), Some(&(1.0, 1.0)));
        Ok(())
    }

    #[test]
    fn test_auc_is_invariant_to_monotone_rescaling() -> anyhow::Result<()> {
        let scores = toy_scores();
        let rescaled: Vec<(f64, bool)> = scores
            .iter()
            .map(|&(p, y)| ((p / (1.0 - p)).ln() * 3.0 + 7.0, y))
            .collect();
        assert_abs_diff_eq!(
            auc(&roc_curve(&scores)?),
            auc(&roc_curve(&rescaled)?),
            epsilon = 1e-12
        );
        Ok(())
    }

    #[test]
    fn test_ties_form_one_step() -> anyhow::Result<()> {
        let scores = vec![(0.5, true), (0.5, false), (0.5, true), (0.5, false)];
        let roc = roc_curve(&scores)?;
        assert_eq!(roc, vec![(0.0, 0.0), (1.0, 1.0)]);
        assert_abs_diff_eq!(auc(&roc), 0.5);
        Ok(())
    }

    #[test]
    fn test_f_measure_threshold_is_inclusive() {
        let scores = vec![(0.5, true), (0.49, true), (0.7, false), (0.2, false)];
        // tp = 1, fp = 1, fn = 1
        assert_abs_diff_eq!(f_measure(&scores, 0.5), 0.5);
        assert_abs_diff_eq!(f_measure(&scores, 0.95), 0.0);
    }

    #[test]
    fn test_pr_curve_ends_at_full_recall() -> anyhow::Result<()> {
        let pr = pr_curve(&toy_scores())?;
        assert_eq!(pr[0], (0.0, 1.0));
        let (recall, precision) = pr[pr.len() - 1];
        assert_abs_diff_eq!(recall, 1.0);
        assert_abs_diff_eq!(precision, 0.5);
        Ok(())
    }

    #[test]
    fn test_single_class_is_an_error() {
        let scores = vec![(0.9, true), (0.3, true)];
        assert!(roc_curve(&scores).is_err());
        assert!(pr_curve(&scores).is_err());
    }
}
