//! End-to-end tests for the bpr-mix crate.

use crate::basis::Basis;
use crate::evaluation::{evaluate_clustering, FitReport};
use crate::imputation::evaluate_imputation;
use crate::io::*;
use crate::partition::PartitionArgs;
use crate::simulate::{simulate, SimArgs, Simulated};
use crate::variational::{fit_mixture, VbOptions};
use approx::assert_abs_diff_eq;
use matrix_util::common_io::create_temp_dir_file;
use matrix_util::traits::IoOps;

/// Well separated subpopulations: every cluster has its own profile in
/// every region
fn separable_data(
    num_cells: usize,
    num_regions: usize,
    num_clusters: usize,
    seed: u64,
) -> anyhow::Result<Simulated> {
    simulate(&SimArgs {
        num_cells,
        num_regions,
        num_clusters,
        cpgs_per_region: (5, 10),
        region_coverage: 0.5,
        weight_scale: 2.0,
        shared_region_prcg: 0.0,
        basis: Basis::radial(3, None)?,
        seed,
    })
}

fn short_run(k: usize) -> VbOptions {
    VbOptions {
        num_clusters: k,
        max_iter: 30,
        init_nstart: 3,
        init_max_iter: 5,
        ..Default::default()
    }
}

fn temp_file(suffix: &str) -> anyhow::Result<String> {
    let file = create_temp_dir_file(suffix)?;
    file.to_str()
        .map(|x| x.to_string())
        .ok_or_else(|| anyhow::anyhow!("non-UTF8 temp path"))
}

// ─── Tests ───

#[test]
fn test_separable_four_clusters_are_recovered() -> anyhow::Result<()> {
    let sim = separable_data(200, 100, 4, 42)?;
    let basis = Basis::radial(3, None)?;
    let opts = VbOptions {
        init_nstart: 5,
        max_iter: 50,
        ..short_run(4)
    };
    let fit = fit_mixture(&sim.data, &basis, &opts)?;

    let eval = evaluate_clustering(&fit, &sim.labels)?;
    println!("ARI = {:.4}, error = {:.4}", eval.ari, eval.error);

    assert_abs_diff_eq!(eval.ari, 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(eval.error, 0.0, epsilon = 1e-12);
    assert_eq!(fit.cluster_sizes(), vec![50; 4]);
    Ok(())
}

#[test]
fn test_held_out_calls_are_imputed() -> anyhow::Result<()> {
    let sim = separable_data(60, 30, 2, 7)?;
    let part = sim.data.partition(&PartitionArgs::default())?;
    assert!(part.num_test_calls() > 0);

    let basis = Basis::radial(3, None)?;
    let fit = fit_mixture(&part, &basis, &short_run(2))?;
    let eval = evaluate_imputation(&fit, &part)?;
    println!("AUC = {:.4}, F = {:.4}", eval.auc, eval.f_measure);

    assert_eq!(eval.num_sites, part.num_test_calls());
    assert!(eval.auc > 0.7, "AUC ({:.4}) should be well above 0.5", eval.auc);
    assert!(eval.f_measure > 0.0);
    Ok(())
}

#[test]
fn test_long_table_round_trip() -> anyhow::Result<()> {
    let sim = simulate(&SimArgs {
        num_cells: 12,
        num_regions: 5,
        num_clusters: 2,
        cpgs_per_region: (1, 6),
        region_coverage: 1.0,
        ..Default::default()
    })?;
    // every region keeps training calls, so names appear in the same order
    let part = sim.data.partition(&PartitionArgs {
        region_train_prcg: 1.0,
        ..Default::default()
    })?;
    assert!(part.num_test_calls() > 0);

    let train_file = temp_file("train.tsv.gz")?;
    let test_file = temp_file("test.tsv.gz")?;
    write_long_table(&part, &train_file)?;
    write_test_table(&part, &test_file)?;

    let train = read_long_table(&train_file)?;
    assert_eq!(train.cells(), part.cells());
    assert_eq!(train.regions(), part.regions());
    assert_eq!(train.met(), part.met());

    let both = read_test_table(&test_file, train)?;
    assert_eq!(both.test(), part.test());
    Ok(())
}

#[test]
fn test_fit_and_report_round_trip() -> anyhow::Result<()> {
    let sim = separable_data(30, 10, 2, 3)?;
    let basis = Basis::polynomial(2)?;
    let fit = fit_mixture(&sim.data, &basis, &short_run(2))?;

    let fit_file = temp_file("fit.json.gz")?;
    save_fit(&fit, &fit_file)?;
    let loaded = load_fit(&fit_file)?;
    assert_eq!(loaded.basis, fit.basis);
    assert_eq!(loaded.cells, fit.cells);
    assert_eq!(loaded.hard_assignments(), fit.hard_assignments());
    assert_abs_diff_eq!(loaded.responsibilities, fit.responsibilities, epsilon = 1e-12);
    assert_abs_diff_eq!(loaded.elbo(), fit.elbo(), epsilon = 1e-9 * fit.elbo().abs());

    let labels_file = temp_file("labels.tsv")?;
    write_labels(sim.data.cells(), &sim.labels, &labels_file)?;
    let labels = read_labels(&labels_file, sim.data.cells())?;
    // label strings are renumbered by first appearance
    assert_abs_diff_eq!(
        crate::evaluation::adjusted_rand_index(&labels, &sim.labels)?,
        1.0
    );

    let report = FitReport::new(loaded).with_clustering(evaluate_clustering(&fit, &labels)?);
    let report_file = temp_file("report.json")?;
    write_json(&report, &report_file)?;
    let back: FitReport = read_json(&report_file)?;
    assert!(back.clustering.is_some());
    assert!(back.imputation.is_none());

    let resp_file = temp_file("resp.tsv.gz")?;
    write_responsibilities(&fit, &resp_file)?;
    let mixing_file = temp_file("mixing.tsv")?;
    write_mixing(&fit, &mixing_file)?;
    let mixing = crate::Mat::from_tsv(&mixing_file, Some(0))?;
    assert_abs_diff_eq!(mixing.sum(), 1.0, epsilon = 1e-9);
    Ok(())
}

#[test]
fn test_single_class_held_out_is_an_error() -> anyhow::Result<()> {
    let sim = separable_data(10, 4, 2, 5)?;
    let fit = fit_mixture(&sim.data, &Basis::polynomial(1)?, &short_run(2))?;

    // every held-out call methylated
    let test = sim
        .data
        .met()
        .iter()
        .map(|cell| {
            cell.iter()
                .map(|calls| calls.iter().map(|c| crate::CpgCall::new(c.pos, true)).collect())
                .collect()
        })
        .collect();
    let data = sim.data.clone().with_test(test)?;
    assert!(evaluate_imputation(&fit, &data).is_err());
    Ok(())
}

#[test]
fn test_region_held_out_everywhere_survives_round_trip() -> anyhow::Result<()> {
    use crate::imputation::impute_test_sites;
    use crate::{CpgCall, MethylData};

    let calls = |n: usize| -> Vec<CpgCall> {
        (0..n)
            .map(|i| CpgCall::new(-0.9 + 0.3 * i as f64, i % 2 == 0))
            .collect()
    };
    let cells: Vec<Box<str>> = vec!["a".into(), "b".into(), "c".into()];
    let regions: Vec<Box<str>> = vec!["r0".into(), "r1".into()];
    // r1 is covered by cell `a` only
    let met = vec![
        vec![calls(4), calls(4)],
        vec![calls(4), vec![]],
        vec![calls(4), vec![]],
    ];
    let data = MethylData::new(cells, regions, met)?;

    let args = PartitionArgs {
        data_train_prcg: 1.0,
        region_train_prcg: 0.5,
        ..Default::default()
    };
    let part = (0..64)
        .map(|seed| data.partition(&PartitionArgs { seed, ..args.clone() }))
        .collect::<anyhow::Result<Vec<_>>>()?
        .into_iter()
        .find(|p| p.calls(0, 1).is_empty())
        .ok_or_else(|| anyhow::anyhow!("r1 never held out"))?;

    let train_file = temp_file("train.tsv.gz")?;
    let test_file = temp_file("test.tsv.gz")?;
    write_long_table(&part, &train_file)?;
    write_test_table(&part, &test_file)?;

    let train = read_long_table(&train_file)?;
    assert_eq!(train.num_regions(), 1);

    let both = read_test_table(&test_file, train)?;
    assert_eq!(both.cells(), part.cells());
    assert_eq!(both.regions(), part.regions());
    assert_eq!(both.met(), part.met());
    assert_eq!(both.test(), part.test());

    let fit = fit_mixture(&both, &Basis::polynomial(1)?, &short_run(1))?;
    let sites = impute_test_sites(&fit, &both)?;
    assert_eq!(sites.len(), both.num_test_calls());
    assert!(sites.iter().all(|&(p, _)| (0.0..=1.0).contains(&p)));
    Ok(())
}
