use crate::common::*;
use bpr_mix::data::MethylData;
use bpr_mix::evaluation::evaluate_clustering;
use bpr_mix::imputation::evaluate_imputation;
use bpr_mix::io::*;
use bpr_mix::FitReport;

const FIT_SUFFIX: &str = ".fit.json.gz";

#[derive(Args, Debug)]
pub struct EvaluateArgs {
    #[arg(
        long = "fit",
        required = true,
        help = "Saved fit",
        long_help = "`{out}.fit.json.gz` written by `lupin fit`."
    )]
    fit_file: Box<str>,

    #[arg(
        long = "data",
        help = "Training calls",
        long_help = "Training calls the fit was made on. Only used to check\n\
		     that cells and regions match the fit."
    )]
    data_file: Option<Box<str>>,

    #[arg(long = "test", help = "Held-out calls")]
    test_file: Option<Box<str>>,

    #[arg(long = "labels", help = "True cell labels (`cell<TAB>label`)")]
    labels_file: Option<Box<str>>,

    #[arg(
        short,
        long,
        help = "Output header",
        long_help = "Output file header; writes `{out}.report.json`.\n\
		     Defaults to the fit file without `.fit.json.gz`."
    )]
    out: Option<Box<str>>,
}

pub fn run_evaluate(args: &EvaluateArgs) -> anyhow::Result<()> {
    anyhow::ensure!(
        args.test_file.is_some() || args.labels_file.is_some(),
        "nothing to evaluate: give --test and/or --labels"
    );

    let fit = load_fit(&args.fit_file)?;

    let base = match args.data_file.as_deref() {
        Some(data_file) => {
            let data = read_long_table(data_file)?;
            anyhow::ensure!(
                data.cells() == fit.cells.as_slice() && data.regions() == fit.regions.as_slice(),
                "cells or regions of {} differ from the fit",
                data_file
            );
            data
        }
        None => {
            let empty = vec![vec![vec![]; fit.regions.len()]; fit.cells.len()];
            MethylData::new(fit.cells.clone(), fit.regions.clone(), empty)?
        }
    };

    let labels = args
        .labels_file
        .as_deref()
        .map(|f| read_labels(f, &fit.cells))
        .transpose()?;

    let clustering = labels
        .as_deref()
        .map(|l| evaluate_clustering(&fit, l))
        .transpose()?;

    let imputation = match args.test_file.as_deref() {
        Some(test_file) => {
            let data = read_test_table(test_file, base)?;
            Some(evaluate_imputation(&fit, &data)?)
        }
        None => None,
    };

    let out = match args.out.as_deref() {
        Some(out) => out.to_string(),
        None => args
            .fit_file
            .strip_suffix(FIT_SUFFIX)
            .unwrap_or(&args.fit_file)
            .to_string(),
    };

    let mut report = FitReport::new(fit);
    if let Some(eval) = clustering {
        println!("ARI\t{:.6}\nerror\t{:.6}", eval.ari, eval.error);
        report = report.with_clustering(eval);
    }
    if let Some(eval) = imputation {
        println!(
            "AUC\t{:.6}\nF-measure\t{:.6}\nsites\t{}",
            eval.auc, eval.f_measure, eval.num_sites
        );
        report = report.with_imputation(eval);
    }

    let report_file = output_file(&out, "report.json")?;
    write_json(&report, &report_file)?;
    info!("wrote {}", report_file);
    Ok(())
}
