use crate::common::*;
use bpr_mix::evaluation::evaluate_clustering;
use bpr_mix::imputation::evaluate_imputation;
use bpr_mix::io::*;
use bpr_mix::{fit_mixture, FitReport, InitMethod, VbOptions};

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitArg {
    Kmeans,
    Random,
}

impl From<InitArg> for InitMethod {
    fn from(x: InitArg) -> Self {
        match x {
            InitArg::Kmeans => InitMethod::Kmeans,
            InitArg::Random => InitMethod::Random,
        }
    }
}

#[derive(Args, Debug)]
pub struct FitArgs {
    #[arg(
        short = 'i',
        long = "input",
        required = true,
        help = "Training calls",
        long_help = "Tab-separated `cell region pos met` file (plain or gzipped)."
    )]
    data_file: Box<str>,

    #[arg(
        short = 'k',
        long = "clusters",
        required = true,
        help = "Number of clusters"
    )]
    num_clusters: usize,

    #[arg(
        short,
        long,
        required = true,
        help = "Output header",
        long_help = "Output file header; writes `{out}.fit.json.gz`,\n\
		     `{out}.responsibilities.tsv.gz`, `{out}.mixing.tsv`\n\
		     and `{out}.report.json`."
    )]
    out: Box<str>,

    #[arg(
        long = "test",
        help = "Held-out calls",
        long_help = "Held-out calls in the same format as the input;\n\
		     scored by AUC and F-measure after fitting."
    )]
    test_file: Option<Box<str>>,

    #[arg(
        long = "labels",
        help = "True cell labels",
        long_help = "`cell<TAB>label` file; the clustering is scored by the\n\
		     adjusted Rand index and the assignment error."
    )]
    labels_file: Option<Box<str>>,

    #[arg(long, value_enum, default_value = "radial", help = "Basis family")]
    basis: BasisFamily,

    #[arg(
        long,
        default_value_t = 4,
        help = "Number of basis functions",
        long_help = "Number of basis functions besides the bias term.\n\
		     Radial: centres; polynomial: degree; Fourier: harmonics."
    )]
    basis_order: usize,

    #[arg(
        long,
        help = "Radial basis scale",
        long_help = "Inverse squared width of the radial functions.\n\
		     Defaults to (order / 2)^2."
    )]
    gamma: Option<f64>,

    #[arg(long, default_value_t = 300, help = "Maximum iterations")]
    max_iter: usize,

    #[arg(long, default_value_t = 10, help = "Number of restarts")]
    init_nstart: usize,

    #[arg(long, default_value_t = 20, help = "Iterations of every restart")]
    init_max_iter: usize,

    #[arg(long, default_value_t = 1e-4, help = "Convergence tolerance on the ELBO")]
    epsilon: f64,

    #[arg(long, value_enum, default_value = "kmeans", help = "Initialisation")]
    init: InitArg,

    #[arg(long, default_value_t = 1.0, help = "Dirichlet concentration")]
    delta_0: f64,

    #[arg(long, default_value_t = 0.5, help = "Gamma shape of the weight precision")]
    alpha_0: f64,

    #[arg(
        long,
        help = "Gamma rate of the weight precision",
        long_help = "Gamma rate of the weight precision prior.\n\
		     Defaults to the square root of the basis dimension."
    )]
    beta_0: Option<f64>,

    #[arg(long, default_value_t = false, help = "Run restarts one by one")]
    no_parallel: bool,

    #[arg(long, default_value_t = 42, help = "Random seed")]
    seed: u64,
}

pub fn run_fit(args: &FitArgs) -> anyhow::Result<()> {
    let basis = args.basis.build(args.basis_order, args.gamma)?;
    let opts = VbOptions {
        num_clusters: args.num_clusters,
        max_iter: args.max_iter,
        init_nstart: args.init_nstart,
        init_max_iter: args.init_max_iter,
        epsilon_conv: args.epsilon,
        is_parallel: !args.no_parallel,
        init_method: args.init.into(),
        delta_0: args.delta_0,
        alpha_0: args.alpha_0,
        beta_0: args.beta_0,
        seed: args.seed,
    };
    opts.validate()?;

    let mut data = read_long_table(&args.data_file)?;
    if let Some(test_file) = args.test_file.as_deref() {
        data = read_test_table(test_file, data)?;
    }
    let labels = args
        .labels_file
        .as_deref()
        .map(|f| read_labels(f, data.cells()))
        .transpose()?;

    let fit = fit_mixture(&data, &basis, &opts)?;
    info!(
        "cluster sizes: {:?}, mixing: {:?}",
        fit.cluster_sizes(),
        fit.mixing
    );

    save_fit(&fit, &output_file(&args.out, "fit.json.gz")?)?;
    write_responsibilities(&fit, &output_file(&args.out, "responsibilities.tsv.gz")?)?;
    write_mixing(&fit, &output_file(&args.out, "mixing.tsv")?)?;

    let mut report = FitReport::new(fit);
    if let Some(labels) = labels.as_deref() {
        let clustering = evaluate_clustering(&report.fit, labels)?;
        report = report.with_clustering(clustering);
    }
    if data.test().is_some() {
        let imputation = evaluate_imputation(&report.fit, &data)?;
        report = report.with_imputation(imputation);
    }

    let report_file = output_file(&args.out, "report.json")?;
    write_json(&report, &report_file)?;
    info!("wrote {}", report_file);
    Ok(())
}
