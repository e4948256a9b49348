mod common;
mod run_evaluate;
mod run_fit;
mod run_partition;
mod run_simulate;

use crate::common::*;
use run_evaluate::*;
use run_fit::*;
use run_partition::*;
use run_simulate::*;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "LUPIN",
    long_about = "Clustering and imputation of single-cell DNA methylation.\n\
		  Cells are a mixture of subpopulations, each with a smooth\n\
		  methylation profile per region (basis function regression\n\
		  with a logistic link), fitted by variational Bayes.\n\
		  Input: tab-separated `cell region pos met` long tables\n\
		  (plain or gzipped), `pos` relative to the region in [-1, 1].",
    term_width = 80
)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,

    #[arg(
        long,
        short,
        global = true,
        help = "Verbosity",
        long_help = "Enable verbose output.\n\
		     Prints progress of every step (sets RUST_LOG=info)."
    )]
    verbose: bool,

    #[arg(
        long,
        global = true,
        help = "Number of threads",
        long_help = "Size of the thread pool for parallel restarts and updates.\n\
		     Defaults to the number of logical CPUs."
    )]
    threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Simulate cells from known subpopulations",
        long_about = "Draw region-wise methylation profiles for every cluster,\n\
		      assign cells to balanced clusters and sample CpG calls.\n\
		      Writes `OUT.met.tsv.gz` and `OUT.labels.tsv.gz`."
    )]
    Simulate(SimulateArgs),

    #[command(
        about = "Split calls into training and held-out sets",
        long_about = "Hold out whole regions and a fraction of CpGs within\n\
		      regions of every cell for imputation benchmarks.\n\
		      Writes `OUT.train.tsv.gz` and `OUT.test.tsv.gz`."
    )]
    Partition(PartitionCmdArgs),

    #[command(
        about = "Fit the mixture model",
        long_about = "Cluster cells and estimate cluster profiles by\n\
		      variational Bayes with several restarts.\n\
		      Writes `OUT.fit.json.gz`, `OUT.responsibilities.tsv.gz`,\n\
		      `OUT.mixing.tsv` and `OUT.report.json`."
    )]
    Fit(FitArgs),

    #[command(
        about = "Evaluate a saved fit",
        long_about = "Score a saved fit against known labels (ARI, error)\n\
		      and/or held-out calls (AUC, F-measure)."
    )]
    Evaluate(EvaluateArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let threads = cli.threads.unwrap_or_else(num_cpus::get).max(1);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()?;
    info!("using {} threads", threads);

    match &cli.commands {
        Commands::Simulate(args) => {
            run_simulate(args)?;
        }
        Commands::Partition(args) => {
            run_partition(args)?;
        }
        Commands::Fit(args) => {
            run_fit(args)?;
        }
        Commands::Evaluate(args) => {
            run_evaluate(args)?;
        }
    }

    Ok(())
}
