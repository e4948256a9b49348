use crate::common::*;
use bpr_mix::io::{write_labels, write_long_table};
use bpr_mix::simulate::{simulate, SimArgs};

#[derive(Args, Debug)]
pub struct SimulateArgs {
    #[arg(
        short,
        long,
        required = true,
        help = "Output header",
        long_help = "Output file header; writes `{out}.met.tsv.gz` and\n\
		     `{out}.labels.tsv.gz`."
    )]
    out: Box<str>,

    #[arg(long, default_value_t = 200, help = "Number of cells")]
    cells: usize,

    #[arg(long, default_value_t = 100, help = "Number of regions")]
    regions: usize,

    #[arg(short = 'k', long, default_value_t = 4, help = "Number of clusters")]
    clusters: usize,

    #[arg(long, default_value_t = 10, help = "Minimum CpGs per covered region")]
    min_cpgs: usize,

    #[arg(long, default_value_t = 30, help = "Maximum CpGs per covered region")]
    max_cpgs: usize,

    #[arg(
        long,
        default_value_t = 0.8,
        help = "Region coverage",
        long_help = "Probability that a cell has any calls in a region."
    )]
    coverage: f64,

    #[arg(
        long,
        default_value_t = 2.0,
        help = "Weight scale",
        long_help = "Standard deviation of the true basis weights.\n\
		     Larger values give sharper, more distinct profiles."
    )]
    weight_scale: f64,

    #[arg(
        long,
        default_value_t = 0.0,
        help = "Fraction of shared regions",
        long_help = "Fraction of regions whose profile is identical\n\
		     across clusters (uninformative for clustering)."
    )]
    shared_prcg: f64,

    #[arg(long, value_enum, default_value = "radial", help = "Basis family")]
    basis: BasisFamily,

    #[arg(long, default_value_t = 3, help = "Number of basis functions")]
    basis_order: usize,

    #[arg(long, default_value_t = 42, help = "Random seed")]
    seed: u64,
}

pub fn run_simulate(args: &SimulateArgs) -> anyhow::Result<()> {
    let sim_args = SimArgs {
        num_cells: args.cells,
        num_regions: args.regions,
        num_clusters: args.clusters,
        cpgs_per_region: (args.min_cpgs, args.max_cpgs),
        region_coverage: args.coverage,
        weight_scale: args.weight_scale,
        shared_region_prcg: args.shared_prcg,
        basis: args.basis.build(args.basis_order, None)?,
        seed: args.seed,
    };

    let sim = simulate(&sim_args)?;

    let met_file = output_file(&args.out, "met.tsv.gz")?;
    write_long_table(&sim.data, &met_file)?;

    let labels_file = output_file(&args.out, "labels.tsv.gz")?;
    write_labels(sim.data.cells(), &sim.labels, &labels_file)?;

    info!("wrote {} and {}", met_file, labels_file);
    Ok(())
}
