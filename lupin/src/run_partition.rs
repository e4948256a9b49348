use crate::common::*;
use bpr_mix::io::{read_long_table, write_long_table, write_test_table};
use bpr_mix::PartitionArgs;

#[derive(Args, Debug)]
pub struct PartitionCmdArgs {
    #[arg(
        short = 'i',
        long = "input",
        required = true,
        help = "Long table of calls",
        long_help = "Tab-separated `cell region pos met` file (plain or gzipped)."
    )]
    data_file: Box<str>,

    #[arg(
        short,
        long,
        required = true,
        help = "Output header",
        long_help = "Output file header; writes `{out}.train.tsv.gz` and\n\
		     `{out}.test.tsv.gz`."
    )]
    out: Box<str>,

    #[arg(
        long,
        default_value_t = 0.5,
        help = "Fraction of kept regions used fully",
        long_help = "Among the regions kept for training, the fraction used\n\
		     with all CpGs. The others have their CpGs split."
    )]
    data_train_prcg: f64,

    #[arg(
        long,
        default_value_t = 0.95,
        help = "Fraction of covered regions kept",
        long_help = "Fraction of every cell's covered regions kept for training;\n\
		     the rest are held out with all their CpGs."
    )]
    region_train_prcg: f64,

    #[arg(
        long,
        default_value_t = 0.5,
        help = "Fraction of CpGs kept in split regions",
        long_help = "Within a split region, the fraction of CpGs kept for training.\n\
		     Regions with a single CpG are never split."
    )]
    cpg_train_prcg: f64,

    #[arg(long, default_value_t = 42, help = "Random seed")]
    seed: u64,
}

pub fn run_partition(args: &PartitionCmdArgs) -> anyhow::Result<()> {
    let part_args = PartitionArgs {
        data_train_prcg: args.data_train_prcg,
        region_train_prcg: args.region_train_prcg,
        cpg_train_prcg: args.cpg_train_prcg,
        seed: args.seed,
    };
    part_args.validate()?;

    let data = read_long_table(&args.data_file)?;
    let part = data.partition(&part_args)?;

    let train_file = output_file(&args.out, "train.tsv.gz")?;
    write_long_table(&part, &train_file)?;

    let test_file = output_file(&args.out, "test.tsv.gz")?;
    write_test_table(&part, &test_file)?;

    info!("wrote {} and {}", train_file, test_file);
    Ok(())
}
