pub use bpr_mix::Basis;
pub use clap::{Args, Parser, Subcommand, ValueEnum};
pub use log::info;
pub use matrix_util::common_io::mkdir;

/// Basis function family
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum BasisFamily {
    Radial,
    Polynomial,
    Fourier,
}

impl BasisFamily {
    /// `order` functions of this family (plus the bias)
    pub fn build(&self, order: usize, gamma: Option<f64>) -> anyhow::Result<Basis> {
        match self {
            BasisFamily::Radial => Basis::radial(order, gamma),
            BasisFamily::Polynomial => Basis::polynomial(order),
            BasisFamily::Fourier => Basis::fourier(order, None),
        }
    }
}

/// `{out}.{suffix}`, creating the parent directory if needed
pub fn output_file(out: &str, suffix: &str) -> anyhow::Result<String> {
    let file = format!("{}.{}", out, suffix);
    mkdir(&file)?;
    Ok(file)
}
