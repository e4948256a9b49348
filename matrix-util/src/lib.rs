/// Reading and writing (gzipped) text files line by line
pub mod common_io;

/// Seeded k-means on matrix rows/columns
pub mod clustering;

/// `IoOps` implementation for `nalgebra::DMatrix`
pub mod dmatrix_io;

/// Sampling and log-space normalisation on `nalgebra::DMatrix`
pub mod dmatrix_util;

/// Shared matrix traits
pub mod traits;
