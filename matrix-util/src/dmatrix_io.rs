use crate::common_io::{read_lines_of_types, write_lines, Delimiter};
use crate::traits::*;
pub use nalgebra::{DMatrix, DVector};

use std::fmt::{Debug, Display};
use std::str::FromStr;

impl<T> IoOps for DMatrix<T>
where
    T: nalgebra::Scalar + Send + FromStr + Display + Copy,
    <T as FromStr>::Err: Debug,
{
    type Scalar = T;
    type Mat = Self;

    fn read_file_delim(
        tsv_file: &str,
        delim: impl Into<Delimiter>,
        skip: Option<usize>,
    ) -> anyhow::Result<Self::Mat> {
        let hdr_line = match skip {
            Some(skip) => skip as i64,
            None => -1, // no skipping
        };

        let data = read_lines_of_types::<T>(tsv_file, delim, hdr_line)?.lines;

        if data.is_empty() {
            return Err(anyhow::anyhow!("No data in file {}", tsv_file));
        }

        let ncols = data[0].len();
        let nrows = data.len();

        if let Some(bad) = data.iter().position(|row| row.len() != ncols) {
            return Err(anyhow::anyhow!(
                "row {} has {} columns, expected {}",
                bad,
                data[bad].len(),
                ncols
            ));
        }

        let data = data.into_iter().flatten().collect::<Vec<_>>();

        Ok(DMatrix::<T>::from_row_iterator(nrows, ncols, data))
    }

    fn write_file_delim(
        &self,
        tsv_file: &str,
        delim: &str,
        column_names: Option<&[Box<str>]>,
    ) -> anyhow::Result<()> {
        let mut lines = Vec::with_capacity(self.nrows() + 1);

        if let Some(names) = column_names {
            if names.len() != self.ncols() {
                return Err(anyhow::anyhow!(
                    "{} column names for {} columns",
                    names.len(),
                    self.ncols()
                ));
            }
            lines.push(names.join(delim).into_boxed_str());
        }

        // par_iter() or par_bridge() would
        // mess up the order of the rows
        lines.extend(self.row_iter().map(|row| {
            row.iter()
                .map(|x| format!("{}", *x))
                .collect::<Vec<String>>()
                .join(delim)
                .into_boxed_str()
        }));

        write_lines(&lines, tsv_file)?;
        Ok(())
    }
}
