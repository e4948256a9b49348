use crate::common_io::Delimiter;

/// Read and write matrices from and to files
pub trait IoOps {
    type Scalar;
    type Mat;

    fn read_file_delim(
        file: &str,
        delim: impl Into<Delimiter>,
        skip: Option<usize>,
    ) -> anyhow::Result<Self::Mat>;

    fn from_tsv(tsv_file: &str, skip: Option<usize>) -> anyhow::Result<Self::Mat> {
        Self::read_file_delim(tsv_file, "\t", skip)
    }

    /// Write with an optional header line of column names
    fn write_file_delim(
        &self,
        file: &str,
        delim: &str,
        column_names: Option<&[Box<str>]>,
    ) -> anyhow::Result<()>;

    fn to_tsv(&self, tsv_file: &str) -> anyhow::Result<()> {
        self.write_file_delim(tsv_file, "\t", None)
    }

    fn to_tsv_with_header(
        &self,
        tsv_file: &str,
        column_names: &[Box<str>],
    ) -> anyhow::Result<()> {
        self.write_file_delim(tsv_file, "\t", Some(column_names))
    }
}
