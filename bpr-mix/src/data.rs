use crate::basis::Basis;
use crate::{DVec, Mat};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One CpG methylation call
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CpgCall {
    /// Position relative to the region, in `[-1, 1]`
    pub pos: f64,
    /// Methylated or not
    pub met: bool,
}

impl CpgCall {
    /// A call at `pos`
    pub fn new(pos: f64, met: bool) -> Self {
        Self { pos, met }
    }
}

/// CpG calls of one cell in one region; empty means no coverage
pub type RegionCalls = Vec<CpgCall>;

/// Cell × region table of CpG calls
pub type CallTable = Vec<Vec<RegionCalls>>;

/// Per-cell, per-region methylation calls.
///
/// `met` holds the data the model is trained on. After partitioning,
/// held-out calls live in the separate `test` slot.
#[derive(Debug, Clone)]
pub struct MethylData {
    cells: Vec<Box<str>>,
    regions: Vec<Box<str>>,
    met: CallTable,
    test: Option<CallTable>,
}

fn check_table(table: &CallTable, num_cells: usize, num_regions: usize) -> anyhow::Result<()> {
    anyhow::ensure!(
        table.len() == num_cells,
        "{} cells in the table, {} cell names",
        table.len(),
        num_cells
    );
    for (n, cell) in table.iter().enumerate() {
        anyhow::ensure!(
            cell.len() == num_regions,
            "cell {} has {} regions, expected {}",
            n,
            cell.len(),
            num_regions
        );
        for (m, calls) in cell.iter().enumerate() {
            if let Some(bad) = calls
                .iter()
                .find(|c| !c.pos.is_finite() || c.pos < -1.0 || c.pos > 1.0)
            {
                anyhow::bail!(
                    "cell {}, region {}: relative position {} outside [-1, 1]",
                    n,
                    m,
                    bad.pos
                );
            }
        }
    }
    Ok(())
}

impl MethylData {
    /// Build from a cell × region table of calls.
    ///
    /// Fails if the table shape does not match the names or a position lies
    /// outside `[-1, 1]`.
    pub fn new(cells: Vec<Box<str>>, regions: Vec<Box<str>>, met: CallTable) -> anyhow::Result<Self> {
        check_table(&met, cells.len(), regions.len())?;
        Ok(Self {
            cells,
            regions,
            met,
            test: None,
        })
    }

    /// Index of every name in `cells` and `regions`. Names not seen yet
    /// are appended with no calls, in training and held-out tables alike.
    pub fn register_names(
        &mut self,
        cells: &[Box<str>],
        regions: &[Box<str>],
    ) -> (Vec<usize>, Vec<usize>) {
        let mut region_index: HashMap<Box<str>, usize> = self
            .regions
            .iter()
            .enumerate()
            .map(|(m, x)| (x.clone(), m))
            .collect();
        let region_idx: Vec<usize> = regions
            .iter()
            .map(|r| {
                *region_index.entry(r.clone()).or_insert_with(|| {
                    self.regions.push(r.clone());
                    for row in self.met.iter_mut().chain(self.test.iter_mut().flatten()) {
                        row.push(vec![]);
                    }
                    self.regions.len() - 1
                })
            })
            .collect();

        let num_regions = self.regions.len();
        let mut cell_index: HashMap<Box<str>, usize> = self
            .cells
            .iter()
            .enumerate()
            .map(|(n, x)| (x.clone(), n))
            .collect();
        let cell_idx: Vec<usize> = cells
            .iter()
            .map(|c| {
                *cell_index.entry(c.clone()).or_insert_with(|| {
                    self.cells.push(c.clone());
                    self.met.push(vec![vec![]; num_regions]);
                    if let Some(test) = self.test.as_mut() {
                        test.push(vec![vec![]; num_regions]);
                    }
                    self.cells.len() - 1
                })
            })
            .collect();

        (cell_idx, region_idx)
    }

    /// Attach held-out calls with the same shape as the training calls
    pub fn with_test(mut self, test: CallTable) -> anyhow::Result<Self> {
        check_table(&test, self.cells.len(), self.regions.len())?;
        self.test = Some(test);
        Ok(self)
    }

    /// Cell names
    pub fn cells(&self) -> &[Box<str>] {
        &self.cells
    }

    /// Region names
    pub fn regions(&self) -> &[Box<str>] {
        &self.regions
    }

    /// Number of cells
    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    /// Number of regions
    pub fn num_regions(&self) -> usize {
        self.regions.len()
    }

    /// Training calls, cell × region
    pub fn met(&self) -> &CallTable {
        &self.met
    }

    /// Held-out calls, if partitioned
    pub fn test(&self) -> Option<&CallTable> {
        self.test.as_ref()
    }

    /// Training calls of cell `n` in region `m`
    pub fn calls(&self, n: usize, m: usize) -> &[CpgCall] {
        &self.met[n][m]
    }

    /// Number of training calls over all cells and regions
    pub fn num_calls(&self) -> usize {
        self.met.iter().flatten().map(|x| x.len()).sum()
    }

    /// Number of held-out calls (0 if not partitioned)
    pub fn num_test_calls(&self) -> usize {
        self.test
            .as_ref()
            .map(|t| t.iter().flatten().map(|x| x.len()).sum())
            .unwrap_or(0)
    }

    /// Number of regions with at least one training call in cell `n`
    pub fn num_covered_regions(&self, n: usize) -> usize {
        self.met[n].iter().filter(|x| !x.is_empty()).count()
    }

    /// Replace the training calls and attach the held-out ones
    pub(crate) fn into_partitioned(self, train: CallTable, test: CallTable) -> Self {
        Self {
            cells: self.cells,
            regions: self.regions,
            met: train,
            test: Some(test),
        }
    }

    /// Precompute the basis expansion of every covered cell-region
    pub fn expand(&self, basis: &Basis) -> ExpandedData {
        let designs = self
            .met
            .par_iter()
            .map(|cell| {
                cell.iter()
                    .map(|calls| RegionDesign::from_calls(basis, calls))
                    .collect()
            })
            .collect();

        ExpandedData {
            num_cells: self.num_cells(),
            num_regions: self.num_regions(),
            dim: basis.dim(),
            designs,
        }
    }
}

/// Basis-expanded calls of one cell in one region
#[derive(Debug, Clone)]
pub struct RegionDesign {
    /// Design matrix, one row `h(x_i)` per CpG
    pub h: Mat,
    /// `H' (y - 1/2)`, the data term of the bounded likelihood
    pub hty: DVec,
}

impl RegionDesign {
    /// `None` for a region without calls
    pub fn from_calls(basis: &Basis, calls: &[CpgCall]) -> Option<Self> {
        if calls.is_empty() {
            return None;
        }
        let pos: Vec<f64> = calls.iter().map(|c| c.pos).collect();
        let h = basis.design_matrix(&pos);
        let y_centred = DVec::from_iterator(
            calls.len(),
            calls.iter().map(|c| if c.met { 0.5 } else { -0.5 }),
        );
        let hty = h.tr_mul(&y_centred);
        Some(Self { h, hty })
    }

    /// Number of CpGs
    pub fn len(&self) -> usize {
        self.h.nrows()
    }

    /// Always false; empty regions have no design
    pub fn is_empty(&self) -> bool {
        self.h.nrows() == 0
    }
}

/// Basis expansion of a whole data set, computed once and shared read-only
#[derive(Debug, Clone)]
pub struct ExpandedData {
    /// Number of cells
    pub num_cells: usize,
    /// Number of regions
    pub num_regions: usize,
    /// Feature dimension including the bias
    pub dim: usize,
    /// `designs[n][m]`, `None` where cell `n` has no calls in region `m`
    pub designs: Vec<Vec<Option<RegionDesign>>>,
}

impl ExpandedData {
    /// Number of covered cell-regions
    pub fn num_covered(&self) -> usize {
        self.designs.iter().flatten().filter(|d| d.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn toy() -> anyhow::Result<MethylData> {
        let met = vec![
            vec![
                vec![CpgCall::new(-0.5, true), CpgCall::new(0.5, false)],
                vec![],
            ],
            vec![vec![], vec![CpgCall::new(0.0, true)]],
        ];
        MethylData::new(
            vec!["c1".into(), "c2".into()],
            vec!["r1".into(), "r2".into()],
            met,
        )
    }

    #[test]
    fn test_shape_and_counts() -> anyhow::Result<()> {
        let data = toy()?;
        assert_eq!(data.num_cells(), 2);
        assert_eq!(data.num_regions(), 2);
        assert_eq!(data.num_calls(), 3);
        assert_eq!(data.num_covered_regions(0), 1);
        assert!(data.test().is_none());
        Ok(())
    }

    #[test]
    fn test_position_outside_domain_is_rejected() {
        let met = vec![vec![vec![CpgCall::new(1.5, true)]]];
        assert!(MethylData::new(vec!["c".into()], vec!["r".into()], met).is_err());
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let met = vec![vec![vec![CpgCall::new(0.0, true)]]];
        assert!(MethylData::new(vec!["c".into()], vec!["r".into(), "s".into()], met).is_err());
    }

    #[test]
    fn test_expand_precomputes_data_term() -> anyhow::Result<()> {
        let data = toy()?;
        let basis = Basis::polynomial(1)?;
        let expanded = data.expand(&basis);
        assert_eq!(expanded.num_covered(), 2);
        assert!(expanded.designs[0][1].is_none());

        let design = expanded.designs[0][0].as_ref().unwrap();
        assert_eq!(design.len(), 2);
        // H'(y - 1/2) = [1, -0.5]*0.5 + [1, 0.5]*(-0.5)
        assert_abs_diff_eq!(design.hty[0], 0.0);
        assert_abs_diff_eq!(design.hty[1], -0.5);
        Ok(())
    }
}
