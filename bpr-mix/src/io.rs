//! Text formats.
//!
//! Long table of calls, tab separated, plain or gzipped:
//!
//! ```text
//! cell    region  pos     met
//! cell_0  chr1:1  -0.52   1
//! cell_0  chr1:1  0.13    0
//! ```
//!
//! Cells and regions are numbered in order of first appearance. Labels are
//! `cell<TAB>label` lines; fits and reports are JSON.

use crate::data::{CallTable, CpgCall, MethylData};
use crate::variational::MixtureFit;
use log::info;
use matrix_util::common_io::{
    open_buf_reader, open_buf_writer, read_lines_of_words_delim, write_lines,
};
use matrix_util::traits::IoOps;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;

/// Column names of the long table
pub const LONG_TABLE_HEADER: [&str; 4] = ["cell", "region", "pos", "met"];

struct LongRow {
    cell: Box<str>,
    region: Box<str>,
    call: CpgCall,
}

fn parse_long_rows(file: &str) -> anyhow::Result<Vec<LongRow>> {
    let out = read_lines_of_words_delim(file, "\t", 0)?;
    let expected: Vec<Box<str>> = LONG_TABLE_HEADER.iter().map(|&x| x.into()).collect();
    anyhow::ensure!(
        out.header == expected,
        "{}: expected header `{}`, found `{}`",
        file,
        LONG_TABLE_HEADER.join(" "),
        out.header.join(" ")
    );

    out.lines
        .into_iter()
        .enumerate()
        .map(|(i, words)| {
            // the header is line 1
            let line = i + 2;
            anyhow::ensure!(
                words.len() == 4,
                "{}:{}: expected 4 fields, found {}",
                file,
                line,
                words.len()
            );
            let pos: f64 = words[2]
                .parse()
                .map_err(|e| anyhow::anyhow!("{}:{}: bad position `{}`: {}", file, line, words[2], e))?;
            let met = match words[3].as_ref() {
                "1" => true,
                "0" => false,
                x => anyhow::bail!("{}:{}: methylation call must be 0 or 1, found `{}`", file, line, x),
            };
            Ok(LongRow {
                cell: words[0].clone(),
                region: words[1].clone(),
                call: CpgCall::new(pos, met),
            })
        })
        .collect()
}

/// Index of `name`, registering it if unseen
fn index_of(name: &str, names: &mut Vec<Box<str>>, index: &mut HashMap<Box<str>, usize>) -> usize {
    if let Some(&i) = index.get(name) {
        return i;
    }
    let i = names.len();
    names.push(name.into());
    index.insert(name.into(), i);
    i
}

fn sort_by_position(table: &mut CallTable) {
    for calls in table.iter_mut().flatten() {
        calls.sort_by(|a, b| a.pos.total_cmp(&b.pos));
    }
}

/// Read a long table of calls
pub fn read_long_table(file: &str) -> anyhow::Result<MethylData> {
    let rows = parse_long_rows(file)?;

    let (mut cells, mut regions) = (vec![], vec![]);
    let (mut cell_index, mut region_index) = (HashMap::new(), HashMap::new());
    let keys: Vec<(usize, usize)> = rows
        .iter()
        .map(|r| {
            (
                index_of(&r.cell, &mut cells, &mut cell_index),
                index_of(&r.region, &mut regions, &mut region_index),
            )
        })
        .collect();

    let mut met: CallTable = vec![vec![vec![]; regions.len()]; cells.len()];
    for ((n, m), row) in keys.into_iter().zip(rows) {
        met[n][m].push(row.call);
    }
    sort_by_position(&mut met);

    let data = MethylData::new(cells, regions, met)?;
    info!(
        "Read {} calls of {} cells x {} regions from {}",
        data.num_calls(),
        data.num_cells(),
        data.num_regions(),
        file
    );
    Ok(data)
}

/// Read held-out calls and attach them to `train`, matching cells and
/// regions by name.
///
/// A cell or region held out everywhere has no training rows; it is added
/// to `train` without calls so both tables share the same names.
pub fn read_test_table(file: &str, mut train: MethylData) -> anyhow::Result<MethylData> {
    let rows = parse_long_rows(file)?;

    let row_cells: Vec<Box<str>> = rows.iter().map(|r| r.cell.clone()).collect();
    let row_regions: Vec<Box<str>> = rows.iter().map(|r| r.region.clone()).collect();
    let (num_cells, num_regions) = (train.num_cells(), train.num_regions());
    let (cell_idx, region_idx) = train.register_names(&row_cells, &row_regions);
    if train.num_cells() > num_cells || train.num_regions() > num_regions {
        info!(
            "{}: {} cells and {} regions have held-out calls only",
            file,
            train.num_cells() - num_cells,
            train.num_regions() - num_regions
        );
    }

    let mut test: CallTable = vec![vec![vec![]; train.num_regions()]; train.num_cells()];
    for ((n, m), row) in cell_idx.into_iter().zip(region_idx).zip(rows) {
        test[n][m].push(row.call);
    }
    sort_by_position(&mut test);

    let ret = train.with_test(test)?;
    info!("Read {} held-out calls from {}", ret.num_test_calls(), file);
    Ok(ret)
}

fn long_table_lines(cells: &[Box<str>], regions: &[Box<str>], table: &CallTable) -> Vec<Box<str>> {
    let mut lines = vec![LONG_TABLE_HEADER.join("\t").into_boxed_str()];
    for (cell, row) in cells.iter().zip(table) {
        for (region, calls) in regions.iter().zip(row) {
            lines.extend(calls.iter().map(|c| {
                format!("{}\t{}\t{}\t{}", cell, region, c.pos, c.met as u8).into_boxed_str()
            }));
        }
    }
    lines
}

/// Write the training calls as a long table
pub fn write_long_table(data: &MethylData, file: &str) -> anyhow::Result<()> {
    write_lines(&long_table_lines(data.cells(), data.regions(), data.met()), file)
}

/// Write the held-out calls as a long table
pub fn write_test_table(data: &MethylData, file: &str) -> anyhow::Result<()> {
    let test = data
        .test()
        .ok_or_else(|| anyhow::anyhow!("no held-out calls to write"))?;
    write_lines(&long_table_lines(data.cells(), data.regions(), test), file)
}

/// Read `cell<TAB>label` lines and return the label index of every cell in
/// `cells`. Label strings are numbered in order of first appearance.
pub fn read_labels(file: &str, cells: &[Box<str>]) -> anyhow::Result<Vec<usize>> {
    let out = read_lines_of_words_delim(file, "\t", -1)?;

    let mut label_names: Vec<Box<str>> = vec![];
    let mut label_index = HashMap::new();
    let mut cell_label: HashMap<Box<str>, usize> = HashMap::new();

    for (i, words) in out.lines.iter().enumerate() {
        anyhow::ensure!(
            words.len() == 2,
            "{}:{}: expected `cell<TAB>label`",
            file,
            i + 1
        );
        // tolerate a header line
        if i == 0 && words[0].as_ref() == "cell" && words[1].as_ref() == "label" {
            continue;
        }
        let k = index_of(&words[1], &mut label_names, &mut label_index);
        cell_label.insert(words[0].clone(), k);
    }

    anyhow::ensure!(
        cell_label.len() == cells.len(),
        "{} labelled cells, {} cells in the data",
        cell_label.len(),
        cells.len()
    );

    cells
        .iter()
        .map(|c| {
            cell_label
                .get(c)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("{}: no label for cell `{}`", file, c))
        })
        .collect()
}

/// Write `cell<TAB>label` lines
pub fn write_labels(cells: &[Box<str>], labels: &[usize], file: &str) -> anyhow::Result<()> {
    anyhow::ensure!(
        cells.len() == labels.len(),
        "{} labels for {} cells",
        labels.len(),
        cells.len()
    );
    let mut lines = vec![Box::<str>::from("cell\tlabel")];
    lines.extend(
        cells
            .iter()
            .zip(labels)
            .map(|(c, k)| format!("{}\t{}", c, k).into_boxed_str()),
    );
    write_lines(&lines, file)
}

/// Write any serialisable value as pretty JSON (gzipped if the name ends
/// in `.gz`)
pub fn write_json<T: Serialize>(value: &T, file: &str) -> anyhow::Result<()> {
    let mut buf = open_buf_writer(file)?;
    serde_json::to_writer_pretty(&mut buf, value)?;
    writeln!(buf)?;
    buf.flush()?;
    Ok(())
}

/// Read a JSON value written by [`write_json`]
pub fn read_json<T: DeserializeOwned>(file: &str) -> anyhow::Result<T> {
    let buf = open_buf_reader(file)?;
    serde_json::from_reader(buf).map_err(|e| anyhow::anyhow!("{}: {}", file, e))
}

/// Save a fit as JSON
pub fn save_fit(fit: &MixtureFit, file: &str) -> anyhow::Result<()> {
    write_json(fit, file)?;
    info!("Saved the fit to {}", file);
    Ok(())
}

/// Load a fit saved by [`save_fit`]
pub fn load_fit(file: &str) -> anyhow::Result<MixtureFit> {
    read_json(file)
}

fn cluster_names(k: usize) -> Vec<Box<str>> {
    (0..k).map(|k| format!("k{}", k).into_boxed_str()).collect()
}

/// Write responsibilities, one `cell<TAB>r_1 ... r_K` line per cell
pub fn write_responsibilities(fit: &MixtureFit, file: &str) -> anyhow::Result<()> {
    let mut lines = Vec::with_capacity(fit.num_cells() + 1);
    let mut header = vec![Box::<str>::from("cell")];
    header.extend(cluster_names(fit.num_clusters()));
    lines.push(header.join("\t").into_boxed_str());

    lines.extend(fit.cells.iter().zip(fit.responsibilities.row_iter()).map(|(c, row)| {
        let probs: Vec<String> = row.iter().map(|r| format!("{}", r)).collect();
        format!("{}\t{}", c, probs.join("\t")).into_boxed_str()
    }));
    write_lines(&lines, file)
}

/// Write the mixing proportions as a one-row table
pub fn write_mixing(fit: &MixtureFit, file: &str) -> anyhow::Result<()> {
    let mixing = crate::Mat::from_row_slice(1, fit.num_clusters(), &fit.mixing);
    mixing.to_tsv_with_header(file, &cluster_names(fit.num_clusters()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use matrix_util::common_io::create_temp_dir_file;

    fn write_text(lines: &[&str], suffix: &str) -> anyhow::Result<std::path::PathBuf> {
        let file = create_temp_dir_file(suffix)?;
        let lines: Vec<Box<str>> = lines.iter().map(|&x| x.into()).collect();
        write_lines(&lines, file.to_str().unwrap())?;
        Ok(file)
    }

    #[test]
    fn test_read_long_table_orders_and_sorts() -> anyhow::Result<()> {
        let file = write_text(
            &[
                "cell\tregion\tpos\tmet",
                "b\tr2\t0.5\t1",
                "a\tr1\t0.1\t0",
                "b\tr2\t-0.5\t0",
                "b\tr1\t0.0\t1",
            ],
            "tsv.gz",
        )?;
        let data = read_long_table(file.to_str().unwrap())?;
        assert_eq!(data.cells(), &[Box::<str>::from("b"), "a".into()]);
        assert_eq!(data.regions(), &[Box::<str>::from("r2"), "r1".into()]);
        assert_eq!(
            data.calls(0, 0),
            &[CpgCall::new(-0.5, false), CpgCall::new(0.5, true)]
        );
        assert!(data.calls(1, 0).is_empty());
        Ok(())
    }

    #[test]
    fn test_malformed_rows_are_rejected() -> anyhow::Result<()> {
        let bad_call = write_text(&["cell\tregion\tpos\tmet", "a\tr\t0.1\t2"], "tsv")?;
        assert!(read_long_table(bad_call.to_str().unwrap()).is_err());

        let bad_pos = write_text(&["cell\tregion\tpos\tmet", "a\tr\t1.5\t1"], "tsv")?;
        assert!(read_long_table(bad_pos.to_str().unwrap()).is_err());

        let bad_header = write_text(&["cell\tpos\tmet", "a\t0.1\t1"], "tsv")?;
        assert!(read_long_table(bad_header.to_str().unwrap()).is_err());
        Ok(())
    }

    #[test]
    fn test_labels_follow_cell_order() -> anyhow::Result<()> {
        let file = write_text(&["c2\tT", "c1\tB", "c3\tT"], "tsv")?;
        let cells: Vec<Box<str>> = vec!["c1".into(), "c2".into(), "c3".into()];
        // T is seen first
        assert_eq!(read_labels(file.to_str().unwrap(), &cells)?, vec![1, 0, 0]);

        let missing: Vec<Box<str>> = vec!["c1".into(), "c2".into(), "c4".into()];
        assert!(read_labels(file.to_str().unwrap(), &missing).is_err());
        Ok(())
    }
}
