use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use super::model::Dataset;
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// LabelTable – id prefix → label values
// ---------------------------------------------------------------------------

/// One row of a label table.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelRow {
    /// Prefix of the spectrum target ids this row applies to.
    pub id: String,
    pub values: Vec<f64>,
}

/// Labels keyed by target-id prefix, in file order.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelTable {
    /// Names of the label columns (header minus the id column).
    pub names: Vec<String>,
    pub rows: Vec<LabelRow>,
}

impl LabelTable {
    /// Load a table whose first column is the id prefix and whose remaining
    /// columns are numeric labels. Dispatch by extension:
    ///
    /// * `.csv` – comma separated
    /// * `.tsv` – tab separated
    /// * anything else – whitespace separated, `#` starts a comment line
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::Input(format!("label file '{}' does not exist", path.display())));
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        let records = match ext.as_str() {
            "csv" => read_delimited(path, b',')?,
            "tsv" => read_delimited(path, b'\t')?,
            _ => read_whitespace(path)?,
        };
        let table = Self::from_records(path, records)?;
        info!(
            "loaded {} label rows with columns {:?} from {}",
            table.rows.len(),
            table.names,
            path.display()
        );
        Ok(table)
    }

    /// Build a table from a header record followed by data records.
    fn from_records(path: &Path, mut records: Vec<Vec<String>>) -> Result<Self> {
        let load_err = |reason: String| Error::Load {
            path: PathBuf::from(path),
            reason,
        };
        if records.is_empty() {
            return Err(load_err("label table has no header row".into()));
        }
        let header = records.remove(0);
        if header.len() < 2 {
            return Err(load_err("label table needs an id column and at least one label".into()));
        }
        let names: Vec<String> = header[1..].to_vec();

        let rows = records
            .into_iter()
            .enumerate()
            .map(|(row_no, record)| {
                if record.len() != header.len() {
                    return Err(load_err(format!(
                        "row {row_no}: {} fields, header has {}",
                        record.len(),
                        header.len()
                    )));
                }
                let values = record[1..]
                    .iter()
                    .enumerate()
                    .map(|(j, tok)| {
                        tok.trim().parse::<f64>().map_err(|_| {
                            load_err(format!("row {row_no}, {}: '{tok}' is not a number", names[j]))
                        })
                    })
                    .collect::<Result<Vec<f64>>>()?;
                Ok(LabelRow {
                    id: record[0].trim().to_string(),
                    values,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(LabelTable { names, rows })
    }

    /// First row (in table order) whose id is a prefix of `target`.
    pub fn lookup(&self, target: &str) -> Option<&LabelRow> {
        self.rows.iter().find(|row| target.starts_with(row.id.as_str()))
    }
}

fn read_delimited(path: &Path, delimiter: u8) -> Result<Vec<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_path(path)?;
    reader
        .records()
        .map(|r| Ok(r?.iter().map(str::to_string).collect()))
        .collect()
}

fn read_whitespace(path: &Path) -> Result<Vec<Vec<String>>> {
    let text = std::fs::read_to_string(path)?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| l.split_whitespace().map(str::to_string).collect())
        .collect())
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// Attach labels to every target whose id starts with a table id; targets
/// without a match are dropped. Ties go to the first matching table row.
pub fn match_labels(dataset: &Dataset, table: &LabelTable) -> Result<Dataset> {
    let mut kept = Vec::new();
    let mut labels = Vec::new();
    for (i, target) in dataset.targets().iter().enumerate() {
        match table.lookup(target) {
            Some(row) => {
                kept.push(i);
                labels.push(row.values.clone());
            }
            None => debug!("no labels for target '{target}', dropped"),
        }
    }

    let dropped = dataset.len() - kept.len();
    if kept.is_empty() {
        warn!("no target matched the label table");
    } else {
        info!("matched {} targets, dropped {dropped}", kept.len());
    }
    dataset
        .select(&kept)?
        .with_labels(labels, Some(table.names.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::RawSpectrum;

    fn spectra(targets: &[&str]) -> Dataset {
        Dataset::from_spectra(
            targets
                .iter()
                .map(|t| RawSpectrum {
                    target: t.to_string(),
                    wavelength: vec![4000.0, 4001.0],
                    flux: vec![1.0, 1.0],
                    ivar: vec![1.0, 1.0],
                })
                .collect(),
        )
        .unwrap()
    }

    fn table(rows: &[(&str, f64)]) -> LabelTable {
        LabelTable {
            names: vec!["teff".into()],
            rows: rows
                .iter()
                .map(|&(id, v)| LabelRow {
                    id: id.to_string(),
                    values: vec![v],
                })
                .collect(),
        }
    }

    #[test]
    fn unmatched_targets_are_dropped() {
        let ds = spectra(&["HD1234_obs1", "HD5678_obs2"]);
        let out = match_labels(&ds, &table(&[("HD1234", 5.2), ("HD9999", 3.1)])).unwrap();
        assert_eq!(out.targets(), &["HD1234_obs1".to_string()]);
        assert_eq!(out.labels().unwrap(), &[vec![5.2]]);
        assert_eq!(out.label_names().unwrap(), &["teff".to_string()]);
    }

    #[test]
    fn first_matching_row_wins() {
        let ds = spectra(&["HD12345_a"]);
        let out = match_labels(&ds, &table(&[("HD123", 1.0), ("HD12345", 2.0)])).unwrap();
        assert_eq!(out.labels().unwrap(), &[vec![1.0]]);
    }

    #[test]
    fn nothing_matched_gives_empty_dataset() {
        let out = match_labels(&spectra(&["A", "B"]), &table(&[("C", 1.0)])).unwrap();
        assert!(out.is_empty());
        assert!(out.has_labels());
    }

    #[test]
    fn loads_csv_and_whitespace_tables() {
        let dir = tempfile::tempdir().unwrap();

        let csv_path = dir.path().join("labels.csv");
        std::fs::write(&csv_path, "star,teff,logg\nHD1234, 5777, 4.44\nHD9999,4500,2.5\n").unwrap();
        let t = LabelTable::load(&csv_path).unwrap();
        assert_eq!(t.names, vec!["teff".to_string(), "logg".to_string()]);
        assert_eq!(t.rows[0].id, "HD1234");
        assert_eq!(t.rows[0].values, vec![5777.0, 4.44]);

        let txt_path = dir.path().join("labels.txt");
        std::fs::write(&txt_path, "# comment\nstar teff\nHD1  5000\n\nHD2\t6000\n").unwrap();
        let t = LabelTable::load(&txt_path).unwrap();
        assert_eq!(t.rows.len(), 2);
        assert_eq!(t.rows[1].values, vec![6000.0]);
    }

    #[test]
    fn non_numeric_label_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "star,teff\nHD1,hot\n").unwrap();
        assert!(matches!(LabelTable::load(&path), Err(Error::Load { .. })));
    }
}
