use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{
    Array, AsArray, Float32Array, Float64Array, Int32Array, Int64Array, LargeListArray, ListArray,
};
use arrow::datatypes::DataType;
use log::{debug, info};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use rayon::prelude::*;
use serde_json::Value as JsonValue;

use super::model::{Dataset, RawSpectrum};
use crate::error::{Error, Result};
use crate::pipeline::progress::{Progress, Stage, StageCounter};

// ---------------------------------------------------------------------------
// SpectrumLoader – the seam for instrument-specific readers
// ---------------------------------------------------------------------------

/// Reads spectra from files. A FITS reader for a given instrument plugs in
/// here; [`TableSpectrumLoader`] covers tabular exports.
pub trait SpectrumLoader: Sync {
    /// Whether `path` looks like a file this loader reads.
    fn supports(&self, path: &Path) -> bool;

    /// Every spectrum stored in `path`.
    fn load(&self, path: &Path) -> Result<Vec<RawSpectrum>>;
}

fn load_err(path: &Path, reason: impl Into<String>) -> Error {
    Error::Load {
        path: PathBuf::from(path),
        reason: reason.into(),
    }
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

/// Loads spectra from Parquet, JSON or CSV. Dispatch by extension.
///
/// Supported formats:
/// * `.parquet` – one row per spectrum: `target` (string), `wavelength`,
///   `flux` (float lists) and either `ivar` (float list) or `snr` (float)
/// * `.json`    – one object, or an array of objects, with the same fields
/// * `.csv`     – one row per sample: `wavelength`, `flux` and `ivar` or a
///   constant `snr` column; the target id is the file stem
#[derive(Debug, Clone, Copy, Default)]
pub struct TableSpectrumLoader;

impl SpectrumLoader for TableSpectrumLoader {
    fn supports(&self, path: &Path) -> bool {
        matches!(extension(path).as_str(), "parquet" | "pq" | "json" | "csv")
    }

    fn load(&self, path: &Path) -> Result<Vec<RawSpectrum>> {
        let spectra = match extension(path).as_str() {
            "parquet" | "pq" => load_parquet(path)?,
            "json" => load_json(path)?,
            "csv" => vec![load_csv(path)?],
            other => return Err(Error::Input(format!("unsupported file extension: .{other}"))),
        };
        debug!("{}: {} spectra", path.display(), spectra.len());
        Ok(spectra)
    }
}

// ---------------------------------------------------------------------------
// Shared checks and the SNR noise model
// ---------------------------------------------------------------------------

/// Noise on the flux of a spectrum: explicit ivar or a global S/N figure.
enum Noise {
    Ivar(Vec<f64>),
    Snr(f64),
}

fn build_spectrum(
    path: &Path,
    target: String,
    wavelength: Vec<f64>,
    flux: Vec<f64>,
    noise: Noise,
) -> Result<RawSpectrum> {
    if wavelength.len() != flux.len() {
        return Err(load_err(
            path,
            format!(
                "'{target}': wavelength has {} values but flux has {}",
                wavelength.len(),
                flux.len()
            ),
        ));
    }
    if wavelength.len() < 2 {
        return Err(load_err(path, format!("'{target}': fewer than two samples")));
    }
    if wavelength.windows(2).any(|w| !(w[1] > w[0])) {
        return Err(load_err(path, format!("'{target}': wavelength is not strictly increasing")));
    }
    let ivar = match noise {
        Noise::Ivar(ivar) => {
            if ivar.len() != flux.len() {
                return Err(load_err(
                    path,
                    format!("'{target}': ivar has {} values but flux has {}", ivar.len(), flux.len()),
                ));
            }
            if ivar.iter().any(|&v| v < 0.0) {
                return Err(load_err(path, format!("'{target}': negative inverse variance")));
            }
            ivar
        }
        Noise::Snr(snr) => ivar_from_snr(path, &flux, snr)?,
    };
    Ok(RawSpectrum {
        target,
        wavelength,
        flux,
        ivar,
    })
}

/// Inverse variance of a photon-noise spectrum with median S/N `snr`.
///
/// The noise scales as `sqrt(flux)`, normalized so the median of
/// `scale · sqrt(flux)` equals `snr`. Pixels with non-finite or zero flux, or
/// a non-finite or non-positive noise estimate, are masked with ivar 0.
pub fn ivar_from_snr(path: &Path, flux: &[f64], snr: f64) -> Result<Vec<f64>> {
    let mut roots: Vec<f64> = flux.iter().map(|f| f.sqrt()).filter(|r| !r.is_nan()).collect();
    if roots.is_empty() {
        return Err(Error::Data {
            path: PathBuf::from(path),
            reason: "no finite flux to derive the noise from".into(),
        });
    }
    roots.sort_by(|a, b| a.total_cmp(b));
    let mid = roots.len() / 2;
    let median = if roots.len() % 2 == 0 {
        0.5 * (roots[mid - 1] + roots[mid])
    } else {
        roots[mid]
    };
    let scale = snr / median;
    if !scale.is_finite() || scale <= 0.0 {
        return Err(Error::Data {
            path: PathBuf::from(path),
            reason: format!("S/N {snr} against median sqrt(flux) {median} gives no usable noise scale"),
        });
    }

    Ok(flux
        .iter()
        .map(|&f| {
            let std = f / (scale * f.sqrt());
            let bad = !f.is_finite() || f == 0.0 || !std.is_finite() || std <= 0.0;
            if bad {
                0.0
            } else {
                1.0 / (std * std)
            }
        })
        .collect())
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Expected JSON schema:
///
/// ```json
/// {
///   "target": "HD1234_2014-09-16",
///   "wavelength": [3781.9, 3781.91, ...],
///   "flux": [812.4, 809.1, ...],
///   "ivar": [0.0012, 0.0013, ...]
/// }
/// ```
///
/// `ivar` may be replaced by a scalar `"snr"`. A top-level array holds
/// several such objects.
fn load_json(path: &Path) -> Result<Vec<RawSpectrum>> {
    let text = std::fs::read_to_string(path)?;
    let root: JsonValue = serde_json::from_str(&text)?;

    let records: Vec<&JsonValue> = match &root {
        JsonValue::Array(items) => items.iter().collect(),
        JsonValue::Object(_) => vec![&root],
        _ => return Err(load_err(path, "expected a JSON object or array of objects")),
    };

    records
        .into_iter()
        .enumerate()
        .map(|(i, rec)| {
            let obj = rec
                .as_object()
                .ok_or_else(|| load_err(path, format!("record {i} is not a JSON object")))?;
            let target = obj
                .get("target")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| load_err(path, format!("record {i}: missing 'target'")))?
                .to_string();
            let wavelength = json_array_to_f64(path, obj.get("wavelength"), i, "wavelength")?;
            let flux = json_array_to_f64(path, obj.get("flux"), i, "flux")?;
            let noise = match (obj.get("ivar"), obj.get("snr").and_then(JsonValue::as_f64)) {
                (Some(ivar), _) => Noise::Ivar(json_array_to_f64(path, Some(ivar), i, "ivar")?),
                (None, Some(snr)) => Noise::Snr(snr),
                (None, None) => {
                    return Err(load_err(path, format!("record {i}: needs 'ivar' or 'snr'")))
                }
            };
            build_spectrum(path, target, wavelength, flux, noise)
        })
        .collect()
}

/// Numbers of a JSON array; `null` entries read as NaN.
fn json_array_to_f64(path: &Path, val: Option<&JsonValue>, row: usize, col: &str) -> Result<Vec<f64>> {
    let arr = val
        .and_then(|v| v.as_array())
        .ok_or_else(|| load_err(path, format!("record {row}: missing or invalid '{col}' array")))?;

    arr.iter()
        .enumerate()
        .map(|(j, v)| match v {
            JsonValue::Null => Ok(f64::NAN),
            _ => v
                .as_f64()
                .ok_or_else(|| load_err(path, format!("record {row}, {col}[{j}]: not a number"))),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// CSV layout: header row, then one row per sample.
/// Columns `wavelength` and `flux` are required, plus `ivar` or `snr`.
fn load_csv(path: &Path) -> Result<RawSpectrum> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_ascii_lowercase())
        .collect();
    let column = |name: &str| headers.iter().position(|h| h == name);

    let wl_idx = column("wavelength").ok_or_else(|| load_err(path, "CSV missing 'wavelength' column"))?;
    let flux_idx = column("flux").ok_or_else(|| load_err(path, "CSV missing 'flux' column"))?;
    let ivar_idx = column("ivar");
    let snr_idx = column("snr");
    if ivar_idx.is_none() && snr_idx.is_none() {
        return Err(load_err(path, "CSV needs an 'ivar' or 'snr' column"));
    }

    let mut wavelength = Vec::new();
    let mut flux = Vec::new();
    let mut ivar = Vec::new();
    let mut snr = None;
    for (row_no, result) in reader.records().enumerate() {
        let record = result?;
        let field = |idx: usize, name: &str| -> Result<f64> {
            let tok = record.get(idx).unwrap_or("").trim();
            if tok.is_empty() || tok.eq_ignore_ascii_case("nan") {
                return Ok(f64::NAN);
            }
            tok.parse::<f64>()
                .map_err(|_| load_err(path, format!("row {row_no}, {name}: '{tok}' is not a number")))
        };
        wavelength.push(field(wl_idx, "wavelength")?);
        flux.push(field(flux_idx, "flux")?);
        if let Some(idx) = ivar_idx {
            ivar.push(field(idx, "ivar")?);
        } else if let (Some(idx), None) = (snr_idx, snr) {
            snr = Some(field(idx, "snr")?);
        }
    }

    let target = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_string();
    let noise = match snr {
        Some(snr) if ivar_idx.is_none() => Noise::Snr(snr),
        _ => Noise::Ivar(ivar),
    };
    build_spectrum(path, target, wavelength, flux, noise)
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load a Parquet file with one spectrum per row.
///
/// Expected schema:
/// - `target`: Utf8 or LargeUtf8
/// - `wavelength`, `flux`: List<Float64> or LargeList<Float64> (Float32 accepted)
/// - `ivar`: same list type, or `snr`: Float64 / Float32 / Int
fn load_parquet(path: &Path) -> Result<Vec<RawSpectrum>> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut spectra = Vec::new();
    for batch_result in reader {
        let batch = batch_result?;
        let schema = batch.schema();
        let index = |name: &str| schema.index_of(name).ok();

        let target_idx = index("target").ok_or_else(|| load_err(path, "missing 'target' column"))?;
        let wl_idx = index("wavelength").ok_or_else(|| load_err(path, "missing 'wavelength' column"))?;
        let flux_idx = index("flux").ok_or_else(|| load_err(path, "missing 'flux' column"))?;
        let ivar_idx = index("ivar");
        let snr_idx = index("snr");

        for row in 0..batch.num_rows() {
            let target = extract_string(batch.column(target_idx), row)
                .ok_or_else(|| load_err(path, format!("row {row}: null or non-string target")))?;
            let wavelength = extract_f64_list(batch.column(wl_idx), row)
                .map_err(|e| load_err(path, format!("row {row}, wavelength: {e}")))?;
            let flux = extract_f64_list(batch.column(flux_idx), row)
                .map_err(|e| load_err(path, format!("row {row}, flux: {e}")))?;
            let noise = match (ivar_idx, snr_idx) {
                (Some(idx), _) => Noise::Ivar(
                    extract_f64_list(batch.column(idx), row)
                        .map_err(|e| load_err(path, format!("row {row}, ivar: {e}")))?,
                ),
                (None, Some(idx)) => Noise::Snr(
                    extract_f64(batch.column(idx), row)
                        .ok_or_else(|| load_err(path, format!("row {row}: unreadable snr")))?,
                ),
                (None, None) => return Err(load_err(path, "needs an 'ivar' or 'snr' column")),
            };
            spectra.push(build_spectrum(path, target, wavelength, flux, noise)?);
        }
    }
    Ok(spectra)
}

// -- Parquet / Arrow helpers --

/// Extract a `Vec<f64>` from a List or LargeList column at the given row.
/// Null entries read as NaN.
pub(crate) fn extract_f64_list(col: &Arc<dyn Array>, row: usize) -> std::result::Result<Vec<f64>, String> {
    if col.is_null(row) {
        return Err("null value in list column".into());
    }

    let values_array = match col.data_type() {
        DataType::List(_) => col
            .as_any()
            .downcast_ref::<ListArray>()
            .ok_or("expected ListArray")?
            .value(row),
        DataType::LargeList(_) => col
            .as_any()
            .downcast_ref::<LargeListArray>()
            .ok_or("expected LargeListArray")?
            .value(row),
        other => return Err(format!("expected List or LargeList column, got {other:?}")),
    };

    if let Some(f64_arr) = values_array.as_any().downcast_ref::<Float64Array>() {
        Ok(f64_arr.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    } else if let Some(f32_arr) = values_array.as_any().downcast_ref::<Float32Array>() {
        Ok(f32_arr.iter().map(|v| v.unwrap_or(f32::NAN) as f64).collect())
    } else {
        Err(format!(
            "list inner type is {:?}, expected Float64 or Float32",
            values_array.data_type()
        ))
    }
}

/// A string cell, or `None` if null or not a string column.
pub(crate) fn extract_string(col: &Arc<dyn Array>, row: usize) -> Option<String> {
    if col.is_null(row) {
        return None;
    }
    match col.data_type() {
        DataType::Utf8 => Some(col.as_string::<i32>().value(row).to_string()),
        DataType::LargeUtf8 => Some(col.as_string::<i64>().value(row).to_string()),
        _ => None,
    }
}

/// A numeric cell as `f64`.
fn extract_f64(col: &Arc<dyn Array>, row: usize) -> Option<f64> {
    if col.is_null(row) {
        return None;
    }
    match col.data_type() {
        DataType::Float64 => col.as_any().downcast_ref::<Float64Array>().map(|a| a.value(row)),
        DataType::Float32 => col
            .as_any()
            .downcast_ref::<Float32Array>()
            .map(|a| a.value(row) as f64),
        DataType::Int64 => col.as_any().downcast_ref::<Int64Array>().map(|a| a.value(row) as f64),
        DataType::Int32 => col.as_any().downcast_ref::<Int32Array>().map(|a| a.value(row) as f64),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// collate – a file or a directory of files → Dataset
// ---------------------------------------------------------------------------

/// Gather spectra from `target`, either a single supported file or every
/// supported file of a directory (sorted by name). Any load failure aborts
/// the whole collation.
pub fn collate(target: &Path, loader: &dyn SpectrumLoader, progress: &Progress) -> Result<Dataset> {
    if !target.exists() {
        return Err(Error::Input(format!("target '{}' does not exist", target.display())));
    }

    let files: Vec<PathBuf> = if target.is_dir() {
        let mut files = std::fs::read_dir(target)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()?;
        files.retain(|p| p.is_file() && loader.supports(p));
        files.sort();
        if files.is_empty() {
            return Err(Error::Input(format!(
                "directory '{}' holds no supported spectrum files",
                target.display()
            )));
        }
        files
    } else {
        if !loader.supports(target) {
            return Err(Error::Input(format!(
                "target '{}' is not a directory or a supported spectrum file",
                target.display()
            )));
        }
        vec![target.to_path_buf()]
    };

    info!("collating {} files from {}", files.len(), target.display());
    let counter = StageCounter::new(Stage::Load, files.len(), progress);
    let per_file: Vec<Vec<RawSpectrum>> = files
        .par_iter()
        .map(|path| {
            let out = loader.load(path);
            counter.tick();
            out
        })
        .collect::<Result<_>>()?;

    Dataset::from_spectra(per_file.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snr_noise_model_masks_bad_pixels() {
        let flux = [100.0, 400.0, 0.0, f64::NAN, -4.0, 100.0];
        let ivar = ivar_from_snr(Path::new("x"), &flux, 50.0).unwrap();
        // median sqrt(flux) over finite roots [10, 20, 0, 10] = 10 → scale 5
        // std = sqrt(f) / 5 → ivar = 25 / f
        assert!((ivar[0] - 0.25).abs() < 1e-12);
        assert!((ivar[1] - 0.0625).abs() < 1e-12);
        assert_eq!(&ivar[2..5], &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn zero_median_flux_is_a_data_error() {
        let err = ivar_from_snr(Path::new("x"), &[0.0, 0.0, 0.0], 50.0).unwrap_err();
        assert!(matches!(err, Error::Data { .. }));
    }

    #[test]
    fn json_accepts_object_or_array() {
        let dir = tempfile::tempdir().unwrap();
        let one = dir.path().join("one.json");
        std::fs::write(
            &one,
            r#"{"target": "HD1", "wavelength": [1, 2, 3], "flux": [1, 1, 1], "ivar": [1, 0, 1]}"#,
        )
        .unwrap();
        let many = dir.path().join("many.json");
        std::fs::write(
            &many,
            r#"[{"target": "A", "wavelength": [1, 2], "flux": [4, 9], "snr": 10},
                {"target": "B", "wavelength": [1, 2], "flux": [1, null], "ivar": [1, 1]}]"#,
        )
        .unwrap();

        let loader = TableSpectrumLoader;
        let s = loader.load(&one).unwrap();
        assert_eq!(s[0].target, "HD1");
        assert_eq!(s[0].ivar, vec![1.0, 0.0, 1.0]);

        let s = loader.load(&many).unwrap();
        assert_eq!(s.len(), 2);
        assert!(s[0].ivar.iter().all(|&v| v > 0.0));
        assert!(s[1].flux[1].is_nan());
    }

    #[test]
    fn csv_target_comes_from_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("HD5678_obs2.csv");
        std::fs::write(&path, "wavelength,flux,ivar\n4000.0,1.5,2\n4000.5,1.25,2\n4001.0,nan,0\n").unwrap();

        let s = TableSpectrumLoader.load(&path).unwrap();
        assert_eq!(s[0].target, "HD5678_obs2");
        assert_eq!(s[0].wavelength, vec![4000.0, 4000.5, 4001.0]);
        assert!(s[0].flux[2].is_nan());
    }

    #[test]
    fn decreasing_wavelength_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "wavelength,flux,ivar\n2,1,1\n1,1,1\n").unwrap();
        assert!(matches!(TableSpectrumLoader.load(&path), Err(Error::Load { .. })));
    }

    #[test]
    fn collate_rejects_missing_and_unsupported_targets() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            collate(&missing, &TableSpectrumLoader, &Progress::none()),
            Err(Error::Input(_))
        ));

        let txt = dir.path().join("notes.txt");
        std::fs::write(&txt, "hello").unwrap();
        assert!(matches!(
            collate(&txt, &TableSpectrumLoader, &Progress::none()),
            Err(Error::Input(_))
        ));
        // a directory with nothing loadable
        assert!(matches!(
            collate(dir.path(), &TableSpectrumLoader, &Progress::none()),
            Err(Error::Input(_))
        ));
    }

    #[test]
    fn collate_directory_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b", "a"] {
            std::fs::write(
                dir.path().join(format!("{name}.csv")),
                "wavelength,flux,ivar\n1,1,1\n2,1,1\n",
            )
            .unwrap();
        }
        let ds = collate(dir.path(), &TableSpectrumLoader, &Progress::none()).unwrap();
        assert_eq!(ds.targets(), &["a".to_string(), "b".to_string()]);
        assert!(ds.has_unified_wavelengths());
    }
}
