use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Builder, ListBuilder, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use log::info;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;

use super::loader::{extract_f64_list, extract_string};
use super::model::{Dataset, WavelengthGrid};
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Dataset ↔ Parquet
// ---------------------------------------------------------------------------
//
// One row per target:
//   target      Utf8
//   wavelength  List<Float64>
//   flux        List<Float64>
//   ivar        List<Float64>
//   labels      List<Float64>, null when the dataset is unlabeled
//
// Schema metadata carries what rows alone cannot express:
//   harpspec.grid         "unified" | "per_target"
//   harpspec.wavelength   JSON array, the shared axis of a unified grid
//   harpspec.labeled      "true" | "false"
//   harpspec.label_names  JSON array of strings (absent when unnamed)

const META_GRID: &str = "harpspec.grid";
const META_WAVELENGTH: &str = "harpspec.wavelength";
const META_LABELED: &str = "harpspec.labeled";
const META_LABEL_NAMES: &str = "harpspec.label_names";

fn list_field(name: &str, nullable: bool) -> Field {
    Field::new(
        name,
        DataType::List(Arc::new(Field::new("item", DataType::Float64, true))),
        nullable,
    )
}

fn list_array<'a>(rows: impl Iterator<Item = Option<&'a [f64]>>) -> ArrayRef {
    let mut builder = ListBuilder::new(Float64Builder::new());
    for row in rows {
        match row {
            Some(values) => {
                builder.values().append_slice(values);
                builder.append(true);
            }
            None => builder.append(false),
        }
    }
    Arc::new(builder.finish())
}

/// Write `dataset` to a Parquet file at `path`, replacing any existing file.
pub fn save_dataset(dataset: &Dataset, path: &Path) -> Result<()> {
    let mut metadata = HashMap::new();
    match dataset.wavelength().as_unified() {
        Some(wl) => {
            metadata.insert(META_GRID.to_string(), "unified".to_string());
            metadata.insert(META_WAVELENGTH.to_string(), serde_json::to_string(wl)?);
        }
        None => {
            metadata.insert(META_GRID.to_string(), "per_target".to_string());
        }
    }
    metadata.insert(META_LABELED.to_string(), dataset.has_labels().to_string());
    if let Some(names) = dataset.label_names() {
        metadata.insert(META_LABEL_NAMES.to_string(), serde_json::to_string(names)?);
    }

    let schema = Arc::new(
        Schema::new(vec![
            Field::new("target", DataType::Utf8, false),
            list_field("wavelength", false),
            list_field("flux", false),
            list_field("ivar", false),
            list_field("labels", true),
        ])
        .with_metadata(metadata),
    );

    let n = dataset.len();
    let targets = StringArray::from(dataset.targets().iter().map(String::as_str).collect::<Vec<_>>());
    let wavelength = list_array((0..n).map(|i| Some(dataset.wavelength().for_target(i))));
    let flux = list_array(dataset.flux().iter().map(|r| Some(r.as_slice())));
    let ivar = list_array(dataset.ivar().iter().map(|r| Some(r.as_slice())));
    let labels = match dataset.labels() {
        Some(labels) => list_array(labels.iter().map(|r| Some(r.as_slice()))),
        None => list_array((0..n).map(|_| None)),
    };

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![Arc::new(targets), wavelength, flux, ivar, labels],
    )?;

    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;
    info!("wrote {n} targets to {}", path.display());
    Ok(())
}

/// Read a dataset written by [`save_dataset`].
pub fn load_dataset(path: &Path) -> Result<Dataset> {
    if !path.is_file() {
        return Err(Error::Input(format!("dataset '{}' does not exist", path.display())));
    }
    let load_err = |reason: String| Error::Load {
        path: PathBuf::from(path),
        reason,
    };

    let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?;
    let metadata = builder.schema().metadata().clone();
    let unified = match metadata.get(META_GRID).map(String::as_str) {
        Some("unified") => true,
        Some("per_target") => false,
        other => return Err(load_err(format!("missing or unknown grid marker {other:?}"))),
    };
    let shared_wl: Option<Vec<f64>> = metadata
        .get(META_WAVELENGTH)
        .map(|json| serde_json::from_str(json))
        .transpose()?;
    let labeled = metadata.get(META_LABELED).map(String::as_str) == Some("true");
    let label_names: Option<Vec<String>> = metadata
        .get(META_LABEL_NAMES)
        .map(|json| serde_json::from_str(json))
        .transpose()?;

    let mut targets = Vec::new();
    let mut wls = Vec::new();
    let mut flux = Vec::new();
    let mut ivar = Vec::new();
    let mut labels = Vec::new();
    for batch in builder.build()? {
        let batch = batch?;
        let column = |name: &str| {
            batch
                .column_by_name(name)
                .ok_or_else(|| load_err(format!("missing '{name}' column")))
        };
        let (t_col, wl_col, f_col, v_col, l_col) = (
            column("target")?,
            column("wavelength")?,
            column("flux")?,
            column("ivar")?,
            column("labels")?,
        );

        for row in 0..batch.num_rows() {
            let list = |col: &ArrayRef, name: &str| {
                extract_f64_list(col, row).map_err(|e| load_err(format!("row {row}, {name}: {e}")))
            };
            targets.push(
                extract_string(t_col, row)
                    .ok_or_else(|| load_err(format!("row {row}: null target")))?,
            );
            wls.push(list(wl_col, "wavelength")?);
            flux.push(list(f_col, "flux")?);
            ivar.push(list(v_col, "ivar")?);
            if labeled {
                labels.push(list(l_col, "labels")?);
            }
        }
    }

    let wavelength = if unified {
        let shared = shared_wl
            .or_else(|| wls.first().cloned())
            .ok_or_else(|| load_err("unified grid without a stored wavelength axis".into()))?;
        if wls.iter().any(|wl| *wl != shared) {
            return Err(load_err("grid marked unified but rows differ".into()));
        }
        WavelengthGrid::Unified(shared)
    } else {
        WavelengthGrid::PerTarget(wls)
    };

    let mut dataset = Dataset::new(targets, wavelength, flux, ivar)?;
    if labeled {
        dataset = dataset.with_labels(labels, label_names)?;
    } else if let Some(names) = label_names {
        dataset = dataset.with_label_names(names)?;
    }
    info!("read {} targets from {}", dataset.len(), path.display());
    Ok(dataset)
}
