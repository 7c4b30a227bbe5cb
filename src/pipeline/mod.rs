/// Processing pipeline: raw dataset → training/inference-ready dataset.
///
/// Architecture:
/// ```text
///   Dataset (any grid)
///        │
///        ▼
///   ┌──────────┐
///   │ resample  │  interpolate onto params.wl, 0 outside coverage
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  align    │  cross-correlate line windows, shift by median z
///   └──────────┘
///        │
///        ▼
///   ┌────────────┐
///   │ downsample  │  bin by downsample_amount (barrier: all targets)
///   └────────────┘
///        │
///        ▼
///   ┌───────────┐
///   │ continuum  │  fit on bins, divide out at full resolution
///   └───────────┘
/// ```
pub mod align;
pub mod continuum;
pub mod downsample;
pub mod interp;
pub mod params;
pub mod progress;
pub mod resample;

use log::info;

use crate::data::model::{Dataset, WavelengthGrid};
use crate::error::{Error, Result};

use align::VelocityAligner;
use continuum::{ContinuumModel, ContinuumNormalizer, QuantileSinusoidContinuum};
use downsample::downsample_all;
use params::ProcessParams;
use progress::Progress;
use resample::resample;

/// A processed dataset plus what alignment did to it.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub dataset: Dataset,
    /// Velocity shift applied to each target of `dataset`.
    pub shifts: Vec<f64>,
    /// Targets dropped because they could not be aligned.
    pub excluded: Vec<String>,
}

/// Run the full pipeline with the continuum model described by
/// `params.continuum`.
pub fn process(dataset: &Dataset, params: &ProcessParams, progress: &Progress) -> Result<ProcessOutput> {
    let model = QuantileSinusoidContinuum::new(params.continuum.clone());
    process_with_model(dataset, params, &model, progress)
}

/// Run the full pipeline with a caller-supplied continuum model.
pub fn process_with_model(
    dataset: &Dataset,
    params: &ProcessParams,
    model: &dyn ContinuumModel,
    progress: &Progress,
) -> Result<ProcessOutput> {
    params.validate()?;
    if dataset.is_empty() {
        return Err(Error::EmptyDataset);
    }
    let amount = params.downsample_amount;

    info!("resampling {} targets onto {} wavelengths", dataset.len(), params.wl.len());
    let resampled = resample(dataset, &params.wl, progress)?;

    info!("aligning against the reference spectrum");
    let aligned = VelocityAligner::new(params.alignment.clone()).align(
        &resampled,
        &params.reference_flux,
        progress,
    )?;
    let ds = &aligned.dataset;

    info!("downsampling by {amount}");
    let binned = downsample_all(&params.wl, ds.flux(), ds.ivar(), amount, progress)?;

    let normalized = ContinuumNormalizer::new(model).normalize(
        &params.wl,
        ds.flux(),
        ds.ivar(),
        &binned,
        &params.wl_ranges,
        amount,
        progress,
    )?;

    let kept: Vec<usize> = (0..ds.len()).collect();
    let dataset = ds.derive(
        &kept,
        WavelengthGrid::Unified(params.wl.clone()),
        normalized.flux,
        normalized.ivar,
    )?;
    info!(
        "processed {} targets ({} excluded)",
        dataset.len(),
        aligned.excluded.len()
    );
    Ok(ProcessOutput {
        dataset,
        shifts: aligned.shifts,
        excluded: aligned.excluded,
    })
}
