//! Integer-factor binning of wavelength, flux and inverse variance.
//!
//! When the length is not a multiple of the bin factor, the remainder is
//! dropped from the low-wavelength end so bins line up with the red edge.

use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::pipeline::progress::{Progress, Stage, StageCounter};

fn check_amount(amount: usize) -> Result<()> {
    if amount == 0 {
        return Err(Error::InvalidParameter("downsample amount must be positive".into()));
    }
    Ok(())
}

/// Bin centre wavelengths: the mean of each group of `amount` samples.
pub fn downsample_wavelength(wl: &[f64], amount: usize) -> Result<Vec<f64>> {
    check_amount(amount)?;
    let discard = wl.len() % amount;
    Ok(wl[discard..]
        .chunks_exact(amount)
        .map(|group| group.iter().sum::<f64>() / amount as f64)
        .collect())
}

/// Flux of one bin: ivar-weighted mean, or the plain mean if every weight is 0.
fn bin_flux(flux: &[f64], ivar: &[f64]) -> f64 {
    let weight: f64 = ivar.iter().sum();
    if weight == 0.0 {
        return flux.iter().sum::<f64>() / flux.len() as f64;
    }
    flux.iter().zip(ivar).map(|(f, w)| f * w).sum::<f64>() / weight
}

/// Bin one spectrum. Flux is ivar-weighted; ivar combines as `sqrt(Σ ivar²)`.
pub fn downsample_spectrum(flux: &[f64], ivar: &[f64], amount: usize) -> Result<(Vec<f64>, Vec<f64>)> {
    check_amount(amount)?;
    if flux.len() != ivar.len() {
        return Err(Error::ShapeMismatch(format!(
            "flux has {} samples, ivar {}",
            flux.len(),
            ivar.len()
        )));
    }
    let discard = flux.len() % amount;
    let (flux, ivar) = (&flux[discard..], &ivar[discard..]);

    let binned_ivar = ivar
        .chunks_exact(amount)
        .map(|group| group.iter().map(|w| w * w).sum::<f64>().sqrt())
        .collect();
    let binned_flux = flux
        .chunks_exact(amount)
        .zip(ivar.chunks_exact(amount))
        .map(|(f, w)| bin_flux(f, w))
        .collect();
    Ok((binned_flux, binned_ivar))
}

/// Binned wavelength plus binned flux and ivar for every target.
#[derive(Debug, Clone, PartialEq)]
pub struct Downsampled {
    pub wavelength: Vec<f64>,
    pub flux: Vec<Vec<f64>>,
    pub ivar: Vec<Vec<f64>>,
}

/// Bin every spectrum on a shared grid.
pub fn downsample_all(
    wl: &[f64],
    flux: &[Vec<f64>],
    ivar: &[Vec<f64>],
    amount: usize,
    progress: &Progress,
) -> Result<Downsampled> {
    let wavelength = downsample_wavelength(wl, amount)?;
    let counter = StageCounter::new(Stage::Downsample, flux.len(), progress);
    let binned: Vec<(Vec<f64>, Vec<f64>)> = flux
        .par_iter()
        .zip(ivar.par_iter())
        .map(|(f, v)| {
            let out = downsample_spectrum(f, v, amount);
            counter.tick();
            out
        })
        .collect::<Result<_>>()?;
    let (flux, ivar): (Vec<Vec<f64>>, Vec<Vec<f64>>) = binned.into_iter().unzip();
    Ok(Downsampled {
        wavelength,
        flux,
        ivar,
    })
}
