//! Continuum normalization.
//!
//! The continuum is fit on the downsampled spectra and lifted back to the
//! full-resolution grid:
//!
//! ```text
//!  downsampled flux/ivar ──► ContinuumModel::fit ──► cont (binned grid)
//!                                                      │
//!        dcont = dflux / (dflux / cont)  ◄─────────────┘
//!          │
//!          ▼  linear interpolation, clamped at the edges
//!  full-resolution flux / lifted dcont  ──►  non-finite samples zeroed
//! ```

pub mod fit;
pub mod mask;
pub mod quantile;

use std::ops::Range;

use log::info;
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::pipeline::downsample::Downsampled;
use crate::pipeline::interp::{interp, Fill};
use crate::pipeline::params::{ContinuumBasis, ContinuumConfig};
use crate::pipeline::progress::{Progress, Stage, StageCounter};

// ---------------------------------------------------------------------------
// ContinuumModel – the pluggable fitting step
// ---------------------------------------------------------------------------

/// Binned spectra handed to a continuum model.
#[derive(Debug, Clone, Copy)]
pub struct ContinuumInput<'a> {
    pub wavelength: &'a [f64],
    pub flux: &'a [Vec<f64>],
    pub ivar: &'a [Vec<f64>],
    /// Normalization regions as index ranges on `wavelength`.
    pub ranges: &'a [Range<usize>],
}

/// Estimates a smooth continuum for every target of a binned dataset.
///
/// Implementations see the whole dataset at once, since pixel selection may
/// depend on all targets. The returned matrix has the shape of `input.flux`;
/// 0 marks pixels without a continuum estimate.
pub trait ContinuumModel: Sync {
    fn fit(&self, input: &ContinuumInput<'_>) -> Result<Vec<Vec<f64>>>;
}

/// Running-quantile pseudo-continuum, dataset-wide continuum-pixel mask and a
/// sine/cosine least-squares fit per region.
#[derive(Debug, Clone, Default)]
pub struct QuantileSinusoidContinuum {
    config: ContinuumConfig,
}

impl QuantileSinusoidContinuum {
    pub fn new(config: ContinuumConfig) -> Self {
        Self { config }
    }
}

impl ContinuumModel for QuantileSinusoidContinuum {
    fn fit(&self, input: &ContinuumInput<'_>) -> Result<Vec<Vec<f64>>> {
        let cfg = &self.config;
        let npix = input.wavelength.len();
        let mut cont = vec![vec![0.0; npix]; input.flux.len()];

        for range in input.ranges {
            if range.end > npix || range.start > range.end {
                return Err(Error::InvalidParameter(format!(
                    "continuum region {range:?} outside {npix} pixels"
                )));
            }
            let wl = &input.wavelength[range.clone()];

            let (pseudo_flux, pseudo_ivar): (Vec<Vec<f64>>, Vec<Vec<f64>>) = input
                .flux
                .par_iter()
                .zip(input.ivar.par_iter())
                .map(|(f, v)| {
                    quantile::pseudo_normalize(
                        wl,
                        &f[range.clone()],
                        &v[range.clone()],
                        cfg.quantile,
                        cfg.delta_lambda,
                    )
                })
                .unzip();

            let contmask = mask::continuum_mask(&pseudo_flux, &pseudo_ivar, cfg.mask_fraction);

            let fits: Vec<Vec<f64>> = input
                .flux
                .par_iter()
                .zip(input.ivar.par_iter())
                .map(|(f, v)| match cfg.basis {
                    ContinuumBasis::Sinusoid => fit::fit_sinusoid(
                        &f[range.clone()],
                        &v[range.clone()],
                        &contmask,
                        cfg.degree,
                    ),
                })
                .collect();

            for (row, fitted) in cont.iter_mut().zip(fits) {
                row[range.clone()].copy_from_slice(&fitted);
            }
        }
        Ok(cont)
    }
}

// ---------------------------------------------------------------------------
// ContinuumNormalizer – orchestration around a model
// ---------------------------------------------------------------------------

/// Scale full-resolution `[start, stop)` index ranges to the binned grid,
/// truncating and clamping to `binned_len`.
pub fn binned_ranges(wl_ranges: &[[usize; 2]], amount: usize, binned_len: usize) -> Vec<Range<usize>> {
    wl_ranges
        .iter()
        .map(|&[start, stop]| {
            let start = (start / amount).min(binned_len);
            let stop = (stop / amount).min(binned_len);
            start..stop.max(start)
        })
        .collect()
}

/// Full-resolution spectra after continuum normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub flux: Vec<Vec<f64>>,
    pub ivar: Vec<Vec<f64>>,
}

pub struct ContinuumNormalizer<'m> {
    model: &'m dyn ContinuumModel,
}

impl<'m> ContinuumNormalizer<'m> {
    pub fn new(model: &'m dyn ContinuumModel) -> Self {
        Self { model }
    }

    /// Fit the continuum on `binned` and divide it out of the full-resolution
    /// `flux`/`ivar` on `wl`. Samples that end up non-finite are masked
    /// (flux 0, ivar 0).
    pub fn normalize(
        &self,
        wl: &[f64],
        flux: &[Vec<f64>],
        ivar: &[Vec<f64>],
        binned: &Downsampled,
        wl_ranges: &[[usize; 2]],
        amount: usize,
        progress: &Progress,
    ) -> Result<Normalized> {
        if binned.wavelength.is_empty() {
            return Err(Error::InvalidParameter(format!(
                "downsample amount {amount} leaves no bins on a grid of {}",
                wl.len()
            )));
        }
        let ranges = binned_ranges(wl_ranges, amount, binned.wavelength.len());
        info!(
            "fitting continuum of {} targets in {} regions",
            binned.flux.len(),
            ranges.len()
        );

        let cont = self.model.fit(&ContinuumInput {
            wavelength: &binned.wavelength,
            flux: &binned.flux,
            ivar: &binned.ivar,
            ranges: &ranges,
        })?;
        if cont.len() != binned.flux.len()
            || cont.iter().any(|row| row.len() != binned.wavelength.len())
        {
            return Err(Error::ShapeMismatch(
                "continuum model returned a matrix of the wrong shape".into(),
            ));
        }

        let counter = StageCounter::new(Stage::Continuum, flux.len(), progress);
        let (flux, ivar): (Vec<Vec<f64>>, Vec<Vec<f64>>) = (0..flux.len())
            .into_par_iter()
            .map(|i| {
                let out = normalize_one(
                    wl,
                    &flux[i],
                    &ivar[i],
                    &binned.wavelength,
                    &binned.flux[i],
                    &binned.ivar[i],
                    &cont[i],
                );
                counter.tick();
                out
            })
            .unzip();
        Ok(Normalized { flux, ivar })
    }
}

fn normalize_one(
    wl: &[f64],
    flux: &[f64],
    ivar: &[f64],
    dwl: &[f64],
    dflux: &[f64],
    divar: &[f64],
    cont: &[f64],
) -> (Vec<f64>, Vec<f64>) {
    // Continuum-normalized binned spectrum.
    let norm_flux: Vec<f64> = dflux
        .iter()
        .zip(cont)
        .map(|(&f, &c)| if c != 0.0 { f / c } else { 1.0 })
        .collect();
    let norm_ivar: Vec<f64> = divar.iter().zip(cont).map(|(&v, &c)| c * c * v).collect();

    // Binned correction factors, lifted to full resolution.
    let dcont_flux: Vec<f64> = dflux.iter().zip(&norm_flux).map(|(f, n)| f / n).collect();
    let dcont_ivar: Vec<f64> = divar.iter().zip(&norm_ivar).map(|(v, n)| v / n).collect();
    let cont_flux = interp(wl, dwl, &dcont_flux, Fill::Edge);
    let cont_ivar = interp(wl, dwl, &dcont_ivar, Fill::Edge);

    let mut out_flux: Vec<f64> = flux.iter().zip(&cont_flux).map(|(f, c)| f / c).collect();
    let mut out_ivar: Vec<f64> = ivar.iter().zip(&cont_ivar).map(|(v, c)| v / c).collect();
    for (f, v) in out_flux.iter_mut().zip(out_ivar.iter_mut()) {
        if !f.is_finite() || !v.is_finite() {
            *f = 0.0;
            *v = 0.0;
        }
    }
    (out_flux, out_ivar)
}
