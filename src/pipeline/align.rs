//! Radial-velocity alignment by cross-correlation against a template.
//!
//! For every reference line a window of `±half_width` Å is cut from both the
//! candidate and the template, mean-subtracted and fully cross-correlated.
//! The lag of the correlation peak becomes a fractional shift per line; the
//! median over lines is applied by re-interpolating at `wl * (1 + z)`.

use log::{debug, warn};
use rayon::prelude::*;

use crate::data::model::{Dataset, WavelengthGrid};
use crate::error::{Error, Result};
use crate::pipeline::interp::{interp, Fill};
use crate::pipeline::params::AlignmentConfig;
use crate::pipeline::progress::{Progress, Stage, StageCounter};

/// A spectrum after velocity correction.
#[derive(Debug, Clone, PartialEq)]
pub struct Alignment {
    pub flux: Vec<f64>,
    pub ivar: Vec<f64>,
    /// Applied shift.
    pub z: f64,
    /// Lines that contributed to the median.
    pub lines_used: usize,
}

/// Index of wavelength `w` on a uniform grid, truncated toward zero.
fn wl_to_idx(w: f64, wl: &[f64]) -> isize {
    ((w - wl[0]) / (wl[1] - wl[0])) as isize
}

/// Full discrete cross-correlation: `out[j] = Σ_n a[n + j - (v.len() - 1)] · v[n]`
/// for `j` in `0..a.len() + v.len() - 1`.
pub fn cross_correlate(a: &[f64], v: &[f64]) -> Vec<f64> {
    if a.is_empty() || v.is_empty() {
        return Vec::new();
    }
    let offset = v.len() as isize - 1;
    (0..a.len() + v.len() - 1)
        .map(|j| {
            let shift = j as isize - offset;
            // n ranges over indices where both a[n + shift] and v[n] exist
            let n_lo = (-shift).max(0) as usize;
            let n_hi = (a.len() as isize - shift).min(v.len() as isize).max(0) as usize;
            (n_lo..n_hi)
                .map(|n| a[(n as isize + shift) as usize] * v[n])
                .sum()
        })
        .collect()
}

/// Median; the mean of the two middle values for an even count.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        0.5 * (sorted[mid - 1] + sorted[mid])
    } else {
        sorted[mid]
    })
}

fn centered(window: &[f64]) -> Vec<f64> {
    let mean = window.iter().sum::<f64>() / window.len() as f64;
    window.iter().map(|v| v - mean).collect()
}

/// Shift estimate from one line window, or `None` when the window carries
/// no usable signal (non-finite samples, flat flux, or no coverage).
fn line_shift(
    flux: &[f64],
    ivar: &[f64],
    template: &[f64],
    line: f64,
    pixel_scale: f64,
) -> Option<f64> {
    if flux.iter().chain(template).any(|v| !v.is_finite()) {
        return None;
    }
    if ivar.iter().all(|&w| w == 0.0) {
        return None;
    }
    let a = centered(flux);
    let v = centered(template);
    if a.iter().all(|&x| x == 0.0) || v.iter().all(|&x| x == 0.0) {
        return None;
    }

    let corr = cross_correlate(&a, &v);
    // First maximum, like argmax.
    let (peak, _) = corr
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(bi, bv), (i, &c)| if c > bv { (i, c) } else { (bi, bv) });
    let lag = peak as f64 - flux.len() as f64;
    Some(lag * pixel_scale / line)
}

/// Estimate and remove the velocity shift of one spectrum on the unified
/// grid `wl` against `template` (same grid).
///
/// Line windows that start before the grid, end past it, hold fewer than two
/// samples or carry no signal are skipped. With no usable line at all the
/// target is reported as [`Error::AlignmentDegeneracy`].
pub fn align_spectrum(
    target: &str,
    wl: &[f64],
    flux: &[f64],
    ivar: &[f64],
    template: &[f64],
    config: &AlignmentConfig,
) -> Result<Alignment> {
    let n = wl.len();
    if flux.len() != n || ivar.len() != n || template.len() != n {
        return Err(Error::ShapeMismatch(format!(
            "target '{target}': grid {n}, flux {}, ivar {}, template {}",
            flux.len(),
            ivar.len(),
            template.len()
        )));
    }
    if n < 2 {
        return Err(Error::AlignmentDegeneracy {
            target: target.to_string(),
            lines_checked: 0,
        });
    }

    let mut shifts = Vec::with_capacity(config.lines.len());
    for &line in &config.lines {
        let lo = wl_to_idx(line - config.half_width, wl);
        let hi = wl_to_idx(line + config.half_width, wl);
        if lo < 0 || hi > n as isize || hi - lo < 2 {
            debug!("{target}: line {line} window [{lo}, {hi}) outside grid, skipped");
            continue;
        }
        let (lo, hi) = (lo as usize, hi as usize);
        match line_shift(&flux[lo..hi], &ivar[lo..hi], &template[lo..hi], line, config.pixel_scale) {
            Some(z) => shifts.push(z),
            None => debug!("{target}: line {line} has no usable signal, skipped"),
        }
    }

    let Some(z) = median(&shifts) else {
        return Err(Error::AlignmentDegeneracy {
            target: target.to_string(),
            lines_checked: config.lines.len(),
        });
    };

    let query: Vec<f64> = wl.iter().map(|w| w * (1.0 + z)).collect();
    Ok(Alignment {
        flux: interp(&query, wl, flux, Fill::Value(0.0)),
        ivar: interp(&query, wl, ivar, Fill::Value(0.0)),
        z,
        lines_used: shifts.len(),
    })
}

// ---------------------------------------------------------------------------
// Dataset-level aligner
// ---------------------------------------------------------------------------

/// Result of aligning a whole dataset.
#[derive(Debug, Clone)]
pub struct AlignmentOutcome {
    /// Surviving targets, velocity corrected.
    pub dataset: Dataset,
    /// Applied shift per surviving target.
    pub shifts: Vec<f64>,
    /// Targets dropped because no line could be correlated.
    pub excluded: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct VelocityAligner {
    config: AlignmentConfig,
}

impl VelocityAligner {
    pub fn new(config: AlignmentConfig) -> Self {
        Self { config }
    }

    /// Align every target against `reference_flux`. Requires a unified grid.
    ///
    /// A target with no usable line is dropped and listed in
    /// [`AlignmentOutcome::excluded`]; the others are unaffected.
    pub fn align(
        &self,
        dataset: &Dataset,
        reference_flux: &[f64],
        progress: &Progress,
    ) -> Result<AlignmentOutcome> {
        let wl = dataset.wavelength().as_unified().ok_or(Error::GridNotUnified)?;
        if reference_flux.len() != wl.len() {
            return Err(Error::ShapeMismatch(format!(
                "reference flux has {} values but the grid has {}",
                reference_flux.len(),
                wl.len()
            )));
        }

        let counter = StageCounter::new(Stage::Align, dataset.len(), progress);
        let results: Vec<Result<Alignment>> = (0..dataset.len())
            .into_par_iter()
            .map(|i| {
                let out = align_spectrum(
                    &dataset.targets()[i],
                    wl,
                    &dataset.flux()[i],
                    &dataset.ivar()[i],
                    reference_flux,
                    &self.config,
                );
                counter.tick();
                out
            })
            .collect();

        let mut kept = Vec::with_capacity(results.len());
        let mut flux = Vec::with_capacity(results.len());
        let mut ivar = Vec::with_capacity(results.len());
        let mut shifts = Vec::with_capacity(results.len());
        let mut excluded = Vec::new();
        for (i, result) in results.into_iter().enumerate() {
            match result {
                Ok(a) => {
                    debug!(
                        "{}: z = {:.3e} from {} lines",
                        dataset.targets()[i],
                        a.z,
                        a.lines_used
                    );
                    kept.push(i);
                    flux.push(a.flux);
                    ivar.push(a.ivar);
                    shifts.push(a.z);
                }
                Err(err @ Error::AlignmentDegeneracy { .. }) => {
                    warn!("excluding target: {err}");
                    excluded.push(dataset.targets()[i].clone());
                }
                Err(err) => return Err(err),
            }
        }
        if kept.is_empty() && !dataset.is_empty() {
            return Err(Error::EmptyDataset);
        }

        let dataset = dataset.derive(&kept, WavelengthGrid::Unified(wl.to_vec()), flux, ivar)?;
        Ok(AlignmentOutcome {
            dataset,
            shifts,
            excluded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gauss(x: f64, mu: f64, sigma: f64) -> f64 {
        (-(x - mu).powi(2) / (2.0 * sigma * sigma)).exp()
    }

    /// Continuum of 1 with a few asymmetric absorption features per line.
    fn template(wl: &[f64], lines: &[f64]) -> Vec<f64> {
        wl.iter()
            .map(|&w| {
                let depth: f64 = lines
                    .iter()
                    .map(|&c| 0.6 * gauss(w, c - 7.0, 1.5) + 0.3 * gauss(w, c + 4.0, 1.0))
                    .sum();
                1.0 - depth
            })
            .collect()
    }

    fn config(step: f64) -> AlignmentConfig {
        AlignmentConfig {
            pixel_scale: step,
            ..AlignmentConfig::default()
        }
    }

    #[test]
    fn cross_correlation_matches_definition() {
        let out = cross_correlate(&[1.0, 2.0, 3.0], &[0.0, 1.0, 0.5]);
        assert_eq!(out, vec![0.5, 2.0, 3.5, 3.0, 0.0]);
    }

    #[test]
    fn median_of_even_count_averages_middle() {
        assert_eq!(median(&[3.0, 1.0, 4.0, 2.0]), Some(2.5));
        assert_eq!(median(&[5.0, 1.0, 3.0]), Some(3.0));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn recovers_synthetic_shift() {
        let step = 0.5;
        let wl: Vec<f64> = (0..3800).map(|i| 3900.0 + step * i as f64).collect();
        let cfg = config(step);
        let reference = template(&wl, &cfg.lines);

        let z0 = 1.0e-3;
        let query: Vec<f64> = wl.iter().map(|w| w * (1.0 + z0)).collect();
        let shifted = interp(&query, &wl, &reference, Fill::Value(0.0));
        let ivar = vec![1.0; wl.len()];

        let out = align_spectrum("synthetic", &wl, &shifted, &ivar, &reference, &cfg).unwrap();
        assert_eq!(out.lines_used, 18);
        assert!((out.z + z0).abs() < 2.5e-4, "z = {}", out.z);
    }

    #[test]
    fn default_config_on_harps_sampling() {
        // 0.01 Å sampling around the 4100 Å line only.
        let wl: Vec<f64> = (0..15_001).map(|i| 3990.0 + 0.01 * i as f64).collect();
        let cfg = AlignmentConfig::default();
        assert_eq!(cfg.pixel_scale, 0.01);
        let reference = template(&wl, &cfg.lines);

        let z0 = 1.0e-5;
        let query: Vec<f64> = wl.iter().map(|w| w * (1.0 + z0)).collect();
        let shifted = interp(&query, &wl, &reference, Fill::Value(0.0));
        let ivar = vec![1.0; wl.len()];

        let out = align_spectrum("harps", &wl, &shifted, &ivar, &reference, &cfg).unwrap();
        assert_eq!(out.lines_used, 1);
        // One lag step is 0.01 / 4100 in z.
        assert!((out.z + z0).abs() < 5e-6, "z = {}", out.z);
    }

    #[test]
    fn windows_outside_grid_are_skipped() {
        let step = 0.5;
        let wl: Vec<f64> = (0..2000).map(|i| 4450.0 + step * i as f64).collect();
        let cfg = config(step);
        let reference = template(&wl, &cfg.lines);
        let ivar = vec![1.0; wl.len()];

        let out = align_spectrum("t", &wl, &reference, &ivar, &reference, &cfg).unwrap();
        // Only 4500 .. 5400 have complete windows on [4450, 5449.5].
        assert_eq!(out.lines_used, 10);
    }

    #[test]
    fn no_usable_line_is_a_degeneracy() {
        let wl: Vec<f64> = (0..100).map(|i| 7000.0 + i as f64).collect();
        let flux = vec![1.0; wl.len()];
        let err = align_spectrum("far", &wl, &flux, &flux, &flux, &config(1.0)).unwrap_err();
        assert!(matches!(err, Error::AlignmentDegeneracy { lines_checked: 18, .. }));
    }

    #[test]
    fn degenerate_target_is_excluded_others_kept() {
        let step = 0.5;
        let wl: Vec<f64> = (0..3800).map(|i| 3900.0 + step * i as f64).collect();
        let cfg = config(step);
        let reference = template(&wl, &cfg.lines);
        let ds = Dataset::new(
            vec!["good".into(), "blank".into()],
            WavelengthGrid::Unified(wl.clone()),
            vec![reference.clone(), vec![0.0; wl.len()]],
            vec![vec![1.0; wl.len()], vec![0.0; wl.len()]],
        )
        .unwrap();

        let out = VelocityAligner::new(cfg)
            .align(&ds, &reference, &Progress::none())
            .unwrap();
        assert_eq!(out.dataset.targets(), &["good".to_string()]);
        assert_eq!(out.excluded, vec!["blank".to_string()]);
        assert_eq!(out.shifts.len(), 1);
    }

    #[test]
    fn per_target_grid_is_rejected() {
        let ds = Dataset::new(
            vec!["a".into()],
            WavelengthGrid::PerTarget(vec![vec![1.0, 2.0]]),
            vec![vec![1.0, 1.0]],
            vec![vec![1.0, 1.0]],
        )
        .unwrap();
        let err = VelocityAligner::default()
            .align(&ds, &[1.0, 1.0], &Progress::none())
            .unwrap_err();
        assert!(matches!(err, Error::GridNotUnified));
    }
}
