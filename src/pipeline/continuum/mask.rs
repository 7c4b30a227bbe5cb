//! Selection of continuum pixels across the whole dataset.
//!
//! A pixel counts as continuum when, over all targets, its pseudo-normalized
//! flux has a median close to 1 and a small variance. Both cuts start at
//! `CUT_STEP` and widen in steps of `CUT_STEP` until the requested fraction of
//! pixels is selected.

use log::{info, warn};

const CUT_STEP: f64 = 1e-4;

/// Median ivar of a pixel that carries no information (1 / 200).
const SMALL: f64 = 1.0 / 200.0;

/// Median and population variance of one column, NaN if any entry is NaN.
fn column_stats(rows: &[Vec<f64>], j: usize) -> (f64, f64) {
    let mut column: Vec<f64> = rows.iter().map(|r| r[j]).collect();
    if column.is_empty() || column.iter().any(|v| v.is_nan()) {
        return (f64::NAN, f64::NAN);
    }
    let n = column.len() as f64;
    let mean = column.iter().sum::<f64>() / n;
    let var = column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    column.sort_by(|a, b| a.total_cmp(b));
    let mid = column.len() / 2;
    let median = if column.len() % 2 == 0 {
        0.5 * (column[mid - 1] + column[mid])
    } else {
        column[mid]
    };
    (median, var)
}

/// Continuum mask over the pixels of one region.
///
/// `flux` and `ivar` hold the pseudo-normalized region, one row per target.
pub fn continuum_mask(flux: &[Vec<f64>], ivar: &[Vec<f64>], target_fraction: f64) -> Vec<bool> {
    let npix = flux.first().map_or(0, Vec::len);

    // Pixels never usable: flagged ivar everywhere, or zero flux everywhere.
    let mut usable = 0usize;
    let mut thresholds = vec![f64::NAN; npix];
    for (j, threshold) in thresholds.iter_mut().enumerate() {
        let (ivar_median, ivar_var) = column_stats(ivar, j);
        if !(ivar_median == SMALL && ivar_var == 0.0) {
            usable += 1;
        }
        let (f_bar, sigma_f) = column_stats(flux, j);
        if f_bar == 0.0 && sigma_f == 0.0 {
            continue;
        }
        // Selected once both the flux cut and the variance cut reach this value.
        *threshold = (f_bar - 1.0).abs().max(sigma_f);
    }

    let mut sorted: Vec<f64> = thresholds.iter().copied().filter(|t| t.is_finite()).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));

    // Smallest count m with m / usable >= target_fraction.
    let needed = if usable == 0 {
        usize::MAX
    } else {
        let mut m = (target_fraction * usable as f64).floor() as usize;
        while (m as f64) / (usable as f64) < target_fraction {
            m += 1;
        }
        m.max(1)
    };

    let cut = if needed > sorted.len() {
        sorted.last().copied().unwrap_or(CUT_STEP).max(CUT_STEP)
    } else {
        let t = sorted[needed - 1];
        let mut k = ((t - CUT_STEP) / CUT_STEP).ceil().max(0.0);
        while CUT_STEP + k * CUT_STEP < t {
            k += 1.0;
        }
        CUT_STEP + k * CUT_STEP
    };

    let mask: Vec<bool> = thresholds.iter().map(|&t| t <= cut).collect();
    let selected = mask.iter().filter(|&&m| m).count();
    let fraction = if usable > 0 { selected as f64 / usable as f64 } else { 0.0 };
    info!("{selected} out of {usable} pixels identified as continuum (cut {cut:.4})");
    if fraction > 0.10 {
        warn!("over 10% of pixels identified as continuum");
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_use_population_variance() {
        let rows = vec![vec![1.0], vec![3.0]];
        assert_eq!(column_stats(&rows, 0), (2.0, 1.0));
    }

    #[test]
    fn flattest_pixels_are_selected_first() {
        // Ten pixels, two targets; pixel j deviates from 1 by j * 0.01.
        let flux: Vec<Vec<f64>> = (0..2)
            .map(|_| (0..10).map(|j| 1.0 + 0.01 * j as f64).collect())
            .collect();
        let ivar = vec![vec![1.0; 10]; 2];

        let mask = continuum_mask(&flux, &ivar, 0.3);
        assert_eq!(
            mask,
            vec![true, true, true, false, false, false, false, false, false, false]
        );
    }

    #[test]
    fn noisy_pixels_are_rejected_by_variance() {
        let flux = vec![vec![1.0, 1.0, 0.5, 1.0], vec![1.0, 1.0, 1.5, 1.0]];
        let ivar = vec![vec![1.0; 4]; 2];
        let mask = continuum_mask(&flux, &ivar, 0.5);
        assert_eq!(mask, vec![true, true, false, true]);
    }

    #[test]
    fn zero_flux_pixels_never_selected() {
        let flux = vec![vec![0.0, 1.0], vec![0.0, 1.0]];
        let ivar = vec![vec![0.0, 1.0]; 2];
        let mask = continuum_mask(&flux, &ivar, 1.0);
        assert_eq!(mask, vec![false, true]);
    }

    #[test]
    fn empty_region_gives_empty_mask() {
        assert!(continuum_mask(&[], &[], 0.07).is_empty());
    }
}
