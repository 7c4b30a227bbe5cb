use log::debug;
use rayon::prelude::*;

use crate::data::model::{Dataset, WavelengthGrid};
use crate::error::Result;
use crate::pipeline::interp::{interp, Fill};
use crate::pipeline::progress::{Progress, Stage, StageCounter};

/// Put every target on `new_wl` by linear interpolation of flux and ivar.
/// Query points outside a target's own range get flux 0 and ivar 0.
pub fn resample(dataset: &Dataset, new_wl: &[f64], progress: &Progress) -> Result<Dataset> {
    debug!(
        "resampling {} targets onto {} wavelengths",
        dataset.len(),
        new_wl.len()
    );
    let counter = StageCounter::new(Stage::Resample, dataset.len(), progress);

    let (flux, ivar): (Vec<Vec<f64>>, Vec<Vec<f64>>) = (0..dataset.len())
        .into_par_iter()
        .map(|i| {
            let wl = dataset.wavelength().for_target(i);
            let out = (
                interp(new_wl, wl, &dataset.flux()[i], Fill::Value(0.0)),
                interp(new_wl, wl, &dataset.ivar()[i], Fill::Value(0.0)),
            );
            counter.tick();
            out
        })
        .unzip();

    let kept: Vec<usize> = (0..dataset.len()).collect();
    dataset.derive(&kept, WavelengthGrid::Unified(new_wl.to_vec()), flux, ivar)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::RawSpectrum;

    fn dataset() -> Dataset {
        Dataset::from_spectra(vec![
            RawSpectrum {
                target: "a".into(),
                wavelength: vec![4000.0, 4001.0, 4002.0, 4003.0],
                flux: vec![1.0, 2.0, 3.0, 4.0],
                ivar: vec![10.0, 20.0, 30.0, 40.0],
            },
            RawSpectrum {
                target: "b".into(),
                wavelength: vec![4001.5, 4002.5],
                flux: vec![5.0, 7.0],
                ivar: vec![1.0, 3.0],
            },
        ])
        .unwrap()
    }

    #[test]
    fn outside_original_range_is_zero() {
        let out = resample(&dataset(), &[3999.0, 4001.0, 4004.0], &Progress::none()).unwrap();
        assert_eq!(out.flux()[0], vec![0.0, 2.0, 0.0]);
        assert_eq!(out.ivar()[0], vec![0.0, 20.0, 0.0]);
        assert_eq!(out.flux()[1], vec![0.0, 0.0, 0.0]);
        assert!(out.has_unified_wavelengths());
    }

    #[test]
    fn interpolates_between_samples() {
        let out = resample(&dataset(), &[4002.0], &Progress::none()).unwrap();
        assert!((out.flux()[1][0] - 6.0).abs() < 1e-12);
        assert!((out.ivar()[1][0] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn resampling_onto_same_grid_is_a_no_op() {
        let grid = vec![4000.0, 4000.5, 4001.0, 4001.5, 4002.0, 4002.5, 4003.0];
        let once = resample(&dataset(), &grid, &Progress::none()).unwrap();
        let twice = resample(&once, &grid, &Progress::none()).unwrap();
        assert_eq!(once, twice);
    }
}
