// Integration tests for the full processing pipeline
use harpspec::pipeline::downsample::{downsample_all, downsample_wavelength};
use harpspec::{
    load_dataset, process, save_dataset, Dataset, ProcessParams, Progress, RawSpectrum, WavelengthGrid,
};

fn grid() -> Vec<f64> {
    (0..600).map(|i| 4000.0 + 10.0 * i as f64).collect()
}

/// Rest-frame absorption profile: a line every 100 Å.
fn profile(wl: f64) -> f64 {
    1.0 - (0..60)
        .map(|k| {
            let centre = 4020.0 + 100.0 * k as f64;
            0.4 * (-(wl - centre).powi(2) / (2.0 * 15.0 * 15.0)).exp()
        })
        .sum::<f64>()
}

fn spectrum(target: &str, wavelength: Vec<f64>, scale: f64, phase: f64) -> RawSpectrum {
    let flux: Vec<f64> = wavelength
        .iter()
        .map(|&w| scale * (1.0 + 0.1 * ((w - 4000.0) / 500.0 + phase).sin()) * profile(w))
        .collect();
    let ivar = flux.iter().map(|f| 1.0 / f).collect();
    RawSpectrum {
        target: target.to_string(),
        wavelength,
        flux,
        ivar,
    }
}

fn params() -> ProcessParams {
    let wl = grid();
    let reference = wl.iter().map(|&w| profile(w)).collect();
    ProcessParams::new(wl, reference, 5, vec![[0, 300], [300, 600]])
}

fn assert_finite(ds: &Dataset) {
    for row in ds.flux().iter().chain(ds.ivar()) {
        assert!(row.iter().all(|v| v.is_finite()), "non-finite sample in output");
    }
}

#[test]
fn three_spectra_keep_full_resolution() {
    let dataset = Dataset::from_spectra(vec![
        spectrum("HD1_a", grid(), 900.0, 0.0),
        spectrum("HD2_a", grid(), 1500.0, 0.7),
        spectrum("HD3_a", grid(), 1200.0, 1.9),
    ])
    .unwrap();

    let out = process(&dataset, &params(), &Progress::none()).unwrap();

    assert_eq!(out.dataset.len(), 3);
    assert!(out.excluded.is_empty());
    assert_eq!(out.shifts.len(), 3);
    assert_eq!(out.dataset.wavelength().as_unified().unwrap().len(), 600);
    assert!(out.dataset.flux().iter().all(|row| row.len() == 600));
    assert_finite(&out.dataset);

    // The continuum is fit on 600 / 5 bins.
    assert_eq!(downsample_wavelength(&grid(), 5).unwrap().len(), 120);
    let binned = downsample_all(
        &grid(),
        out.dataset.flux(),
        out.dataset.ivar(),
        5,
        &Progress::none(),
    )
    .unwrap();
    assert_eq!(binned.wavelength.len(), 120);
    assert!(binned.flux.iter().all(|row| row.len() == 120));
}

#[test]
fn per_target_grids_are_resampled_and_uncovered_targets_excluded() {
    let shifted: Vec<f64> = (0..700).map(|i| 3995.0 + 8.5 * i as f64).collect();
    let red_only: Vec<f64> = (0..300).map(|i| 7000.0 + 10.0 * i as f64).collect();
    let dataset = Dataset::from_spectra(vec![
        spectrum("HD1_a", grid(), 900.0, 0.0),
        spectrum("HD2_b", shifted, 1100.0, 0.3),
        spectrum("HD3_c", red_only, 1000.0, 0.5),
    ])
    .unwrap();
    assert!(!dataset.has_unified_wavelengths());

    let out = process(&dataset, &params(), &Progress::none()).unwrap();

    assert_eq!(out.excluded, vec!["HD3_c".to_string()]);
    assert_eq!(out.dataset.targets(), &["HD1_a".to_string(), "HD2_b".to_string()]);
    assert!(out.dataset.has_unified_wavelengths());
    assert_finite(&out.dataset);
}

#[test]
fn labels_survive_processing() {
    let dataset = Dataset::from_spectra(vec![
        spectrum("HD1_a", grid(), 900.0, 0.0),
        spectrum("HD2_a", grid(), 1500.0, 0.7),
    ])
    .unwrap()
    .with_labels(vec![vec![5700.0], vec![6100.0]], Some(vec!["teff".into()]))
    .unwrap();

    let out = process(&dataset, &params(), &Progress::none()).unwrap();
    assert_eq!(out.dataset.labels().unwrap(), &[vec![5700.0], vec![6100.0]]);
    assert_eq!(out.dataset.label_names().unwrap(), &["teff".to_string()]);
}

#[test]
fn processed_dataset_round_trips_through_parquet() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("processed.parquet");
    let dataset = Dataset::from_spectra(vec![
        spectrum("HD1_a", grid(), 900.0, 0.0),
        spectrum("HD2_a", grid(), 1500.0, 0.7),
    ])
    .unwrap();
    let out = process(&dataset, &params(), &Progress::none()).unwrap();

    save_dataset(&out.dataset, &path).unwrap();
    let back = load_dataset(&path).unwrap();
    assert_eq!(back, out.dataset);
    assert!(matches!(back.wavelength(), WavelengthGrid::Unified(wl) if wl.len() == 600));
}

#[test]
fn empty_dataset_is_rejected() {
    let empty = Dataset::from_spectra(vec![]).unwrap();
    assert!(matches!(
        process(&empty, &params(), &Progress::none()),
        Err(harpspec::Error::EmptyDataset)
    ));
}
