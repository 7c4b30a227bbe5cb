// End-to-end runs of the harpspec binary: collate → match → process → train → infer
use std::path::Path;
use std::process::Command;

use harpspec::{load_dataset, ProcessParams};

fn harpspec(args: &[&Path]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_harpspec"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run harpspec")
}

fn assert_success(out: &std::process::Output) {
    assert!(
        out.status.success(),
        "harpspec failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
}

fn grid() -> Vec<f64> {
    (0..600).map(|i| 4000.0 + 10.0 * i as f64).collect()
}

fn profile(wl: f64, depth: f64) -> f64 {
    1.0 - (0..60)
        .map(|k| {
            let centre = 4020.0 + 100.0 * k as f64;
            depth * (-(wl - centre).powi(2) / (2.0 * 15.0 * 15.0)).exp()
        })
        .sum::<f64>()
}

fn write_spectrum(dir: &Path, stem: &str, teff: f64) {
    let depth = 0.2 + 0.4 * (6000.0 - teff) / 1000.0;
    let mut text = String::from("wavelength,flux,ivar\n");
    for w in grid() {
        let flux = 1000.0 * (1.0 + 0.05 * ((w - 4000.0) / 800.0).sin()) * profile(w, depth);
        text.push_str(&format!("{w},{flux},{}\n", 1.0 / flux));
    }
    std::fs::write(dir.join(format!("{stem}.csv")), text).unwrap();
}

#[test]
fn full_command_chain() {
    let dir = tempfile::tempdir().unwrap();
    let raw = dir.path().join("raw");
    std::fs::create_dir(&raw).unwrap();
    let stars = [("HD100", 5200.0), ("HD200", 5500.0), ("HD300", 5800.0), ("HD400", 5350.0)];
    for (id, teff) in stars {
        write_spectrum(&raw, &format!("{id}_2014-09-16"), teff);
    }
    // An observation without labels, dropped by 'match'.
    write_spectrum(&raw, "HD999_2014-09-16", 5600.0);

    let labels = dir.path().join("labels.csv");
    let mut table = String::from("star,teff\n");
    for (id, teff) in stars {
        table.push_str(&format!("{id},{teff}\n"));
    }
    std::fs::write(&labels, table).unwrap();

    let params_path = dir.path().join("params.json");
    let wl = grid();
    let reference = wl.iter().map(|&w| profile(w, 0.4)).collect();
    ProcessParams::new(wl, reference, 5, vec![[0, 600]])
        .save(&params_path)
        .unwrap();

    let collated = dir.path().join("collated.parquet");
    let matched = dir.path().join("matched.parquet");
    let processed = dir.path().join("processed.parquet");
    let model = dir.path().join("model.json");
    let inferred = dir.path().join("inferred.parquet");

    assert_success(&harpspec(&[Path::new("collate"), &raw, &collated]));
    assert_eq!(load_dataset(&collated).unwrap().len(), 5);

    assert_success(&harpspec(&[Path::new("match"), &collated, &labels, &matched]));
    let ds = load_dataset(&matched).unwrap();
    assert_eq!(ds.len(), 4);
    assert!(ds.has_labels());

    assert_success(&harpspec(&[Path::new("process"), &params_path, &matched, &processed]));
    let ds = load_dataset(&processed).unwrap();
    assert_eq!(ds.len(), 4);
    assert_eq!(ds.wavelength().as_unified().unwrap().len(), 600);

    assert_success(&harpspec(&[Path::new("train"), &processed, &model]));
    assert!(model.is_file());

    assert_success(&harpspec(&[Path::new("infer"), &processed, &model, &inferred]));
    let ds = load_dataset(&inferred).unwrap();
    assert_eq!(ds.label_names().unwrap(), &["teff".to_string()]);
    assert!(ds.labels().unwrap().iter().all(|row| row[0].is_finite()));
}

#[test]
fn wrong_argument_count_prints_usage() {
    let out = harpspec(&[Path::new("collate"), Path::new("only-one-arg")]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("Usage"));
}

#[test]
fn missing_input_fails_with_message() {
    let dir = tempfile::tempdir().unwrap();
    let out = harpspec(&[
        Path::new("collate"),
        &dir.path().join("does-not-exist"),
        &dir.path().join("out.parquet"),
    ]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("does not exist"));
}

#[test]
fn help_lists_every_command() {
    let out = harpspec(&[Path::new("help")]);
    assert_success(&out);
    let text = String::from_utf8_lossy(&out.stdout);
    for cmd in ["collate", "match", "process", "train", "infer"] {
        assert!(text.contains(cmd), "help is missing '{cmd}'");
    }
}
