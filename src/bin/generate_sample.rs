use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{Float64Array, Float64Builder, ListBuilder, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

use harpspec::ProcessParams;

fn gaussian(x: f64, mu: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-(x - mu).powi(2) / (2.0 * sigma.powi(2))).exp()
}

/// Normalized absorption spectrum of a star with the given labels, observed
/// with redshift `z`.
fn absorption(wavelengths: &[f64], lines: &[(f64, f64)], labels: [f64; 3], z: f64) -> Vec<f64> {
    let [teff, logg, feh] = labels;
    let depth_scale = (1.0 + 0.4 * feh) * (5800.0 / teff).powf(1.5);
    let width = 0.08 * (1.0 + 0.1 * (logg - 4.0));
    wavelengths
        .iter()
        .map(|&wl| {
            let depth: f64 = lines
                .iter()
                .map(|&(mu, strength)| gaussian(wl, mu * (1.0 + z), width, strength * depth_scale))
                .sum();
            (1.0 - depth).max(0.02)
        })
        .collect()
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5)).rotate_left(7).wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_f64()
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

fn list_array(rows: &[Vec<f64>]) -> arrow::array::ListArray {
    let mut builder = ListBuilder::new(Float64Builder::new());
    for row in rows {
        builder.values().append_slice(row);
        builder.append(true);
    }
    builder.finish()
}

fn main() -> Result<()> {
    let out_dir = Path::new(std::env::args().nth(1).as_deref().unwrap_or("sample_data")).to_path_buf();
    std::fs::create_dir_all(&out_dir).with_context(|| format!("Failed to create {}", out_dir.display()))?;
    let mut rng = SimpleRng::new(42);

    // Observed grid: 3950 → 5850 Å, step 0.05
    let step = 0.05;
    let wavelengths: Vec<f64> = (0..38_000).map(|i| 3950.0 + i as f64 * step).collect();

    // A few hundred absorption lines, two of them near every alignment window.
    let mut lines: Vec<(f64, f64)> = (0..600)
        .map(|_| (rng.uniform(3960.0, 5840.0), rng.uniform(0.05, 0.6)))
        .collect();
    for i in 0..18 {
        let centre = 4000.0 + 100.0 * i as f64;
        lines.push((centre - 0.35, 0.5));
        lines.push((centre + 0.4, 0.3));
    }

    let n_stars = 12;
    let mut targets = Vec::new();
    let mut all_wl = Vec::new();
    let mut all_flux = Vec::new();
    let mut all_snr = Vec::new();
    let mut label_rows = Vec::new();
    for star in 0..n_stars {
        let labels = [
            rng.uniform(4800.0, 6400.0),
            rng.uniform(3.5, 4.6),
            rng.uniform(-0.5, 0.3),
        ];
        let id = format!("HD{}", 10_000 + 37 * star);
        label_rows.push((id.clone(), labels));

        // Two observations per star, each with its own velocity and throughput.
        for night in 0..2 {
            let z = rng.gauss(0.0, 3e-5);
            let tilt = rng.uniform(-0.2, 0.2);
            let level = rng.uniform(800.0, 3000.0);
            let shape = absorption(&wavelengths, &lines, labels, z);
            let flux: Vec<f64> = wavelengths
                .iter()
                .zip(&shape)
                .map(|(&wl, &s)| {
                    let x = (wl - 3950.0) / 1900.0;
                    let continuum = level * (1.0 + tilt * x + 0.1 * (std::f64::consts::PI * x).sin());
                    let clean = continuum * s;
                    (clean + rng.gauss(0.0, clean.sqrt())).max(0.0)
                })
                .collect();

            targets.push(format!("{id}_2014-09-{:02}", 10 + night));
            all_wl.push(wavelengths.clone());
            all_flux.push(flux);
            all_snr.push(rng.uniform(60.0, 150.0));
        }
    }

    // Spectra: one row per observation, noise given as a global S/N.
    let schema = Arc::new(Schema::new(vec![
        Field::new("target", DataType::Utf8, false),
        Field::new("wavelength", DataType::List(Arc::new(Field::new("item", DataType::Float64, true))), false),
        Field::new("flux", DataType::List(Arc::new(Field::new("item", DataType::Float64, true))), false),
        Field::new("snr", DataType::Float64, false),
    ]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(StringArray::from(targets.iter().map(String::as_str).collect::<Vec<_>>())),
            Arc::new(list_array(&all_wl)),
            Arc::new(list_array(&all_flux)),
            Arc::new(Float64Array::from(all_snr)),
        ],
    )?;
    let spectra_path = out_dir.join("spectra.parquet");
    let file = std::fs::File::create(&spectra_path)?;
    let mut writer = ArrowWriter::try_new(file, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;

    // Labels, keyed by star id (a prefix of every observation's target id).
    let labels_path = out_dir.join("labels.csv");
    let mut csv_writer = csv::Writer::from_path(&labels_path)?;
    csv_writer.write_record(["star", "teff", "logg", "feh"])?;
    for (id, [teff, logg, feh]) in &label_rows {
        csv_writer.write_record([id.clone(), format!("{teff:.1}"), format!("{logg:.3}"), format!("{feh:.3}")])?;
    }
    csv_writer.flush()?;

    // Processing parameters: the observed grid, a noiseless reference star
    // at rest, and two normalization regions split at 4900 Å.
    let reference_flux = absorption(&wavelengths, &lines, [5800.0, 4.4, 0.0], 0.0);
    let split = wavelengths.iter().position(|&wl| wl >= 4900.0).unwrap_or(wavelengths.len() / 2);
    let mut params = ProcessParams::new(
        wavelengths.clone(),
        reference_flux,
        10,
        vec![[0, split], [split, wavelengths.len()]],
    );
    params.alignment.pixel_scale = step;
    let params_path = out_dir.join("params.json");
    params.save(&params_path)?;

    println!(
        "Wrote {} spectra ({} wavelengths each) to {}, labels to {}, parameters to {}",
        targets.len(),
        wavelengths.len(),
        spectra_path.display(),
        labels_path.display(),
        params_path.display()
    );
    Ok(())
}
