use std::path::{Path, PathBuf};

use log::{debug, info};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{LabelModel, TrainedModel};
use crate::data::model::Dataset;
use crate::error::{Error, Result};
use crate::pipeline::continuum::fit::solve_normal_equations;
use crate::pipeline::progress::{Progress, Stage, StageCounter};

// ---------------------------------------------------------------------------
// Quadratic design – θ(x) = [1, x_k, x_a·x_b (a ≤ b)]
// ---------------------------------------------------------------------------

/// Number of terms of a second-order polynomial in `k` labels.
pub fn term_count(k: usize) -> usize {
    1 + k + k * (k + 1) / 2
}

fn design_row(x: &[f64]) -> Vec<f64> {
    let k = x.len();
    let mut row = Vec::with_capacity(term_count(k));
    row.push(1.0);
    row.extend_from_slice(x);
    for a in 0..k {
        for b in a..k {
            row.push(x[a] * x[b]);
        }
    }
    row
}

/// `∂θ_m / ∂x_k` as one row of length K per term.
fn design_gradient(x: &[f64]) -> Vec<Vec<f64>> {
    let k = x.len();
    let mut rows = Vec::with_capacity(term_count(k));
    rows.push(vec![0.0; k]);
    for a in 0..k {
        let mut row = vec![0.0; k];
        row[a] = 1.0;
        rows.push(row);
    }
    for a in 0..k {
        for b in a..k {
            let mut row = vec![0.0; k];
            row[a] += x[b];
            row[b] += x[a];
            rows.push(row);
        }
    }
    rows
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

// ---------------------------------------------------------------------------
// TrainedQuadraticModel – per-pixel coefficients, serializable
// ---------------------------------------------------------------------------

/// A fitted quadratic model: label pivots and one coefficient vector per
/// pixel of the training grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedQuadraticModel {
    pub label_names: Option<Vec<String>>,
    /// Label means over the training set.
    pub pivots: Vec<f64>,
    /// Label standard deviations (1 where a label is constant).
    pub scales: Vec<f64>,
    pub wavelength: Vec<f64>,
    /// `term_count(K)` coefficients per pixel.
    pub coefficients: Vec<Vec<f64>>,
    /// Pixels with enough training data; the others are ignored by inference.
    pub used: Vec<bool>,
}

impl TrainedModel for TrainedQuadraticModel {
    fn label_names(&self) -> Option<&[String]> {
        self.label_names.as_deref()
    }

    fn label_count(&self) -> usize {
        self.pivots.len()
    }
}

impl TrainedQuadraticModel {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::Input(format!("model '{}' does not exist", path.display())));
        }
        let text = std::fs::read_to_string(path)?;
        let model: TrainedQuadraticModel = serde_json::from_str(&text)?;
        model.check_shape().map_err(|reason| Error::Load {
            path: PathBuf::from(path),
            reason,
        })?;
        Ok(model)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string(self)?)?;
        info!("wrote model ({} labels, {} pixels) to {}", self.label_count(), self.wavelength.len(), path.display());
        Ok(())
    }

    fn check_shape(&self) -> std::result::Result<(), String> {
        let k = self.pivots.len();
        let npix = self.wavelength.len();
        if k == 0 || self.scales.len() != k {
            return Err(format!("{} pivots and {} scales", k, self.scales.len()));
        }
        if let Some(names) = &self.label_names {
            if names.len() != k {
                return Err(format!("{} label names for {k} labels", names.len()));
            }
        }
        if self.coefficients.len() != npix || self.used.len() != npix {
            return Err(format!(
                "{npix} wavelengths, {} coefficient rows, {} pixel flags",
                self.coefficients.len(),
                self.used.len()
            ));
        }
        let p = term_count(k);
        if let Some(j) = self.coefficients.iter().position(|c| c.len() != p) {
            return Err(format!("pixel {j} has {} coefficients, expected {p}", self.coefficients[j].len()));
        }
        Ok(())
    }

    fn normalize(&self, labels: &[f64]) -> Vec<f64> {
        labels
            .iter()
            .zip(self.pivots.iter().zip(&self.scales))
            .map(|(l, (m, s))| (l - m) / s)
            .collect()
    }

    fn chi2(&self, x: &[f64], pixels: &[usize], flux: &[f64], ivar: &[f64]) -> f64 {
        let theta = design_row(x);
        pixels
            .iter()
            .map(|&j| {
                let r = flux[j] - dot(&self.coefficients[j], &theta);
                ivar[j] * r * r
            })
            .sum()
    }

    /// Damped Gauss–Newton from the pivot, minimizing
    /// `Σ ivar_j (flux_j - θ(x)·c_j)²` over the normalized labels `x`.
    fn infer_one(&self, flux: &[f64], ivar: &[f64], max_iterations: usize) -> std::result::Result<Vec<f64>, String> {
        let k = self.label_count();
        let pixels: Vec<usize> = (0..flux.len())
            .filter(|&j| self.used[j] && ivar[j] > 0.0 && flux[j].is_finite() && ivar[j].is_finite())
            .collect();
        if pixels.len() < k {
            return Err(format!("{} usable pixels for {k} labels", pixels.len()));
        }

        let mut x = vec![0.0; k];
        let mut chi2 = self.chi2(&x, &pixels, flux, ivar);
        let mut lambda = 1e-3;
        for _ in 0..max_iterations {
            let theta = design_row(&x);
            let grad = design_gradient(&x);
            let mut jtj = DMatrix::<f64>::zeros(k, k);
            let mut jtr = DVector::<f64>::zeros(k);
            for &j in &pixels {
                let c = &self.coefficients[j];
                let r = flux[j] - dot(c, &theta);
                let g: Vec<f64> = (0..k)
                    .map(|d| c.iter().zip(&grad).map(|(cm, gm)| cm * gm[d]).sum())
                    .collect();
                for a in 0..k {
                    jtr[a] += ivar[j] * g[a] * r;
                    for b in 0..k {
                        jtj[(a, b)] += ivar[j] * g[a] * g[b];
                    }
                }
            }

            let mut accepted = None;
            while lambda < 1e10 {
                let mut damped = jtj.clone();
                for d in 0..k {
                    damped[(d, d)] += lambda * jtj[(d, d)].max(1e-12);
                }
                if let Some(step) = solve_normal_equations(damped, &jtr) {
                    let trial: Vec<f64> = x.iter().zip(step.iter()).map(|(a, s)| a + s).collect();
                    let trial_chi2 = self.chi2(&trial, &pixels, flux, ivar);
                    if trial_chi2 <= chi2 {
                        accepted = Some((trial, trial_chi2, step.norm()));
                        lambda = (lambda / 10.0).max(1e-12);
                        break;
                    }
                }
                lambda *= 10.0;
            }

            let Some((trial, trial_chi2, step_norm)) = accepted else { break };
            x = trial;
            chi2 = trial_chi2;
            if step_norm < 1e-12 * (1.0 + x.iter().map(|v| v * v).sum::<f64>().sqrt()) {
                break;
            }
        }

        let labels: Vec<f64> = x
            .iter()
            .zip(self.pivots.iter().zip(&self.scales))
            .map(|(v, (m, s))| m + s * v)
            .collect();
        if labels.iter().any(|v| !v.is_finite()) {
            return Err("non-finite label estimate".into());
        }
        debug!("inferred {labels:?} (chi2 {chi2:.3e} over {} pixels)", pixels.len());
        Ok(labels)
    }
}

// ---------------------------------------------------------------------------
// QuadraticLabelModel – fitting and inference
// ---------------------------------------------------------------------------

/// Second-order polynomial model of each pixel's flux in the pivoted labels,
/// fit by unweighted least squares over the training targets.
#[derive(Debug, Clone, Copy)]
pub struct QuadraticLabelModel {
    /// Gauss–Newton iteration cap per target during inference.
    pub max_iterations: usize,
}

impl Default for QuadraticLabelModel {
    fn default() -> Self {
        QuadraticLabelModel { max_iterations: 100 }
    }
}

impl LabelModel for QuadraticLabelModel {
    type Trained = TrainedQuadraticModel;

    fn fit(&self, dataset: &Dataset) -> Result<TrainedQuadraticModel> {
        if dataset.is_empty() {
            return Err(Error::Fit("no training targets".into()));
        }
        let wl = dataset.wavelength().as_unified().ok_or(Error::GridNotUnified)?;
        let labels = dataset
            .labels()
            .ok_or_else(|| Error::Fit("training dataset carries no labels".into()))?;
        let k = dataset.label_count().unwrap_or(0);
        if k == 0 {
            return Err(Error::Fit("training dataset has zero label columns".into()));
        }
        if let Some(i) = labels.iter().position(|row| row.iter().any(|v| !v.is_finite())) {
            return Err(Error::Fit(format!(
                "non-finite label for target '{}'",
                dataset.targets()[i]
            )));
        }
        let n = dataset.len();
        let p = term_count(k);
        if n < p {
            return Err(Error::Fit(format!(
                "{n} training targets cannot constrain {p} coefficients per pixel"
            )));
        }

        let pivots: Vec<f64> = (0..k)
            .map(|d| labels.iter().map(|row| row[d]).sum::<f64>() / n as f64)
            .collect();
        let scales: Vec<f64> = (0..k)
            .map(|d| {
                let var = labels.iter().map(|row| (row[d] - pivots[d]).powi(2)).sum::<f64>() / n as f64;
                let std = var.sqrt();
                if std > 0.0 {
                    std
                } else {
                    1.0
                }
            })
            .collect();

        let mut trained = TrainedQuadraticModel {
            label_names: dataset.label_names().map(<[String]>::to_vec),
            pivots,
            scales,
            wavelength: wl.to_vec(),
            coefficients: Vec::new(),
            used: Vec::new(),
        };
        let thetas: Vec<Vec<f64>> = labels.iter().map(|row| design_row(&trained.normalize(row))).collect();

        let flux = dataset.flux();
        let ivar = dataset.ivar();
        let fits: Vec<Option<Vec<f64>>> = (0..wl.len())
            .into_par_iter()
            .map(|j| {
                let rows: Vec<usize> = (0..n)
                    .filter(|&i| ivar[i][j] > 0.0 && flux[i][j].is_finite())
                    .collect();
                if rows.len() < p {
                    return None;
                }
                let mut ata = DMatrix::<f64>::zeros(p, p);
                let mut aty = DVector::<f64>::zeros(p);
                for &i in &rows {
                    let t = &thetas[i];
                    for a in 0..p {
                        aty[a] += t[a] * flux[i][j];
                        for b in 0..p {
                            ata[(a, b)] += t[a] * t[b];
                        }
                    }
                }
                solve_normal_equations(ata, &aty).map(|c| c.iter().copied().collect())
            })
            .collect();

        trained.used = fits.iter().map(Option::is_some).collect();
        trained.coefficients = fits.into_iter().map(|c| c.unwrap_or_else(|| vec![0.0; p])).collect();
        let used = trained.used.iter().filter(|&&u| u).count();
        if used == 0 {
            return Err(Error::Fit("no pixel has enough usable training targets".into()));
        }
        info!(
            "trained quadratic model on {n} targets, {k} labels, {used}/{} pixels",
            wl.len()
        );
        Ok(trained)
    }

    fn infer(&self, trained: &TrainedQuadraticModel, dataset: &Dataset, progress: &Progress) -> Result<Vec<Vec<f64>>> {
        let wl = dataset.wavelength().as_unified().ok_or(Error::GridNotUnified)?;
        if wl.len() != trained.wavelength.len() {
            return Err(Error::Infer(format!(
                "dataset has {} wavelengths, model was trained on {}",
                wl.len(),
                trained.wavelength.len()
            )));
        }

        let counter = StageCounter::new(Stage::Infer, dataset.len(), progress);
        let flux = dataset.flux();
        let ivar = dataset.ivar();
        (0..dataset.len())
            .into_par_iter()
            .map(|i| {
                let out = trained
                    .infer_one(&flux[i], &ivar[i], self.max_iterations)
                    .map_err(|reason| Error::Infer(format!("target '{}': {reason}", dataset.targets()[i])));
                counter.tick();
                out
            })
            .collect()
    }
}
