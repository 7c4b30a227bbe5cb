//! Weighted least-squares continuum on a truncated sine/cosine basis.

use std::f64::consts::PI;

use log::debug;
use nalgebra::{Cholesky, DMatrix, DVector};

/// Weight given to masked continuum pixels: `(1 / 200)²`.
const SMALL_WEIGHT: f64 = 1.0 / (200.0 * 200.0);

/// Basis functions at pixel `x`: `1, sin(nπx/L), cos(nπx/L)` for
/// `n = 1 .. degree - 1`.
pub fn sinusoid_basis(x: f64, degree: usize, span: f64) -> Vec<f64> {
    let mut row = Vec::with_capacity(2 * degree - 1);
    row.push(1.0);
    for n in 1..degree {
        let k = n as f64 * PI / span;
        row.push((k * x).sin());
        row.push((k * x).cos());
    }
    row
}

/// Add diagonal jitter scaled to the mean diagonal.
fn add_jitter(mut m: DMatrix<f64>) -> DMatrix<f64> {
    let n = m.nrows().max(1) as f64;
    let eps = 1e-10 + (m.trace() / n).abs() * 1e-8;
    for i in 0..m.nrows() {
        m[(i, i)] += eps;
    }
    m
}

/// Solve the normal equations `AᵀWA p = AᵀWy`, retrying once with jitter.
pub(crate) fn solve_normal_equations(ata: DMatrix<f64>, aty: &DVector<f64>) -> Option<DVector<f64>> {
    let chol = match Cholesky::new(ata.clone()) {
        Some(c) => c,
        None => Cholesky::new(add_jitter(ata))?,
    };
    let p = chol.solve(aty);
    p.iter().all(|v| v.is_finite()).then_some(p)
}

/// Fit the continuum of one region of one spectrum on the pixels selected by
/// `mask` and evaluate it on every pixel of the region.
///
/// Returns zeros when too few usable pixels are masked in to constrain the
/// basis, which downstream normalization treats as "no continuum".
pub fn fit_sinusoid(flux: &[f64], ivar: &[f64], mask: &[bool], degree: usize) -> Vec<f64> {
    let npix = flux.len();
    let terms = 2 * degree - 1;

    let points: Vec<(f64, f64, f64)> = (0..npix)
        .filter(|&j| mask[j] && flux[j].is_finite() && ivar[j].is_finite())
        .map(|j| {
            let w = if ivar[j] == 0.0 { SMALL_WEIGHT } else { ivar[j] };
            (j as f64, flux[j], w)
        })
        .collect();

    let (min_x, max_x) = points
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &(x, _, _)| (lo.min(x), hi.max(x)));
    let span = max_x - min_x;
    if points.len() < terms || !(span > 0.0) {
        debug!(
            "continuum fit skipped: {} masked pixels for {terms} terms",
            points.len()
        );
        return vec![0.0; npix];
    }

    let mut ata = DMatrix::<f64>::zeros(terms, terms);
    let mut aty = DVector::<f64>::zeros(terms);
    for &(x, y, w) in &points {
        let row = sinusoid_basis(x, degree, span);
        for a in 0..terms {
            aty[a] += w * row[a] * y;
            for b in 0..terms {
                ata[(a, b)] += w * row[a] * row[b];
            }
        }
    }

    let Some(p) = solve_normal_equations(ata, &aty) else {
        debug!("continuum fit skipped: singular normal equations");
        return vec![0.0; npix];
    };
    (0..npix)
        .map(|j| {
            sinusoid_basis(j as f64, degree, span)
                .iter()
                .zip(p.iter())
                .map(|(b, c)| b * c)
                .sum()
        })
        .collect()
}
