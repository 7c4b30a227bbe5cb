//! Running weighted-quantile pseudo-continuum.

/// Weighted quantile of `values`: sort by value, accumulate the normalized
/// weights and return the first value whose cumulative weight exceeds `q`.
/// Falls back to `values[0]` when every weight is 0.
pub fn weighted_quantile(values: &[f64], weights: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let total: f64 = order.iter().map(|&i| weights[i]).sum();
    if total == 0.0 {
        return values[0];
    }
    let mut cumulative = 0.0;
    for &i in &order {
        cumulative += weights[i];
        if cumulative / total > q {
            return values[i];
        }
    }
    values[0]
}

/// Quantile of the flux within `|wl - λ| < delta_lambda` for every `λ` in `wl`.
pub fn running_quantile(wl: &[f64], flux: &[f64], ivar: &[f64], q: f64, delta_lambda: f64) -> Vec<f64> {
    let inside = |w: f64, lam: f64| (w - lam).abs() < delta_lambda;
    wl.iter()
        .map(|&lam| {
            let lo = wl.partition_point(|&w| w <= lam && !inside(w, lam));
            let hi = wl.partition_point(|&w| w <= lam || inside(w, lam));
            weighted_quantile(&flux[lo..hi], &ivar[lo..hi], q)
        })
        .collect()
}

/// Divide one region of a spectrum by its running-quantile continuum.
/// Returns `(flux / cont, cont² · ivar)`, with flux 1 wherever `cont == 0`.
pub fn pseudo_normalize(
    wl: &[f64],
    flux: &[f64],
    ivar: &[f64],
    q: f64,
    delta_lambda: f64,
) -> (Vec<f64>, Vec<f64>) {
    let cont = running_quantile(wl, flux, ivar, q, delta_lambda);
    let norm_flux = flux
        .iter()
        .zip(&cont)
        .map(|(&f, &c)| if c != 0.0 { f / c } else { 1.0 })
        .collect();
    let norm_ivar = ivar.iter().zip(&cont).map(|(&v, &c)| c * c * v).collect();
    (norm_flux, norm_ivar)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantile_picks_first_value_past_cumulative_weight() {
        let values = [5.0, 1.0, 3.0, 2.0, 4.0];
        let weights = [1.0; 5];
        // cumulative: 0.2 0.4 0.6 0.8 1.0 over sorted 1 2 3 4 5
        assert_eq!(weighted_quantile(&values, &weights, 0.9), 5.0);
        assert_eq!(weighted_quantile(&values, &weights, 0.5), 3.0);
        assert_eq!(weighted_quantile(&values, &weights, 0.6), 4.0);
    }

    #[test]
    fn zero_weights_return_first_value() {
        assert_eq!(weighted_quantile(&[7.0, 1.0], &[0.0, 0.0], 0.9), 7.0);
    }

    #[test]
    fn weights_shift_the_quantile() {
        let values = [1.0, 2.0, 3.0];
        assert_eq!(weighted_quantile(&values, &[10.0, 1.0, 1.0], 0.5), 1.0);
        assert_eq!(weighted_quantile(&values, &[1.0, 1.0, 10.0], 0.5), 3.0);
    }

    #[test]
    fn window_is_strictly_within_delta() {
        let wl = [0.0, 1.0, 2.0, 3.0, 4.0];
        let flux = [1.0, 9.0, 2.0, 8.0, 3.0];
        let ivar = [1.0; 5];
        // delta 1 keeps only the pixel itself
        assert_eq!(running_quantile(&wl, &flux, &ivar, 0.9, 1.0), flux.to_vec());
        // delta 1.5 covers the neighbours
        let out = running_quantile(&wl, &flux, &ivar, 0.9, 1.5);
        assert_eq!(out, vec![9.0, 9.0, 9.0, 8.0, 8.0]);
    }

    #[test]
    fn pseudo_normalized_flat_spectrum_is_one() {
        let wl: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let flux = vec![3.0; 50];
        let ivar = vec![2.0; 50];
        let (f, v) = pseudo_normalize(&wl, &flux, &ivar, 0.9, 5.0);
        assert!(f.iter().all(|&x| x == 1.0));
        assert!(v.iter().all(|&x| x == 18.0));
    }
}
