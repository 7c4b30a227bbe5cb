//! Piecewise-linear interpolation on an increasing axis.

/// What to return for query points outside `[xp[0], xp[last]]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fill {
    /// A constant; resampling and alignment use 0 ("no signal, no confidence").
    Value(f64),
    /// The first/last sample value.
    Edge,
}

/// Evaluate the linear interpolant through `(xp, fp)` at every point of `x`.
///
/// `xp` must be increasing and as long as `fp`.
pub fn interp(x: &[f64], xp: &[f64], fp: &[f64], fill: Fill) -> Vec<f64> {
    debug_assert_eq!(xp.len(), fp.len());
    x.iter().map(|&xi| interp_at(xi, xp, fp, fill)).collect()
}

/// Single-point version of [`interp`].
pub fn interp_at(x: f64, xp: &[f64], fp: &[f64], fill: Fill) -> f64 {
    let n = xp.len();
    if n == 0 {
        return match fill {
            Fill::Value(v) => v,
            Fill::Edge => f64::NAN,
        };
    }
    if x.is_nan() {
        return f64::NAN;
    }
    if x < xp[0] {
        return match fill {
            Fill::Value(v) => v,
            Fill::Edge => fp[0],
        };
    }
    if x > xp[n - 1] {
        return match fill {
            Fill::Value(v) => v,
            Fill::Edge => fp[n - 1],
        };
    }
    if x == xp[n - 1] {
        return fp[n - 1];
    }

    // xp[j] <= x < xp[j + 1]
    let j = xp.partition_point(|&v| v <= x) - 1;
    if xp[j] == x {
        return fp[j];
    }
    let t = (x - xp[j]) / (xp[j + 1] - xp[j]);
    fp[j] + t * (fp[j + 1] - fp[j])
}
