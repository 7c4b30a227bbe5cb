use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// AlignmentConfig
// ---------------------------------------------------------------------------

/// Reference lines and window size for the cross-correlation velocity fit.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlignmentConfig {
    /// Line centres in Ångström.
    pub lines: Vec<f64>,
    /// Half-width of the window around each line, in Ångström.
    pub half_width: f64,
    /// Wavelength per correlation lag step, used as `z = lag * pixel_scale / line`.
    pub pixel_scale: f64,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            lines: (0..18).map(|i| 4000.0 + 100.0 * i as f64).collect(),
            half_width: 30.0,
            pixel_scale: 0.01,
        }
    }
}

// ---------------------------------------------------------------------------
// ContinuumConfig
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContinuumBasis {
    Sinusoid,
}

/// Settings of the quantile / mask / sinusoid continuum model.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ContinuumConfig {
    /// Quantile of the running pseudo-continuum.
    pub quantile: f64,
    /// Half-width (Ångström) of the running-quantile window.
    pub delta_lambda: f64,
    /// Target fraction of continuum pixels per region.
    pub mask_fraction: f64,
    /// Number of sinusoid orders, the constant term included.
    pub degree: usize,
    pub basis: ContinuumBasis,
}

impl Default for ContinuumConfig {
    fn default() -> Self {
        Self {
            quantile: 0.9,
            delta_lambda: 50.0,
            mask_fraction: 0.07,
            degree: 3,
            basis: ContinuumBasis::Sinusoid,
        }
    }
}

// ---------------------------------------------------------------------------
// ProcessParams
// ---------------------------------------------------------------------------

/// Everything `process` needs besides the dataset.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProcessParams {
    /// Target unified wavelength grid.
    pub wl: Vec<f64>,
    /// Alignment template on `wl`.
    pub reference_flux: Vec<f64>,
    /// Bin factor for the continuum fit.
    pub downsample_amount: usize,
    /// `[start, stop)` index pairs on `wl` delimiting normalization regions.
    pub wl_ranges: Vec<[usize; 2]>,
    #[serde(default)]
    pub alignment: AlignmentConfig,
    #[serde(default)]
    pub continuum: ContinuumConfig,
}

impl ProcessParams {
    pub fn new(
        wl: Vec<f64>,
        reference_flux: Vec<f64>,
        downsample_amount: usize,
        wl_ranges: Vec<[usize; 2]>,
    ) -> Self {
        Self {
            wl,
            reference_flux,
            downsample_amount,
            wl_ranges,
            alignment: AlignmentConfig::default(),
            continuum: ContinuumConfig::default(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let params: ProcessParams = serde_json::from_str(&text)?;
        params.validate()?;
        Ok(params)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Reject parameter sets the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.wl.len() < 2 {
            return Err(Error::InvalidParameter(
                "wl must hold at least two wavelengths".into(),
            ));
        }
        if self.wl.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::InvalidParameter("wl must be strictly increasing".into()));
        }
        if self.reference_flux.len() != self.wl.len() {
            return Err(Error::InvalidParameter(format!(
                "reference_flux has {} values but wl has {}",
                self.reference_flux.len(),
                self.wl.len()
            )));
        }
        if self.downsample_amount == 0 {
            return Err(Error::InvalidParameter("downsample_amount must be positive".into()));
        }
        for &[start, stop] in &self.wl_ranges {
            if start > stop || stop > self.wl.len() {
                return Err(Error::InvalidParameter(format!(
                    "wl range [{start}, {stop}) does not fit a grid of {} samples",
                    self.wl.len()
                )));
            }
        }
        let c = &self.continuum;
        if !(0.0..=1.0).contains(&c.quantile) {
            return Err(Error::InvalidParameter(format!("quantile {} outside [0, 1]", c.quantile)));
        }
        if !(c.mask_fraction > 0.0 && c.mask_fraction <= 1.0) {
            return Err(Error::InvalidParameter(format!(
                "mask_fraction {} outside (0, 1]",
                c.mask_fraction
            )));
        }
        if c.degree == 0 {
            return Err(Error::InvalidParameter("continuum degree must be positive".into()));
        }
        let a = &self.alignment;
        if !(a.half_width > 0.0) {
            return Err(Error::InvalidParameter("alignment half_width must be positive".into()));
        }
        if a.lines.is_empty() {
            return Err(Error::InvalidParameter("alignment needs at least one line".into()));
        }
        if a.lines.iter().any(|l| !l.is_finite()) {
            return Err(Error::InvalidParameter("alignment lines must be finite".into()));
        }
        if !(a.pixel_scale.is_finite() && a.pixel_scale > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "alignment pixel_scale {} must be positive and finite",
                a.pixel_scale
            )));
        }
        Ok(())
    }
}
