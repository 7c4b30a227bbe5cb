use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// RawSpectrum – one target as produced by a loader
// ---------------------------------------------------------------------------

/// A single observed spectrum before it joins a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSpectrum {
    /// Target identifier (object name plus whatever the instrument appends).
    pub target: String,
    /// Wavelength axis in Ångström, strictly increasing.
    pub wavelength: Vec<f64>,
    /// Flux – same length as `wavelength`.
    pub flux: Vec<f64>,
    /// Inverse variance; 0 marks a masked sample.
    pub ivar: Vec<f64>,
}

// ---------------------------------------------------------------------------
// WavelengthGrid – shared axis or one axis per target
// ---------------------------------------------------------------------------

/// The wavelength axis of a dataset. The regime is fixed when the dataset is
/// built; stages match on it instead of probing array shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum WavelengthGrid {
    /// One axis shared by every target.
    Unified(Vec<f64>),
    /// One axis per target, index-aligned with the targets.
    PerTarget(Vec<Vec<f64>>),
}

impl WavelengthGrid {
    /// Wavelength axis of target `i`.
    ///
    /// Panics if `i` is out of range for a per-target grid.
    pub fn for_target(&self, i: usize) -> &[f64] {
        match self {
            WavelengthGrid::Unified(wl) => wl,
            WavelengthGrid::PerTarget(wls) => &wls[i],
        }
    }

    pub fn is_unified(&self) -> bool {
        matches!(self, WavelengthGrid::Unified(_))
    }

    /// The shared axis, if this grid is unified.
    pub fn as_unified(&self) -> Option<&[f64]> {
        match self {
            WavelengthGrid::Unified(wl) => Some(wl),
            WavelengthGrid::PerTarget(_) => None,
        }
    }

    fn select(&self, indices: &[usize]) -> WavelengthGrid {
        match self {
            WavelengthGrid::Unified(wl) => WavelengthGrid::Unified(wl.clone()),
            WavelengthGrid::PerTarget(wls) => {
                WavelengthGrid::PerTarget(indices.iter().map(|&i| wls[i].clone()).collect())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Dataset – the container handed between pipeline stages
// ---------------------------------------------------------------------------

/// Targets with their spectra and, once matched, their labels.
///
/// Fields are private so every instance goes through the shape checks in
/// [`Dataset::new`]. Stages never mutate a dataset; they build a new one.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    targets: Vec<String>,
    wavelength: WavelengthGrid,
    flux: Vec<Vec<f64>>,
    ivar: Vec<Vec<f64>>,
    labels: Option<Vec<Vec<f64>>>,
    label_names: Option<Vec<String>>,
}

impl Dataset {
    /// Build an unlabeled dataset, checking that every target's flux and ivar
    /// line up with its wavelength axis.
    pub fn new(
        targets: Vec<String>,
        wavelength: WavelengthGrid,
        flux: Vec<Vec<f64>>,
        ivar: Vec<Vec<f64>>,
    ) -> Result<Self> {
        let n = targets.len();
        if flux.len() != n || ivar.len() != n {
            return Err(Error::ShapeMismatch(format!(
                "{n} targets but {} flux rows and {} ivar rows",
                flux.len(),
                ivar.len()
            )));
        }
        if let WavelengthGrid::PerTarget(wls) = &wavelength {
            if wls.len() != n {
                return Err(Error::ShapeMismatch(format!(
                    "{n} targets but {} wavelength rows",
                    wls.len()
                )));
            }
        }
        for (i, (f, v)) in flux.iter().zip(&ivar).enumerate() {
            let len = wavelength.for_target(i).len();
            if f.len() != len || v.len() != len {
                return Err(Error::ShapeMismatch(format!(
                    "target '{}': wavelength has {len} samples, flux {}, ivar {}",
                    targets[i],
                    f.len(),
                    v.len()
                )));
            }
        }
        Ok(Dataset {
            targets,
            wavelength,
            flux,
            ivar,
            labels: None,
            label_names: None,
        })
    }

    /// Collate loaded spectra. The grid is unified when every spectrum shares
    /// the exact same wavelength axis, per-target otherwise.
    pub fn from_spectra(spectra: Vec<RawSpectrum>) -> Result<Self> {
        let shared = match spectra.split_first() {
            Some((first, rest)) => rest.iter().all(|s| s.wavelength == first.wavelength),
            None => false,
        };

        let mut targets = Vec::with_capacity(spectra.len());
        let mut wls = Vec::with_capacity(spectra.len());
        let mut flux = Vec::with_capacity(spectra.len());
        let mut ivar = Vec::with_capacity(spectra.len());
        for sp in spectra {
            targets.push(sp.target);
            wls.push(sp.wavelength);
            flux.push(sp.flux);
            ivar.push(sp.ivar);
        }

        let wavelength = if shared {
            WavelengthGrid::Unified(wls.swap_remove(0))
        } else {
            WavelengthGrid::PerTarget(wls)
        };
        Dataset::new(targets, wavelength, flux, ivar)
    }

    /// Attach labels (one row per target, common width K) together with
    /// their names. Replaces any labels and names already present.
    pub fn with_labels(mut self, labels: Vec<Vec<f64>>, names: Option<Vec<String>>) -> Result<Self> {
        if labels.len() != self.len() {
            return Err(Error::ShapeMismatch(format!(
                "{} label rows for {} targets",
                labels.len(),
                self.len()
            )));
        }
        let width = labels.first().map_or(0, Vec::len);
        if let Some(row) = labels.iter().position(|r| r.len() != width) {
            return Err(Error::ShapeMismatch(format!(
                "label row {row} has {} values, expected {width}",
                labels[row].len()
            )));
        }
        if let Some(names) = &names {
            if !labels.is_empty() && names.len() != width {
                return Err(Error::ShapeMismatch(format!(
                    "{} label names for {width} label columns",
                    names.len()
                )));
            }
        }
        self.labels = Some(labels);
        self.label_names = names;
        Ok(self)
    }

    /// Name the label columns without touching the values.
    pub fn with_label_names(mut self, names: Vec<String>) -> Result<Self> {
        if let Some(width) = self.label_count() {
            if !self.is_empty() && names.len() != width {
                return Err(Error::ShapeMismatch(format!(
                    "{} label names for {width} label columns",
                    names.len()
                )));
            }
        }
        self.label_names = Some(names);
        Ok(self)
    }

    /// New dataset with the rows `kept` (in that order) and the given spectra,
    /// carrying over target ids, labels and label names of those rows.
    ///
    /// `flux` and `ivar` must already be indexed like `kept`.
    pub fn derive(
        &self,
        kept: &[usize],
        wavelength: WavelengthGrid,
        flux: Vec<Vec<f64>>,
        ivar: Vec<Vec<f64>>,
    ) -> Result<Self> {
        let targets = kept.iter().map(|&i| self.targets[i].clone()).collect();
        let mut ds = Dataset::new(targets, wavelength, flux, ivar)?;
        ds.labels = self
            .labels
            .as_ref()
            .map(|labels| kept.iter().map(|&i| labels[i].clone()).collect());
        ds.label_names = self.label_names.clone();
        Ok(ds)
    }

    /// Subset of rows, in the order given.
    pub fn select(&self, indices: &[usize]) -> Result<Self> {
        self.derive(
            indices,
            self.wavelength.select(indices),
            indices.iter().map(|&i| self.flux[i].clone()).collect(),
            indices.iter().map(|&i| self.ivar[i].clone()).collect(),
        )
    }

    /// Number of targets.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether the dataset is empty.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub fn wavelength(&self) -> &WavelengthGrid {
        &self.wavelength
    }

    pub fn flux(&self) -> &[Vec<f64>] {
        &self.flux
    }

    pub fn ivar(&self) -> &[Vec<f64>] {
        &self.ivar
    }

    pub fn labels(&self) -> Option<&[Vec<f64>]> {
        self.labels.as_deref()
    }

    pub fn label_names(&self) -> Option<&[String]> {
        self.label_names.as_deref()
    }

    pub fn has_labels(&self) -> bool {
        self.labels.is_some()
    }

    pub fn has_unified_wavelengths(&self) -> bool {
        self.wavelength.is_unified()
    }

    /// Width K of the label matrix, if labels are present and non-empty.
    pub fn label_count(&self) -> Option<usize> {
        self.labels.as_ref().and_then(|l| l.first()).map(Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spectrum(target: &str, wl: &[f64]) -> RawSpectrum {
        RawSpectrum {
            target: target.to_string(),
            wavelength: wl.to_vec(),
            flux: vec![1.0; wl.len()],
            ivar: vec![4.0; wl.len()],
        }
    }

    #[test]
    fn shared_axis_collates_to_unified_grid() {
        let wl = [4000.0, 4000.5, 4001.0];
        let ds = Dataset::from_spectra(vec![spectrum("a", &wl), spectrum("b", &wl)]).unwrap();
        assert!(ds.has_unified_wavelengths());
        assert_eq!(ds.wavelength().for_target(1), &wl);
    }

    #[test]
    fn differing_axes_collate_to_per_target_grid() {
        let ds = Dataset::from_spectra(vec![
            spectrum("a", &[4000.0, 4001.0]),
            spectrum("b", &[4000.2, 4001.2, 4002.2]),
        ])
        .unwrap();
        assert!(!ds.has_unified_wavelengths());
        assert_eq!(ds.flux()[1].len(), 3);
    }

    #[test]
    fn flux_length_must_match_axis() {
        let err = Dataset::new(
            vec!["a".into()],
            WavelengthGrid::Unified(vec![1.0, 2.0]),
            vec![vec![1.0]],
            vec![vec![1.0, 1.0]],
        )
        .unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch(_)));
    }

    #[test]
    fn label_names_must_match_label_width() {
        let ds = Dataset::from_spectra(vec![spectrum("a", &[1.0, 2.0])]).unwrap();
        let err = ds
            .with_labels(vec![vec![5.2, 0.1]], Some(vec!["teff".into()]))
            .unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch(_)));
    }

    #[test]
    fn select_keeps_labels_of_chosen_rows() {
        let ds = Dataset::from_spectra(vec![
            spectrum("a", &[1.0, 2.0]),
            spectrum("b", &[1.0, 2.0]),
            spectrum("c", &[1.0, 2.0]),
        ])
        .unwrap()
        .with_labels(vec![vec![1.0], vec![2.0], vec![3.0]], Some(vec!["x".into()]))
        .unwrap();

        let sub = ds.select(&[2, 0]).unwrap();
        assert_eq!(sub.targets(), &["c".to_string(), "a".to_string()]);
        assert_eq!(sub.labels().unwrap(), &[vec![3.0], vec![1.0]]);
        assert_eq!(sub.label_names().unwrap(), &["x".to_string()]);
    }
}
