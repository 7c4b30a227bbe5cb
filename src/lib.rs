//! Stellar spectra pipeline for HARPS-style echelle data.
//!
//! ```text
//!   collate ──► match ──► process ──► train / infer
//!   (loader)   (labels)   (resample, align, downsample, continuum)
//! ```
//!
//! Every stage takes a [`Dataset`] and returns a new one; nothing is
//! modified in place.

pub mod data;
pub mod error;
pub mod model;
pub mod pipeline;

pub use data::loader::{collate, SpectrumLoader, TableSpectrumLoader};
pub use data::matching::{match_labels, LabelTable};
pub use data::model::{Dataset, RawSpectrum, WavelengthGrid};
pub use data::store::{load_dataset, save_dataset};
pub use error::{Error, Result};
pub use model::{infer_dataset, LabelModel, QuadraticLabelModel, TrainedModel, TrainedQuadraticModel};
pub use pipeline::params::ProcessParams;
pub use pipeline::progress::{Progress, Stage};
pub use pipeline::{process, process_with_model, ProcessOutput};
