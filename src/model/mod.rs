//! Label models: map normalized spectra to stellar labels and back.
//!
//! ```text
//!   labeled Dataset ──► LabelModel::fit ──► Trained (JSON on disk)
//!                                              │
//!   unlabeled Dataset ──► LabelModel::infer ◄──┘ ──► label matrix
//! ```

pub mod quadratic;

use crate::data::model::Dataset;
use crate::error::Result;
use crate::pipeline::progress::Progress;

pub use quadratic::{QuadraticLabelModel, TrainedQuadraticModel};

/// What every trained model exposes to the code that attaches its output.
pub trait TrainedModel {
    /// Names of the labels the model predicts, if it was trained on named
    /// labels.
    fn label_names(&self) -> Option<&[String]>;

    /// Number K of labels per target.
    fn label_count(&self) -> usize;
}

/// The fit/infer contract of a statistical label model.
///
/// `fit` fails with [`Error::Fit`](crate::Error::Fit) on malformed or empty
/// training data, `infer` with [`Error::Infer`](crate::Error::Infer). Both are
/// deterministic, so callers never retry.
pub trait LabelModel {
    type Trained: TrainedModel;

    fn fit(&self, dataset: &Dataset) -> Result<Self::Trained>;

    /// One row of K labels per target of `dataset`, in target order.
    fn infer(&self, trained: &Self::Trained, dataset: &Dataset, progress: &Progress) -> Result<Vec<Vec<f64>>>;
}

/// Default names for K unnamed labels: `Label-0 .. Label-(K-1)`.
pub fn default_label_names(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("Label-{i}")).collect()
}

/// Infer labels for every target and return a new dataset carrying them.
/// Label names come from the trained model, or default to `Label-<i>`.
pub fn infer_dataset<M: LabelModel>(
    model: &M,
    trained: &M::Trained,
    dataset: &Dataset,
    progress: &Progress,
) -> Result<Dataset> {
    let labels = model.infer(trained, dataset, progress)?;
    let names = trained
        .label_names()
        .map(<[String]>::to_vec)
        .unwrap_or_else(|| default_label_names(trained.label_count()));
    dataset.clone().with_labels(labels, Some(names))
}
