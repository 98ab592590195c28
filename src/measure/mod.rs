//! Performance measures.
//!
//! A [`Measure`] compares a candidate label image against a previously set
//! expected (ground truth) label image and yields zero or more scores. An
//! empty score list means the value is undefined for this pair of images,
//! which is a normal outcome rather than an error.
//!
//! ## Measures
//!
//! | Measure | Default name | Aggregation | Kind |
//! |---------|--------------|-------------|------|
//! | [`Dice`] | Dice | mean | regional |
//! | [`JaccardCoefficient`] | Jaccard coef. | mean | regional |
//! | [`JaccardIndex`] | Jaccard index | mean | regional |
//! | [`RandIndex`] | Rand | mean | regional |
//! | [`AdjustedRandIndex`] | ARI | mean | regional |
//! | [`IsbiScore`] | SEG | mean | object |
//! | [`Hausdorff`] | HSD | mean | contour |
//! | [`Nsd`] | NSD | mean | contour |
//! | [`FalseSplit`] | Split | sum | detection |
//! | [`FalseMerge`] | Merge | sum | detection |
//! | [`FalsePositive`] | Spurious | sum | detection |
//! | [`FalseNegative`] | Missing | sum | detection |
//!
//! ## Adapters
//!
//! Regional and contour measures are [`ImageMeasure`]s and can be lifted to
//! the object level with [`ImageMeasure::object_based`]. Any measure can be
//! mirrored with [`MeasureExt::reversed`] or evaluated in both directions with
//! [`MeasureExt::symmetric`].
//!
//! ```
//! use segmetrics::measure::{Dice, ImageMeasure, Measure, MeasureExt};
//!
//! let measure = Dice::default().object_based().symmetric();
//! assert_eq!(measure.default_name(), "Sym. Ob. Dice");
//! ```

pub mod adapter;
pub mod contour;
pub mod detection;
pub mod regional;
pub mod registry;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::label::LabelImage;
use crate::stats;

pub use adapter::{ObjectBased, Reversed, Symmetric, candidate_labels};
pub use contour::{Hausdorff, Nsd};
pub use detection::{FalseMerge, FalseNegative, FalsePositive, FalseSplit};
pub use regional::{
    AdjustedRandIndex, Dice, IsbiScore, JaccardCoefficient, JaccardIndex, RandIndex,
};

/// How a list of scores collapses into one summary value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Aggregation {
    /// Total of all scores.
    Sum,
    /// Arithmetic mean of all scores.
    #[default]
    Mean,
    /// Geometric mean of all scores.
    GeometricMean,
    /// Total of all scores divided by the number of reference objects.
    ObjectMean,
}

impl Aggregation {
    /// Reduce `values` to a summary value.
    ///
    /// `object_count` is the number of annotated reference objects the values
    /// were obtained from; only [`Aggregation::ObjectMean`] uses it. Returns
    /// `None` when the summary is undefined (no values, or no objects).
    #[must_use]
    pub fn reduce(self, values: &[f64], object_count: usize) -> Option<f64> {
        match self {
            Self::Sum => (!values.is_empty()).then(|| values.iter().sum()),
            Self::Mean => stats::mean(values),
            Self::GeometricMean => stats::geometric_mean(values),
            Self::ObjectMean => {
                (object_count > 0).then(|| values.iter().sum::<f64>() / object_count as f64)
            }
        }
    }

    /// Short identifier, as accepted by [`FromStr`].
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::GeometricMean => "geometric-mean",
            Self::ObjectMean => "object-mean",
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Aggregation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sum" => Ok(Self::Sum),
            "mean" => Ok(Self::Mean),
            "geometric-mean" | "gmean" => Ok(Self::GeometricMean),
            "object-mean" | "obj-mean" => Ok(Self::ObjectMean),
            other => Err(Error::InvalidParameter {
                name: "aggregation".to_string(),
                reason: format!("unknown aggregation '{other}'"),
            }),
        }
    }
}

/// How the scores of all candidate objects matched to one reference object
/// are reduced to a single score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Correspondence {
    /// Best match minimizes the score (distances).
    Min,
    /// Best match maximizes the score (overlaps).
    Max,
}

impl Correspondence {
    /// Reduce the per-candidate scores, `None` if there are none.
    #[must_use]
    pub fn reduce(self, scores: &[f64]) -> Option<f64> {
        let scores = scores.iter().copied();
        match self {
            Self::Min => scores.reduce(f64::min),
            Self::Max => scores.reduce(f64::max),
        }
    }
}

/// A pluggable scalar performance measure.
///
/// The measure holds the expected image set by [`Measure::set_expected`];
/// [`Measure::compute`] may be called any number of times against it.
pub trait Measure: MeasureClone + Send {
    /// Set the expected (ground truth) label image.
    fn set_expected(&mut self, expected: &LabelImage);

    /// Compute the scores of `actual` relative to the expected image.
    ///
    /// Returns an empty vector when the measure is undefined for this pair.
    fn compute(&mut self, actual: &LabelImage) -> Result<Vec<f64>>;

    /// How scores of this measure are aggregated.
    fn aggregation(&self) -> Aggregation;

    /// Name used when the measure is registered without an explicit name.
    fn default_name(&self) -> String;
}

/// Object-safe cloning of measures.
pub trait MeasureClone {
    /// Deep copy of this measure, including its expected image.
    fn clone_box(&self) -> Box<dyn Measure>;
}

impl<T> MeasureClone for T
where
    T: Measure + Clone + 'static,
{
    fn clone_box(&self) -> Box<dyn Measure> {
        Box::new(self.clone())
    }
}

impl Clone for Box<dyn Measure> {
    fn clone(&self) -> Self {
        (**self).clone_box()
    }
}

impl Measure for Box<dyn Measure> {
    fn set_expected(&mut self, expected: &LabelImage) {
        (**self).set_expected(expected);
    }

    fn compute(&mut self, actual: &LabelImage) -> Result<Vec<f64>> {
        (**self).compute(actual)
    }

    fn aggregation(&self) -> Aggregation {
        (**self).aggregation()
    }

    fn default_name(&self) -> String {
        (**self).default_name()
    }
}

/// A measure defined on the union of all foreground, which can be lifted to
/// the object level.
pub trait ImageMeasure: Measure + Sized {
    /// Reduction used when several candidate objects match a reference object.
    fn correspondence(&self) -> Correspondence;

    /// Evaluate this measure per reference object.
    fn object_based(self) -> ObjectBased<Self> {
        ObjectBased::new(self)
    }
}

/// Adapter constructors available on every measure.
pub trait MeasureExt: Measure + Clone + Sized + 'static {
    /// Evaluate with the roles of expected and actual swapped.
    fn reversed(self) -> Reversed<Self> {
        Reversed::new(self)
    }

    /// Evaluate in both directions and concatenate the scores.
    fn symmetric(self) -> Symmetric<Self, Reversed<Self>> {
        Symmetric::mirrored(self)
    }

    /// Type-erase this measure.
    fn boxed(self) -> Box<dyn Measure> {
        Box::new(self)
    }
}

impl<M> MeasureExt for M where M: Measure + Clone + Sized + 'static {}

/// The expected image of a measure, or [`Error::ExpectedNotSet`].
pub(crate) fn require_expected(
    expected: Option<&LabelImage>,
    measure: &dyn Measure,
) -> Result<LabelImage> {
    expected.cloned().ok_or_else(|| Error::ExpectedNotSet {
        measure: measure.default_name(),
    })
}
