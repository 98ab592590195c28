//! Contour-based distance measures.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::label::{BinaryImage, LabelImage};
use crate::measure::{Aggregation, Correspondence, ImageMeasure, Measure};
use crate::stats::quantile_max;

/// Precomputed data of the expected foreground, shared between clones.
struct Reference {
    dimensions: (usize, usize),
    mask: BinaryImage,
    contour: BinaryImage,
    /// Distance of every pixel to the expected contour.
    distances: Vec<f64>,
}

impl Reference {
    fn new(expected: &LabelImage) -> Self {
        let mask = expected.foreground();
        let contour = mask.contour();
        let distances = contour.distance_map();
        Self {
            dimensions: expected.dimensions(),
            mask,
            contour,
            distances,
        }
    }

    fn check(reference: Option<&Arc<Self>>, measure: &dyn Measure, actual: &LabelImage) -> Result<Arc<Self>> {
        let reference = reference.cloned().ok_or_else(|| Error::ExpectedNotSet {
            measure: measure.default_name(),
        })?;
        if reference.dimensions != actual.dimensions() {
            return Err(Error::DimensionMismatch {
                expected: reference.dimensions,
                actual: actual.dimensions(),
            });
        }
        Ok(reference)
    }
}

/// Hausdorff distance of the foreground contours.
///
/// The distance from every pixel of the actual contour to the expected
/// contour is collected and reduced with the `quantile`-th order statistic;
/// `quantile = 1` yields the classic (directed) Hausdorff distance.
/// Undefined if either contour is empty.
#[derive(Clone)]
pub struct Hausdorff {
    quantile: f64,
    aggregation: Aggregation,
    reference: Option<Arc<Reference>>,
}

impl Default for Hausdorff {
    fn default() -> Self {
        Self {
            quantile: 1.0,
            aggregation: Aggregation::Mean,
            reference: None,
        }
    }
}

impl Hausdorff {
    /// Hausdorff distance at the given quantile, which must lie in `(0, 1]`.
    pub fn with_quantile(quantile: f64) -> Result<Self> {
        if !(quantile > 0.0 && quantile <= 1.0) {
            return Err(Error::InvalidParameter {
                name: "quantile".to_string(),
                reason: format!("{quantile} is not in (0, 1]"),
            });
        }
        Ok(Self {
            quantile,
            ..Self::default()
        })
    }

    /// Override the default aggregation.
    #[must_use]
    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    /// Quantile of the contour distances reported.
    #[must_use]
    pub fn quantile(&self) -> f64 {
        self.quantile
    }
}

impl Measure for Hausdorff {
    fn set_expected(&mut self, expected: &LabelImage) {
        self.reference = Some(Arc::new(Reference::new(expected)));
    }

    fn compute(&mut self, actual: &LabelImage) -> Result<Vec<f64>> {
        let reference = Reference::check(self.reference.as_ref(), self, actual)?;
        let contour = actual.foreground().contour();
        if !reference.contour.any() || !contour.any() {
            return Ok(Vec::new());
        }
        let distances: Vec<f64> = contour
            .pixels()
            .zip(&reference.distances)
            .filter_map(|(on_contour, &distance)| on_contour.then_some(distance))
            .collect();
        Ok(quantile_max(&distances, self.quantile).into_iter().collect())
    }

    fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    fn default_name(&self) -> String {
        if self.quantile >= 1.0 {
            "HSD".to_string()
        } else {
            format!("HSD (Q={})", self.quantile)
        }
    }
}

impl ImageMeasure for Hausdorff {
    fn correspondence(&self) -> Correspondence {
        Correspondence::Min
    }
}

/// Normalized sum of distances.
///
/// Sums the distance to the expected contour over the pixels where actual
/// and expected foreground disagree, relative to the same sum over the union
/// of both. 0 means a perfect match. Undefined if the union is empty.
#[derive(Clone, Default)]
pub struct Nsd {
    aggregation: Aggregation,
    reference: Option<Arc<Reference>>,
}

impl Nsd {
    /// Override the default aggregation.
    #[must_use]
    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }
}

impl Measure for Nsd {
    fn set_expected(&mut self, expected: &LabelImage) {
        self.reference = Some(Arc::new(Reference::new(expected)));
    }

    fn compute(&mut self, actual: &LabelImage) -> Result<Vec<f64>> {
        let reference = Reference::check(self.reference.as_ref(), self, actual)?;
        if !reference.contour.any() {
            return Ok(Vec::new());
        }
        let mut difference = 0.0;
        let mut union = 0.0;
        let pixels = reference.mask.pixels().zip(actual.pixels());
        for ((expected, label), &distance) in pixels.zip(&reference.distances) {
            let actual = label > 0;
            if expected || actual {
                union += distance;
            }
            if expected != actual {
                difference += distance;
            }
        }
        if union == 0.0 {
            return Ok(Vec::new());
        }
        Ok(vec![difference / union])
    }

    fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    fn default_name(&self) -> String {
        "NSD".to_string()
    }
}

impl ImageMeasure for Nsd {
    fn correspondence(&self) -> Correspondence {
        Correspondence::Min
    }
}
