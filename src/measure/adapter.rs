//! Measure adapters: object-level evaluation, role reversal and symmetry.

use std::collections::HashMap;

use tracing::trace;

use crate::error::{Error, Result};
use crate::label::{BinaryImage, ImageId, LabelImage, Window};
use crate::measure::{
    Aggregation, Correspondence, ImageMeasure, Measure, require_expected,
};

/// Candidate labels of `actual` that may correspond to `reference`.
///
/// The closest candidate is the label with the smallest distance to the
/// reference object (ties go to the smallest label). Its largest distance is
/// the search radius: every label with some pixel inside that radius is a
/// candidate. Returned labels are sorted.
#[must_use]
pub fn candidate_labels(reference: &BinaryImage, actual: &LabelImage) -> Vec<u32> {
    if !reference.any() {
        return Vec::new();
    }
    let distances = reference.squared_distance_map();

    // (min, max) squared distance per label
    let mut extents: HashMap<u32, (f64, f64)> = HashMap::new();
    for (label, &distance) in actual.pixels().zip(&distances) {
        if label == 0 {
            continue;
        }
        extents
            .entry(label)
            .and_modify(|(min, max)| {
                *min = min.min(distance);
                *max = max.max(distance);
            })
            .or_insert((distance, distance));
    }

    let labels = actual.labels();
    let closest = labels
        .iter()
        .filter_map(|label| extents.get(label))
        .min_by(|a, b| a.0.total_cmp(&b.0));
    let Some(&(_, radius)) = closest else {
        return Vec::new();
    };
    labels
        .into_iter()
        .filter(|label| extents.get(label).is_some_and(|(min, _)| *min <= radius))
        .collect()
}

#[derive(Clone, Default)]
struct CandidateCache {
    actual: Option<ImageId>,
    candidates: HashMap<u32, Vec<u32>>,
}

impl CandidateCache {
    fn reset(&mut self, actual: Option<ImageId>) {
        self.actual = actual;
        self.candidates.clear();
    }
}

/// Evaluates an image-level measure once per reference object.
///
/// For every object of the expected image, the candidate objects of the
/// actual image are determined (see [`candidate_labels`]), the inner measure
/// is computed on a cropped pair of masks for each candidate, and the
/// candidate scores are reduced with the measure's [`Correspondence`]. The
/// result holds one score per reference object.
///
/// Candidate sets are cached per reference object and invalidated when the
/// expected image is replaced, when a different actual image is passed to
/// [`Measure::compute`], or by [`ObjectBased::clear_cache`].
pub struct ObjectBased<M> {
    inner: M,
    correspondence: Correspondence,
    aggregation: Aggregation,
    no_detections: Option<f64>,
    expected: Option<LabelImage>,
    cache: CandidateCache,
}

impl<M: ImageMeasure> ObjectBased<M> {
    /// Lift `inner` to the object level using its own correspondence.
    pub fn new(inner: M) -> Self {
        let correspondence = inner.correspondence();
        Self::with_correspondence(inner, correspondence)
    }
}

impl<M: Measure> ObjectBased<M> {
    /// Lift `inner` to the object level with an explicit correspondence.
    pub fn with_correspondence(inner: M, correspondence: Correspondence) -> Self {
        let aggregation = inner.aggregation();
        Self {
            inner,
            correspondence,
            aggregation,
            no_detections: None,
            expected: None,
            cache: CandidateCache::default(),
        }
    }

    /// Score reported for each reference object when the actual image has
    /// no objects at all. A negative value disables the score (default).
    #[must_use]
    pub fn with_no_detections(mut self, value: f64) -> Self {
        self.no_detections = (value >= 0.0).then_some(value);
        self
    }

    /// Override the aggregation inherited from the inner measure.
    #[must_use]
    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    /// Score used when there are no detections, if enabled.
    #[must_use]
    pub fn no_detections(&self) -> Option<f64> {
        self.no_detections
    }

    /// Reduction applied to the candidate scores.
    #[must_use]
    pub fn correspondence(&self) -> Correspondence {
        self.correspondence
    }

    /// The wrapped image-level measure.
    pub fn inner(&self) -> &M {
        &self.inner
    }

    /// Drop all cached candidate sets.
    pub fn clear_cache(&mut self) {
        self.cache.reset(None);
    }

    /// Score of one reference/candidate pair, `None` if the inner measure
    /// leaves it undefined.
    fn score_pair(&mut self, reference: &BinaryImage, segmented: &BinaryImage) -> Result<Option<f64>> {
        let Some(window) = Window::bounding(&[reference, segmented], 1) else {
            return Ok(None);
        };
        self.inner.set_expected(&segmented.crop(window).to_labels());
        let scores = self.inner.compute(&reference.crop(window).to_labels())?;
        match scores.as_slice() {
            [] => Ok(None),
            [score] => Ok(Some(*score)),
            _ => Err(Error::ScoreCount {
                measure: self.inner.default_name(),
                count: scores.len(),
            }),
        }
    }
}

impl<M: Clone> Clone for ObjectBased<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            correspondence: self.correspondence,
            aggregation: self.aggregation,
            no_detections: self.no_detections,
            expected: self.expected.clone(),
            cache: CandidateCache::default(),
        }
    }
}

impl<M> Measure for ObjectBased<M>
where
    M: Measure + Clone + 'static,
{
    fn set_expected(&mut self, expected: &LabelImage) {
        self.expected = Some(expected.clone());
        self.cache.reset(None);
    }

    fn compute(&mut self, actual: &LabelImage) -> Result<Vec<f64>> {
        let expected = require_expected(self.expected.as_ref(), self)?;
        expected.ensure_same_size(actual)?;

        if self.cache.actual != Some(actual.id()) {
            trace!(measure = %self.default_name(), "resetting candidate cache");
            self.cache.reset(Some(actual.id()));
        }

        let detections = actual.labels();
        let mut results = Vec::new();
        for reference_label in expected.labels() {
            if detections.is_empty() {
                results.extend(self.no_detections);
                continue;
            }

            let reference = expected.mask(reference_label);
            let candidates = self
                .cache
                .candidates
                .entry(reference_label)
                .or_insert_with(|| candidate_labels(&reference, actual))
                .clone();

            let mut scores = Vec::with_capacity(candidates.len());
            for label in candidates {
                let segmented = actual.mask(label);
                if let Some(score) = self.score_pair(&reference, &segmented)? {
                    scores.push(score);
                }
            }
            results.extend(self.correspondence.reduce(&scores));
        }
        Ok(results)
    }

    fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    fn default_name(&self) -> String {
        format!("Ob. {}", self.inner.default_name())
    }
}

/// Evaluates a measure with the roles of expected and actual swapped.
#[derive(Clone)]
pub struct Reversed<M> {
    inner: M,
    expected: Option<LabelImage>,
}

impl<M: Measure> Reversed<M> {
    /// Wrap `inner`.
    pub fn new(inner: M) -> Self {
        Self {
            inner,
            expected: None,
        }
    }

    /// The wrapped measure.
    pub fn inner(&self) -> &M {
        &self.inner
    }
}

impl<M> Measure for Reversed<M>
where
    M: Measure + Clone + 'static,
{
    fn set_expected(&mut self, expected: &LabelImage) {
        self.expected = Some(expected.clone());
    }

    fn compute(&mut self, actual: &LabelImage) -> Result<Vec<f64>> {
        let expected = require_expected(self.expected.as_ref(), self)?;
        self.inner.set_expected(actual);
        self.inner.compute(&expected)
    }

    fn aggregation(&self) -> Aggregation {
        self.inner.aggregation()
    }

    fn default_name(&self) -> String {
        format!("Rev. {}", self.inner.default_name())
    }
}

/// Evaluates two measures with a common aggregation and concatenates their
/// scores, usually a measure and its reversal.
#[derive(Clone)]
pub struct Symmetric<A, B> {
    forward: A,
    backward: B,
}

impl<A: Measure, B: Measure> Symmetric<A, B> {
    /// Combine two measures. Fails if their aggregations differ.
    pub fn new(forward: A, backward: B) -> Result<Self> {
        let (first, second) = (forward.aggregation(), backward.aggregation());
        if first != second {
            return Err(Error::AggregationMismatch { first, second });
        }
        Ok(Self { forward, backward })
    }
}

impl<M: Measure + Clone> Symmetric<M, Reversed<M>> {
    /// Combine `measure` with its own reversal.
    pub fn mirrored(measure: M) -> Self {
        let backward = Reversed::new(measure.clone());
        Self {
            forward: measure,
            backward,
        }
    }
}

impl<A, B> Measure for Symmetric<A, B>
where
    A: Measure + Clone + 'static,
    B: Measure + Clone + 'static,
{
    fn set_expected(&mut self, expected: &LabelImage) {
        self.forward.set_expected(expected);
        self.backward.set_expected(expected);
    }

    fn compute(&mut self, actual: &LabelImage) -> Result<Vec<f64>> {
        let mut scores = self.forward.compute(actual)?;
        scores.extend(self.backward.compute(actual)?);
        Ok(scores)
    }

    fn aggregation(&self) -> Aggregation {
        self.forward.aggregation()
    }

    fn default_name(&self) -> String {
        format!("Sym. {}", self.forward.default_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measure::{Dice, FalseSplit, Hausdorff, MeasureExt};
    use approx::assert_relative_eq;

    fn square(x0: usize, y0: usize, size: usize) -> impl Fn(usize, usize) -> bool {
        move |x, y| (x0..x0 + size).contains(&x) && (y0..y0 + size).contains(&y)
    }

    /// Two 10x10 reference squares.
    fn reference() -> LabelImage {
        let a = square(5, 5, 10);
        let b = square(30, 30, 10);
        LabelImage::from_fn(50, 50, |x, y| {
            if a(x, y) {
                1
            } else if b(x, y) {
                2
            } else {
                0
            }
        })
    }

    #[test]
    fn test_object_based_perfect_match() {
        let expected = reference();
        let mut measure = Dice::default().object_based();
        measure.set_expected(&expected);
        let scores = measure.compute(&expected).unwrap();
        assert_eq!(scores, vec![1.0, 1.0]);
    }

    #[test]
    fn test_object_based_shifted_objects() {
        let expected = reference();
        let a = square(6, 5, 10);
        let actual = LabelImage::from_fn(50, 50, |x, y| if a(x, y) { 4 } else { 0 });

        let mut measure = Dice::default().object_based();
        measure.set_expected(&expected);
        let scores = measure.compute(&actual).unwrap();

        assert_eq!(scores.len(), 2);
        assert_relative_eq!(scores[0], 0.9);
        // The far object still gets its closest candidate.
        assert_relative_eq!(scores[1], 0.0);
    }

    #[test]
    fn test_object_based_no_detections() {
        let expected = reference();
        let empty = LabelImage::zeros(50, 50);

        let mut measure = Dice::default().object_based();
        measure.set_expected(&expected);
        assert!(measure.compute(&empty).unwrap().is_empty());

        let mut measure = Hausdorff::default().object_based().with_no_detections(100.0);
        measure.set_expected(&expected);
        assert_eq!(measure.compute(&empty).unwrap(), vec![100.0, 100.0]);

        let measure = Dice::default().object_based().with_no_detections(-1.0);
        assert_eq!(measure.no_detections(), None);
    }

    #[test]
    fn test_object_based_empty_reference() {
        let mut measure = Dice::default().object_based();
        measure.set_expected(&LabelImage::zeros(50, 50));
        assert!(measure.compute(&reference()).unwrap().is_empty());
    }

    #[test]
    fn test_object_based_requires_expected() {
        let mut measure = Dice::default().object_based();
        assert!(matches!(
            measure.compute(&reference()),
            Err(Error::ExpectedNotSet { .. })
        ));
    }

    #[test]
    fn test_object_based_rejects_multi_score_measures() {
        let expected = reference();
        let mut measure =
            ObjectBased::with_correspondence(Dice::default().symmetric(), Correspondence::Max);
        measure.set_expected(&expected);
        assert!(matches!(
            measure.compute(&expected),
            Err(Error::ScoreCount { count: 2, .. })
        ));
    }

    #[derive(Clone)]
    struct Undefined;

    impl Measure for Undefined {
        fn set_expected(&mut self, _: &LabelImage) {}

        fn compute(&mut self, _: &LabelImage) -> Result<Vec<f64>> {
            Ok(Vec::new())
        }

        fn aggregation(&self) -> Aggregation {
            Aggregation::Mean
        }

        fn default_name(&self) -> String {
            "Undefined".to_string()
        }
    }

    #[test]
    fn test_object_based_skips_undefined_pairs() {
        let expected = reference();
        let mut measure = ObjectBased::with_correspondence(Undefined, Correspondence::Max);
        measure.set_expected(&expected);
        assert!(measure.compute(&expected).unwrap().is_empty());
    }

    #[test]
    fn test_object_based_inherits_aggregation() {
        let measure = ObjectBased::with_correspondence(FalseSplit::default(), Correspondence::Max);
        assert_eq!(measure.aggregation(), Aggregation::Sum);
        let measure = measure.with_aggregation(Aggregation::ObjectMean);
        assert_eq!(measure.aggregation(), Aggregation::ObjectMean);
    }

    #[test]
    fn test_cache_follows_expected_image() {
        let expected = reference();
        let mut measure = Dice::default().object_based();
        measure.set_expected(&expected);
        assert_eq!(measure.compute(&expected).unwrap(), vec![1.0, 1.0]);

        // Same actual image, different reference: candidates must be recomputed.
        let other = LabelImage::from_fn(50, 50, |x, y| u32::from(square(30, 30, 10)(x, y)));
        measure.set_expected(&other);
        assert_eq!(measure.compute(&expected).unwrap(), vec![1.0]);

        measure.clear_cache();
        assert_eq!(measure.compute(&expected).unwrap(), vec![1.0]);
    }

    #[test]
    fn test_cache_follows_actual_image() {
        let expected = reference();
        let mut measure = Dice::default().object_based();
        measure.set_expected(&expected);
        assert_eq!(measure.compute(&expected).unwrap(), vec![1.0, 1.0]);

        // Same objects with swapped labels: stale candidates would pair each
        // reference object with the other square.
        let swapped = LabelImage::from_fn(50, 50, |x, y| match expected.get(x, y) {
            1 => 2,
            2 => 1,
            _ => 0,
        });
        assert_eq!(measure.compute(&swapped).unwrap(), vec![1.0, 1.0]);
        assert_eq!(measure.cache.actual, Some(swapped.id()));
        assert_eq!(measure.cache.candidates[&1], vec![2]);
    }

    #[test]
    fn test_candidate_labels() {
        let reference = BinaryImage::from_fn(40, 40, square(10, 10, 10));
        // Label 1 overlaps the reference and reaches 5 pixels beyond it,
        // label 2 is within that reach, label 3 is far away.
        let actual = LabelImage::from_fn(40, 40, |x, y| {
            if square(12, 10, 13)(x, y) && y < 20 {
                1
            } else if (22..24).contains(&x) && (21..23).contains(&y) {
                2
            } else if x > 36 && y > 36 {
                3
            } else {
                0
            }
        });
        assert_eq!(candidate_labels(&reference, &actual), vec![1, 2]);
        assert!(candidate_labels(&reference, &LabelImage::zeros(40, 40)).is_empty());
    }

    #[test]
    fn test_reversed_swaps_roles() {
        let big = LabelImage::from_fn(10, 10, |x, _| u32::from(x < 6));
        let small = LabelImage::from_fn(10, 10, |x, _| u32::from(x < 2));

        let mut forward = FalseSplit::default();
        forward.set_expected(&big);
        let mut reversed = FalseSplit::default().reversed();
        reversed.set_expected(&small);

        assert_eq!(
            forward.compute(&small).unwrap(),
            reversed.compute(&big).unwrap()
        );
        assert_eq!(reversed.aggregation(), Aggregation::Sum);
    }

    #[test]
    fn test_symmetric_concatenates() {
        let expected = reference();
        let mut measure = Dice::default().object_based().symmetric();
        measure.set_expected(&expected);
        assert_eq!(measure.compute(&expected).unwrap(), vec![1.0; 4]);
    }

    #[test]
    fn test_symmetric_aggregation_mismatch() {
        let result = Symmetric::new(Dice::default(), FalseSplit::default());
        assert!(matches!(
            result,
            Err(Error::AggregationMismatch {
                first: Aggregation::Mean,
                second: Aggregation::Sum,
            })
        ));
        assert!(Symmetric::new(Dice::default(), Dice::default().reversed()).is_ok());
    }

    #[test]
    fn test_clone_starts_with_empty_cache() {
        let expected = reference();
        let mut measure = Dice::default().object_based();
        measure.set_expected(&expected);
        measure.compute(&expected).unwrap();
        let copy = measure.clone();
        assert!(copy.cache.candidates.is_empty());
        assert!(copy.cache.actual.is_none());
    }
}
