//! Object detection error counts.
//!
//! Every object of one image is assigned to the label of the other image it
//! overlaps most (ties go to the smaller label, background included). Split,
//! merge, spurious and missing objects are read off these assignments.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::Result;
use crate::label::LabelImage;
use crate::measure::{Aggregation, Measure, require_expected};

/// Objects of `from`, grouped by the label of `onto` they overlap most.
///
/// Objects assigned to background are grouped under label 0.
fn assign(from: &LabelImage, onto: &LabelImage) -> Result<BTreeMap<u32, BTreeSet<u32>>> {
    let table = from.contingency(onto)?;

    // from label -> (best onto label, overlap)
    let mut best: HashMap<u32, (u32, u64)> = HashMap::new();
    for (&(source, target), &overlap) in &table {
        if source == 0 {
            continue;
        }
        best.entry(source)
            .and_modify(|(label, count)| {
                if overlap > *count || (overlap == *count && target < *label) {
                    *label = target;
                    *count = overlap;
                }
            })
            .or_insert((target, overlap));
    }

    let mut groups: BTreeMap<u32, BTreeSet<u32>> = BTreeMap::new();
    for (source, (target, _)) in best {
        groups.entry(target).or_default().insert(source);
    }
    Ok(groups)
}

/// Number of groups of at least two objects assigned to the same object.
fn count_shared(groups: &BTreeMap<u32, BTreeSet<u32>>) -> usize {
    groups
        .iter()
        .filter(|&(&label, members)| label > 0 && members.len() > 1)
        .count()
}

/// Number of objects assigned to background.
fn count_background(groups: &BTreeMap<u32, BTreeSet<u32>>) -> usize {
    groups.get(&0).map_or(0, BTreeSet::len)
}

macro_rules! detection_measure {
    ($(#[$meta:meta])* $name:ident, $label:literal, |$expected:ident, $actual:ident| $count:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $name {
            aggregation: Aggregation,
            expected: Option<LabelImage>,
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    aggregation: Aggregation::Sum,
                    expected: None,
                }
            }
        }

        impl $name {
            /// Override the default aggregation, typically with
            /// [`Aggregation::ObjectMean`] to report a rate per object.
            #[must_use]
            pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
                self.aggregation = aggregation;
                self
            }
        }

        impl Measure for $name {
            fn set_expected(&mut self, expected: &LabelImage) {
                self.expected = Some(expected.clone());
            }

            fn compute(&mut self, $actual: &LabelImage) -> Result<Vec<f64>> {
                let $expected = require_expected(self.expected.as_ref(), self)?;
                let count: usize = $count;
                Ok(vec![count as f64])
            }

            fn aggregation(&self) -> Aggregation {
                self.aggregation
            }

            fn default_name(&self) -> String {
                $label.to_string()
            }
        }
    };
}

detection_measure!(
    /// Counts reference objects split into several segmented objects.
    FalseSplit,
    "Split",
    |expected, actual| count_shared(&assign(actual, &expected)?)
);

detection_measure!(
    /// Counts segmented objects covering several reference objects.
    FalseMerge,
    "Merge",
    |expected, actual| count_shared(&assign(&expected, actual)?)
);

detection_measure!(
    /// Counts segmented objects that mostly cover background (spurious).
    FalsePositive,
    "Spurious",
    |expected, actual| count_background(&assign(actual, &expected)?)
);

detection_measure!(
    /// Counts reference objects that are mostly not segmented (missing).
    FalseNegative,
    "Missing",
    |expected, actual| count_background(&assign(&expected, actual)?)
);

#[cfg(test)]
mod tests {
    use super::*;

    fn compute(measure: &mut impl Measure, expected: &LabelImage, actual: &LabelImage) -> f64 {
        measure.set_expected(expected);
        let scores = measure.compute(actual).unwrap();
        assert_eq!(scores.len(), 1);
        scores[0]
    }

    /// Reference: two objects in a 12x4 image, columns 0..4 and 6..10.
    fn reference() -> LabelImage {
        LabelImage::from_fn(12, 4, |x, _| match x {
            0..=3 => 1,
            6..=9 => 2,
            _ => 0,
        })
    }

    #[test]
    fn test_perfect_segmentation() {
        let expected = reference();
        assert_eq!(compute(&mut FalseSplit::default(), &expected, &expected), 0.0);
        assert_eq!(compute(&mut FalseMerge::default(), &expected, &expected), 0.0);
        assert_eq!(compute(&mut FalsePositive::default(), &expected, &expected), 0.0);
        assert_eq!(compute(&mut FalseNegative::default(), &expected, &expected), 0.0);
    }

    #[test]
    fn test_split() {
        let actual = LabelImage::from_fn(12, 4, |x, _| match x {
            0..=1 => 1,
            2..=3 => 2,
            6..=9 => 3,
            _ => 0,
        });
        assert_eq!(compute(&mut FalseSplit::default(), &reference(), &actual), 1.0);
        assert_eq!(compute(&mut FalseMerge::default(), &reference(), &actual), 0.0);
    }

    #[test]
    fn test_merge() {
        let actual = LabelImage::from_fn(12, 4, |x, _| u32::from(x < 10));
        assert_eq!(compute(&mut FalseMerge::default(), &reference(), &actual), 1.0);
        assert_eq!(compute(&mut FalseSplit::default(), &reference(), &actual), 0.0);
    }

    #[test]
    fn test_spurious_and_missing() {
        // Object 2 is missed, a spurious object sits in the gap and one on the edge.
        let actual = LabelImage::from_fn(12, 4, |x, _| match x {
            0..=3 => 5,
            4..=5 => 6,
            11 => 7,
            _ => 0,
        });
        assert_eq!(compute(&mut FalsePositive::default(), &reference(), &actual), 2.0);
        assert_eq!(compute(&mut FalseNegative::default(), &reference(), &actual), 1.0);
    }

    #[test]
    fn test_ties_prefer_background() {
        // Half of the segmented object lies on background, half on object 1.
        let expected = LabelImage::from_fn(4, 1, |x, _| u32::from(x < 1));
        let actual = LabelImage::from_fn(4, 1, |x, _| u32::from(x < 2));
        assert_eq!(compute(&mut FalsePositive::default(), &expected, &actual), 1.0);
    }

    #[test]
    fn test_empty_images() {
        let empty = LabelImage::zeros(12, 4);
        assert_eq!(compute(&mut FalsePositive::default(), &empty, &empty), 0.0);
        assert_eq!(compute(&mut FalseNegative::default(), &reference(), &empty), 2.0);
    }

    #[test]
    fn test_default_aggregation_is_sum() {
        assert_eq!(FalseSplit::default().aggregation(), Aggregation::Sum);
        assert_eq!(
            FalseNegative::default()
                .with_aggregation(Aggregation::ObjectMean)
                .aggregation(),
            Aggregation::ObjectMean
        );
    }
}
