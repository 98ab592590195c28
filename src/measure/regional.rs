//! Overlap and pair-counting measures.

use std::collections::{BTreeMap, HashMap};

use crate::error::Result;
use crate::label::LabelImage;
use crate::measure::{Aggregation, Correspondence, ImageMeasure, Measure, require_expected};

/// Implements the builder, accessors and [`ImageMeasure`] for a measure that
/// only stores its aggregation and expected image.
macro_rules! overlap_measure {
    ($name:ident) => {
        impl $name {
            /// Override the default aggregation.
            #[must_use]
            pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
                self.aggregation = aggregation;
                self
            }
        }

        impl ImageMeasure for $name {
            fn correspondence(&self) -> Correspondence {
                Correspondence::Max
            }
        }
    };
}

/// Dice similarity coefficient of the foreground: `2|A ∩ E| / (|A| + |E|)`.
#[derive(Debug, Clone, Default)]
pub struct Dice {
    aggregation: Aggregation,
    expected: Option<LabelImage>,
}

overlap_measure!(Dice);

impl Measure for Dice {
    fn set_expected(&mut self, expected: &LabelImage) {
        self.expected = Some(expected.clone());
    }

    fn compute(&mut self, actual: &LabelImage) -> Result<Vec<f64>> {
        let expected = require_expected(self.expected.as_ref(), self)?;
        let counts = ForegroundCounts::new(&expected, actual)?;
        let denominator = counts.expected + counts.actual;
        if denominator == 0 {
            return Ok(Vec::new());
        }
        Ok(vec![2.0 * counts.both as f64 / denominator as f64])
    }

    fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    fn default_name(&self) -> String {
        "Dice".to_string()
    }
}

/// Jaccard coefficient of the foreground: `|A ∩ E| / |A ∪ E|`.
#[derive(Debug, Clone, Default)]
pub struct JaccardCoefficient {
    aggregation: Aggregation,
    expected: Option<LabelImage>,
}

overlap_measure!(JaccardCoefficient);

impl Measure for JaccardCoefficient {
    fn set_expected(&mut self, expected: &LabelImage) {
        self.expected = Some(expected.clone());
    }

    fn compute(&mut self, actual: &LabelImage) -> Result<Vec<f64>> {
        let expected = require_expected(self.expected.as_ref(), self)?;
        let counts = ForegroundCounts::new(&expected, actual)?;
        let union = counts.expected + counts.actual - counts.both;
        if union == 0 {
            return Ok(Vec::new());
        }
        Ok(vec![counts.both as f64 / union as f64])
    }

    fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    fn default_name(&self) -> String {
        "Jaccard coef.".to_string()
    }
}

/// Pair-counting Jaccard index of two labelings.
///
/// Counts pixel pairs that are in the same object in both images, relative to
/// pairs in the same object in at least one of them.
#[derive(Debug, Clone, Default)]
pub struct JaccardIndex {
    aggregation: Aggregation,
    expected: Option<LabelImage>,
}

overlap_measure!(JaccardIndex);

impl Measure for JaccardIndex {
    fn set_expected(&mut self, expected: &LabelImage) {
        self.expected = Some(expected.clone());
    }

    fn compute(&mut self, actual: &LabelImage) -> Result<Vec<f64>> {
        let expected = require_expected(self.expected.as_ref(), self)?;
        let pairs = PairCounts::new(&expected, actual)?;
        let denominator = pairs.both + pairs.expected_only + pairs.actual_only;
        if denominator == 0 {
            return Ok(Vec::new());
        }
        Ok(vec![pairs.both as f64 / denominator as f64])
    }

    fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    fn default_name(&self) -> String {
        "Jaccard index".to_string()
    }
}

/// Rand index: fraction of pixel pairs on which both labelings agree.
#[derive(Debug, Clone, Default)]
pub struct RandIndex {
    aggregation: Aggregation,
    expected: Option<LabelImage>,
}

overlap_measure!(RandIndex);

impl Measure for RandIndex {
    fn set_expected(&mut self, expected: &LabelImage) {
        self.expected = Some(expected.clone());
    }

    fn compute(&mut self, actual: &LabelImage) -> Result<Vec<f64>> {
        let expected = require_expected(self.expected.as_ref(), self)?;
        let pairs = PairCounts::new(&expected, actual)?;
        if pairs.total == 0 {
            return Ok(Vec::new());
        }
        Ok(vec![(pairs.both + pairs.neither()) as f64 / pairs.total as f64])
    }

    fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    fn default_name(&self) -> String {
        "Rand".to_string()
    }
}

/// Rand index adjusted for chance (Hubert and Arabie).
///
/// Identical labelings score 1, random labelings score around 0. If the
/// maximum index equals its expectation, the score is 1.
#[derive(Debug, Clone, Default)]
pub struct AdjustedRandIndex {
    aggregation: Aggregation,
    expected: Option<LabelImage>,
}

overlap_measure!(AdjustedRandIndex);

impl Measure for AdjustedRandIndex {
    fn set_expected(&mut self, expected: &LabelImage) {
        self.expected = Some(expected.clone());
    }

    fn compute(&mut self, actual: &LabelImage) -> Result<Vec<f64>> {
        let expected = require_expected(self.expected.as_ref(), self)?;
        let pairs = PairCounts::new(&expected, actual)?;
        if pairs.total == 0 {
            return Ok(Vec::new());
        }
        let same_expected = (pairs.both + pairs.expected_only) as f64;
        let same_actual = (pairs.both + pairs.actual_only) as f64;
        let expected_index = same_expected * same_actual / pairs.total as f64;
        let max_index = (same_expected + same_actual) / 2.0;
        if max_index == expected_index {
            return Ok(vec![1.0]);
        }
        Ok(vec![(pairs.both as f64 - expected_index) / (max_index - expected_index)])
    }

    fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    fn default_name(&self) -> String {
        "ARI".to_string()
    }
}

/// SEG score of the ISBI cell tracking challenge.
///
/// Every reference object is matched to the candidate object that covers
/// more than half of it, and scores the Jaccard coefficient of the pair, or 0
/// if there is no such candidate. Yields one score per reference object.
#[derive(Debug, Clone, Default)]
pub struct IsbiScore {
    aggregation: Aggregation,
    expected: Option<LabelImage>,
}

impl IsbiScore {
    /// Override the default aggregation.
    #[must_use]
    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }
}

impl Measure for IsbiScore {
    fn set_expected(&mut self, expected: &LabelImage) {
        self.expected = Some(expected.clone());
    }

    fn compute(&mut self, actual: &LabelImage) -> Result<Vec<f64>> {
        let expected = require_expected(self.expected.as_ref(), self)?;
        let table = expected.contingency(actual)?;

        let mut reference_sizes: BTreeMap<u32, u64> = BTreeMap::new();
        let mut segment_sizes: HashMap<u32, u64> = HashMap::new();
        for (&(reference, segment), &count) in &table {
            *reference_sizes.entry(reference).or_default() += count;
            *segment_sizes.entry(segment).or_default() += count;
        }

        let scores = reference_sizes
            .iter()
            .filter(|&(&reference, _)| reference > 0)
            .map(|(&reference, &size)| {
                let matched = table.iter().find(|&(&(r, s), &overlap)| {
                    r == reference && s > 0 && 2 * overlap > size
                });
                match matched {
                    Some((&(_, segment), &overlap)) => {
                        let union = size + segment_sizes[&segment] - overlap;
                        overlap as f64 / union as f64
                    }
                    None => 0.0,
                }
            })
            .collect();
        Ok(scores)
    }

    fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    fn default_name(&self) -> String {
        "SEG".to_string()
    }
}

/// Foreground pixel counts of an image pair.
struct ForegroundCounts {
    expected: u64,
    actual: u64,
    both: u64,
}

impl ForegroundCounts {
    fn new(expected: &LabelImage, actual: &LabelImage) -> Result<Self> {
        expected.ensure_same_size(actual)?;
        let mut counts = Self {
            expected: 0,
            actual: 0,
            both: 0,
        };
        for (e, a) in expected.pixels().zip(actual.pixels()) {
            let (e, a) = (e > 0, a > 0);
            counts.expected += u64::from(e);
            counts.actual += u64::from(a);
            counts.both += u64::from(e && a);
        }
        Ok(counts)
    }
}

/// Pixel pair counts of two labelings, background included as a label.
struct PairCounts {
    /// Pairs in the same object in both labelings.
    both: u64,
    /// Pairs in the same object in the expected labeling only.
    expected_only: u64,
    /// Pairs in the same object in the actual labeling only.
    actual_only: u64,
    total: u64,
}

impl PairCounts {
    fn new(expected: &LabelImage, actual: &LabelImage) -> Result<Self> {
        let table = expected.contingency(actual)?;
        let mut rows: HashMap<u32, u64> = HashMap::new();
        let mut columns: HashMap<u32, u64> = HashMap::new();
        let mut both = 0;
        let mut pixels = 0;
        for (&(e, a), &count) in &table {
            *rows.entry(e).or_default() += count;
            *columns.entry(a).or_default() += count;
            both += pairs(count);
            pixels += count;
        }
        let same_expected: u64 = rows.values().map(|&n| pairs(n)).sum();
        let same_actual: u64 = columns.values().map(|&n| pairs(n)).sum();
        Ok(Self {
            both,
            expected_only: same_expected - both,
            actual_only: same_actual - both,
            total: pairs(pixels),
        })
    }

    fn neither(&self) -> u64 {
        self.total - self.both - self.expected_only - self.actual_only
    }
}

fn pairs(n: u64) -> u64 {
    n * n.saturating_sub(1) / 2
}
