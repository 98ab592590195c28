//! Study: registered measures and their per-sample results.
//!
//! A [`Study`] owns a set of uniquely named measures. The expected image is
//! set once per ground truth, then every candidate image is processed under a
//! caller-supplied sample id. Results are stored per measure and sample, and
//! can be aggregated, merged with other studies, and exported as a [`Table`].
//!
//! # Example
//!
//! ```
//! use segmetrics::label::Image;
//! use segmetrics::measure::{Dice, ImageMeasure};
//! use segmetrics::study::Study;
//!
//! let mut study: Study<u32> = Study::new();
//! study.add_measure(Dice::default().object_based())?;
//!
//! let image = Image::from_fn(20, 20, |x, y| i64::from(x < 10 && y < 10));
//! study.set_expected(&image, true)?;
//! study.process(0, &image, true, false)?;
//!
//! assert_eq!(study.aggregate("Ob. Dice")?, Some(1.0));
//! # Ok::<(), segmetrics::Error>(())
//! ```

mod table;

use std::collections::BTreeMap;
use std::fmt::{Debug, Display};

use tracing::debug;

use crate::error::{Error, Result};
use crate::label::{Image, LabelImage, normalize};
use crate::measure::{Aggregation, Measure};

pub use table::{Table, TableRow};

/// Requirements on sample identifiers.
pub trait SampleKey: Clone + Ord + Debug + Display + Send + 'static {}

impl<T> SampleKey for T where T: Clone + Ord + Debug + Display + Send + 'static {}

/// A registered measure and its results.
#[derive(Clone)]
struct MeasureEntry<K> {
    name: String,
    measure: Box<dyn Measure>,
    results: BTreeMap<K, Vec<f64>>,
}

impl<K> MeasureEntry<K> {
    fn new(name: String, measure: Box<dyn Measure>) -> Self {
        Self {
            name,
            measure,
            results: BTreeMap::new(),
        }
    }

    /// Copy of this entry without results.
    fn fork(&self) -> Self {
        Self::new(self.name.clone(), self.measure.clone())
    }
}

/// Measures, the active expected image and per-sample results.
#[derive(Clone)]
pub struct Study<K: SampleKey = String> {
    entries: Vec<MeasureEntry<K>>,
    /// Sample ids in the order they were first processed or merged.
    samples: Vec<K>,
    /// Number of reference objects each sample was evaluated against.
    object_counts: BTreeMap<K, usize>,
    expected: Option<LabelImage>,
}

impl<K: SampleKey> Default for Study<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: SampleKey> Study<K> {
    /// Create an empty study.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            samples: Vec::new(),
            object_counts: BTreeMap::new(),
            expected: None,
        }
    }

    /// Register `measure` under its default name, which is returned.
    pub fn add_measure(&mut self, measure: impl Measure + 'static) -> Result<String> {
        let name = measure.default_name();
        self.add_measure_as(name, measure)
    }

    /// Register `measure` under `name`, which is returned.
    ///
    /// If an expected image is already set, it is passed to the new measure.
    pub fn add_measure_as(
        &mut self,
        name: impl Into<String>,
        measure: impl Measure + 'static,
    ) -> Result<String> {
        let name = name.into();
        if self.entry(&name).is_some() {
            return Err(Error::DuplicateMeasure(name));
        }
        let mut measure: Box<dyn Measure> = Box::new(measure);
        if let Some(expected) = &self.expected {
            measure.set_expected(expected);
        }
        debug!(measure = %name, aggregation = %measure.aggregation(), "registered measure");
        self.entries.push(MeasureEntry::new(name.clone(), measure));
        Ok(name)
    }

    /// Set the expected image of all measures.
    ///
    /// If `unique` is false, objects are re-labeled by connected components.
    pub fn set_expected(&mut self, expected: &Image, unique: bool) -> Result<()> {
        let labels = normalize(expected, unique)?;
        self.set_expected_labels(labels);
        Ok(())
    }

    /// Set an already canonical expected image.
    pub fn set_expected_labels(&mut self, expected: LabelImage) {
        debug!(
            width = expected.width(),
            height = expected.height(),
            objects = expected.object_count(),
            "setting expected image"
        );
        for entry in &mut self.entries {
            entry.measure.set_expected(&expected);
        }
        self.expected = Some(expected);
    }

    /// The active expected image.
    #[must_use]
    pub fn expected(&self) -> Option<&LabelImage> {
        self.expected.as_ref()
    }

    /// Evaluate `actual` with all measures and store the results under `sample_id`.
    ///
    /// Fails with [`Error::DuplicateSample`] if the sample was processed
    /// before and `replace` is false.
    pub fn process(
        &mut self,
        sample_id: K,
        actual: &Image,
        unique: bool,
        replace: bool,
    ) -> Result<()> {
        let labels = normalize(actual, unique)?;
        self.process_labels(sample_id, &labels, replace)
    }

    /// Evaluate an already canonical candidate image.
    pub fn process_labels(&mut self, sample_id: K, actual: &LabelImage, replace: bool) -> Result<()> {
        if !replace && self.contains_sample(&sample_id) {
            return Err(Error::DuplicateSample(sample_id.to_string()));
        }
        let expected = self.expected.as_ref().ok_or_else(|| Error::ExpectedNotSet {
            measure: "study".to_string(),
        })?;
        expected.ensure_same_size(actual)?;
        let objects = expected.object_count();

        // Compute everything before storing, so that a failing measure leaves
        // the study untouched.
        let scores = self
            .entries
            .iter_mut()
            .map(|entry| entry.measure.compute(actual))
            .collect::<Result<Vec<_>>>()?;

        debug!(sample = %sample_id, objects, "processed sample");
        for (entry, scores) in self.entries.iter_mut().zip(scores) {
            entry.results.insert(sample_id.clone(), scores);
        }
        if self.object_counts.insert(sample_id.clone(), objects).is_none() {
            self.samples.push(sample_id);
        }
        Ok(())
    }

    /// Clear all results, keeping the measures and the expected image.
    pub fn reset(&mut self) {
        for entry in &mut self.entries {
            entry.results.clear();
        }
        self.samples.clear();
        self.object_counts.clear();
    }

    /// Copy of this study with the same measures and expected image, but no
    /// results. Measures are deep copies.
    #[must_use]
    pub fn fork(&self) -> Self {
        Self {
            entries: self.entries.iter().map(MeasureEntry::fork).collect(),
            samples: Vec::new(),
            object_counts: BTreeMap::new(),
            expected: self.expected.clone(),
        }
    }

    /// Import results of `other`.
    ///
    /// Measures of `other` that are not registered here are registered first.
    /// `sample_ids` selects the samples to copy (all samples of `other` if
    /// `None`). Fails without changing anything if a selected sample is
    /// unknown to `other`, or already present here and `replace` is false.
    pub fn merge(&mut self, other: &Self, sample_ids: Option<&[K]>, replace: bool) -> Result<()> {
        let sample_ids = sample_ids.unwrap_or(&other.samples);
        for sample_id in sample_ids {
            if !other.contains_sample(sample_id) {
                return Err(Error::UnknownSample(sample_id.to_string()));
            }
            if !replace && self.contains_sample(sample_id) {
                return Err(Error::DuplicateSample(sample_id.to_string()));
            }
        }

        // Measures unknown to `other` have no result for the merged samples.
        for entry in &mut self.entries {
            if !other.entries.iter().any(|e| e.name == entry.name) {
                for sample_id in sample_ids {
                    entry.results.remove(sample_id);
                }
            }
        }

        for source in &other.entries {
            let index = match self.entries.iter().position(|e| e.name == source.name) {
                Some(index) => index,
                None => {
                    debug!(measure = %source.name, "importing measure");
                    self.entries.push(source.fork());
                    self.entries.len() - 1
                }
            };
            let target = &mut self.entries[index];
            for sample_id in sample_ids {
                match source.results.get(sample_id) {
                    Some(scores) => target.results.insert(sample_id.clone(), scores.clone()),
                    None => target.results.remove(sample_id),
                };
            }
        }

        for sample_id in sample_ids {
            let objects = other.object_counts.get(sample_id).copied().unwrap_or_default();
            if self.object_counts.insert(sample_id.clone(), objects).is_none() {
                self.samples.push(sample_id.clone());
            }
        }
        Ok(())
    }

    /// Names of all measures in registration order.
    pub fn measure_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// The measure registered under `name`.
    #[must_use]
    pub fn measure(&self, name: &str) -> Option<&dyn Measure> {
        self.entry(name).map(|e| e.measure.as_ref())
    }

    /// Sample ids in the order they were processed or merged.
    #[must_use]
    pub fn sample_ids(&self) -> &[K] {
        &self.samples
    }

    /// Whether `sample_id` was processed.
    #[must_use]
    pub fn contains_sample(&self, sample_id: &K) -> bool {
        self.object_counts.contains_key(sample_id)
    }

    /// Total number of reference objects over all processed samples.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.object_counts.values().sum()
    }

    /// Per-sample results of the measure called `name`.
    pub fn results(&self, name: &str) -> Result<&BTreeMap<K, Vec<f64>>> {
        Ok(&self.require_entry(name)?.results)
    }

    /// All scores of the measure called `name`, in ascending sample order.
    pub fn values(&self, name: &str) -> Result<Vec<f64>> {
        let entry = self.require_entry(name)?;
        Ok(entry.results.values().flatten().copied().collect())
    }

    /// Summary value of the measure called `name` over all samples.
    ///
    /// `None` if the summary is undefined, e.g. because no scores exist.
    pub fn aggregate(&self, name: &str) -> Result<Option<f64>> {
        let entry = self.require_entry(name)?;
        let values: Vec<f64> = entry.results.values().flatten().copied().collect();
        let objects = entry
            .results
            .keys()
            .filter_map(|id| self.object_counts.get(id))
            .sum();
        Ok(entry.measure.aggregation().reduce(&values, objects))
    }

    /// Summary value of the measure called `name` for a single sample.
    pub fn aggregate_sample(&self, name: &str, sample_id: &K) -> Result<Option<f64>> {
        let entry = self.require_entry(name)?;
        let values = entry
            .results
            .get(sample_id)
            .ok_or_else(|| Error::UnknownSample(sample_id.to_string()))?;
        let objects = self.object_counts.get(sample_id).copied().unwrap_or(0);
        Ok(entry.measure.aggregation().reduce(values, objects))
    }

    /// Aggregation of the measure called `name`.
    pub fn aggregation(&self, name: &str) -> Result<Aggregation> {
        Ok(self.require_entry(name)?.measure.aggregation())
    }

    /// Export one row per sample (ascending sample order) and a summary row.
    ///
    /// Columns follow the registration order of the measures.
    pub fn table(&self) -> Result<Table> {
        let columns: Vec<String> = self.measure_names().map(str::to_string).collect();
        let mut rows = Vec::with_capacity(self.object_counts.len());
        for sample_id in self.object_counts.keys() {
            let values = self
                .entries
                .iter()
                .map(|entry| {
                    if entry.results.contains_key(sample_id) {
                        self.aggregate_sample(&entry.name, sample_id)
                    } else {
                        Ok(None)
                    }
                })
                .collect::<Result<Vec<_>>>()?;
            rows.push(TableRow {
                sample: sample_id.to_string(),
                values,
            });
        }
        let summary = columns
            .iter()
            .map(|name| self.aggregate(name))
            .collect::<Result<Vec<_>>>()?;
        Ok(Table::new(columns, rows, summary))
    }

    fn entry(&self, name: &str) -> Option<&MeasureEntry<K>> {
        self.entries.iter().find(|e| e.name == name)
    }

    fn require_entry(&self, name: &str) -> Result<&MeasureEntry<K>> {
        self.entry(name)
            .ok_or_else(|| Error::UnknownMeasure(name.to_string()))
    }
}
