//! Error types for segmetrics operations.

use std::path::PathBuf;
use thiserror::Error;

use crate::measure::Aggregation;

/// Result type alias for segmetrics operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while evaluating segmentation results.
///
/// Undefined measure values (for example, no foreground in either image) are
/// not errors: measures report them as an empty score list.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Failed to load an image file.
    #[error("Image load failed: {path}: {reason}")]
    ImageLoad {
        /// Path to the image that failed to load.
        path: PathBuf,
        /// Reason for the failure.
        reason: String,
    },

    /// An image is not a well-formed label image.
    #[error("Invalid image: {reason}")]
    InvalidImage {
        /// Reason the image was rejected.
        reason: String,
    },

    /// An image contains a negative label.
    #[error("Negative label {value} (labels must be non-negative)")]
    NegativeLabel {
        /// The offending value.
        value: i64,
    },

    /// Image dimensions don't match between reference and candidate images.
    #[error("Dimension mismatch: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        /// Expected dimensions (width, height).
        expected: (usize, usize),
        /// Actual dimensions (width, height).
        actual: (usize, usize),
    },

    /// A measure with the same name is already registered.
    #[error("Measure already registered: {0}")]
    DuplicateMeasure(String),

    /// No measure is registered under the given name.
    #[error("Unknown measure: {0}")]
    UnknownMeasure(String),

    /// A sample was processed again without permission to replace it.
    #[error("Sample already processed: {0}")]
    DuplicateSample(String),

    /// No results are stored for the given sample.
    #[error("Unknown sample: {0}")]
    UnknownSample(String),

    /// `compute` was called before `set_expected`.
    #[error("No expected image set for {measure}")]
    ExpectedNotSet {
        /// Name of the measure.
        measure: String,
    },

    /// The two directions of a symmetric measure aggregate differently.
    #[error("Aggregation mismatch: {first} vs. {second}")]
    AggregationMismatch {
        /// Aggregation of the forward measure.
        first: Aggregation,
        /// Aggregation of the reverse measure.
        second: Aggregation,
    },

    /// A measure wrapped by the object-based adapter returned other than one score.
    #[error("{measure} returned {count} scores for a single object pair (expected 1)")]
    ScoreCount {
        /// Name of the wrapped measure.
        measure: String,
        /// Number of scores returned.
        count: usize,
    },

    /// Invalid measure parameter.
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter {
        /// Parameter name.
        name: String,
        /// Reason for the failure.
        reason: String,
    },

    /// The parallel harness was invoked from inside a running harness.
    #[error("Harness already running in this context (nested invocation)")]
    AlreadyForked,

    /// Evaluation was interrupted before all samples completed.
    #[error("Interrupted after {completed} of {total} samples")]
    Interrupted {
        /// Samples merged before the interruption.
        completed: usize,
        /// Total number of samples.
        total: usize,
    },

    /// The worker pool could not be created.
    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    /// A worker panicked while evaluating a sample.
    #[error("Worker panicked: {0}")]
    WorkerPanicked(String),

    /// Error raised while evaluating a specific sample.
    #[error("Sample {sample_id}: {source}")]
    Sample {
        /// Identifier of the failing sample.
        sample_id: String,
        /// The underlying error.
        #[source]
        source: Box<Error>,
    },

    /// I/O error wrapper.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl Error {
    /// Attach a sample identifier to this error.
    #[must_use]
    pub fn for_sample(self, sample_id: impl std::fmt::Display) -> Self {
        match self {
            err @ Self::Sample { .. } => err,
            err => Self::Sample {
                sample_id: sample_id.to_string(),
                source: Box::new(err),
            },
        }
    }
}
