//! # segmetrics
//!
//! Performance measures for image segmentation and object detection.
//!
//! A candidate label image (a segmentation result) is compared against a
//! reference label image (the ground truth) by pluggable [`Measure`]s. A
//! [`Study`] drives the measures over a dataset, keeps per-sample results,
//! aggregates them and exports a [`Table`]. The [`parallel`] harness spreads
//! the samples of a dataset over worker threads.
//!
//! ## Quick Start
//!
//! ```
//! use segmetrics::label::Image;
//! use segmetrics::measure::{Dice, Hausdorff, ImageMeasure, IsbiScore, MeasureExt};
//! use segmetrics::Study;
//!
//! let mut study: Study<u32> = Study::new();
//! study.add_measure(IsbiScore::default())?;
//! study.add_measure(Dice::default().object_based())?;
//! study.add_measure(Hausdorff::default().object_based().symmetric())?;
//!
//! let expected = Image::from_fn(64, 64, |x, y| i64::from(x < 32 && y < 32));
//! let actual = Image::from_fn(64, 64, |x, y| i64::from(x < 30 && y < 32));
//! study.set_expected(&expected, true)?;
//! study.process(1, &actual, true, false)?;
//!
//! let table = study.table()?;
//! assert_eq!(table.columns, ["SEG", "Ob. Dice", "Sym. Ob. HSD"]);
//! # Ok::<(), segmetrics::Error>(())
//! ```
//!
//! ## Modules
//!
//! - [`error`]: Error types for the library
//! - [`label`]: Label images, masks, connected components and image loading
//! - [`measure`]: The measure contract, concrete measures and adapters
//! - [`study`]: Per-sample results, aggregation, merging and tabular export
//! - [`parallel`]: Multi-threaded evaluation harness
//! - [`stats`]: Statistical reductions

pub mod error;
pub mod label;
pub mod measure;
pub mod parallel;
pub mod stats;
pub mod study;

// Re-export commonly used types
pub use error::{Error, Result};
pub use label::{BinaryImage, Image, LabelImage};
pub use measure::{Aggregation, Correspondence, ImageMeasure, Measure, MeasureExt};
pub use parallel::{FnSource, Interrupt, ProcessOptions, SampleSource};
pub use study::{SampleKey, Study, Table, TableRow};
