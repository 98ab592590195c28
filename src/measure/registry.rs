//! Measures by name.
//!
//! A measure specification is a name followed by `:`-separated modifiers:
//!
//! | Modifier | Effect |
//! |----------|--------|
//! | `ob` | object-based evaluation (image-level measures only, applied first) |
//! | `rev` | swap expected and actual |
//! | `sym` | evaluate in both directions |
//! | `agg=<aggregation>` | override the aggregation |
//! | `q=<quantile>` | quantile of `hsd` |
//! | `nodet=<value>` | score for reference objects when nothing was detected (`ob` only) |
//!
//! Wrapping modifiers apply in the order given.
//!
//! ```
//! use segmetrics::measure::registry;
//!
//! let measure = registry::parse("hsd:q=0.9:ob:sym").unwrap();
//! assert_eq!(measure.default_name(), "Sym. Ob. HSD (Q=0.9)");
//! ```

use tracing::debug;

use crate::error::{Error, Result};
use crate::measure::{
    AdjustedRandIndex, Aggregation, Correspondence, Dice, FalseMerge, FalseNegative,
    FalsePositive, FalseSplit, Hausdorff, ImageMeasure, IsbiScore, JaccardCoefficient,
    JaccardIndex, Measure, MeasureExt, Nsd, ObjectBased, RandIndex,
};

/// A registered measure name.
#[derive(Debug, Clone, Copy)]
pub struct MeasureInfo {
    /// Name used in specifications.
    pub name: &'static str,
    /// One-line description.
    pub description: &'static str,
    /// Whether `ob` may be applied.
    pub image_level: bool,
}

/// All registered measures.
pub const MEASURES: &[MeasureInfo] = &[
    MeasureInfo {
        name: "dice",
        description: "Dice similarity coefficient",
        image_level: true,
    },
    MeasureInfo {
        name: "jc",
        description: "Jaccard coefficient",
        image_level: true,
    },
    MeasureInfo {
        name: "ji",
        description: "Jaccard index (pair counting)",
        image_level: true,
    },
    MeasureInfo {
        name: "rand",
        description: "Rand index",
        image_level: true,
    },
    MeasureInfo {
        name: "ari",
        description: "Adjusted Rand index",
        image_level: true,
    },
    MeasureInfo {
        name: "seg",
        description: "SEG score of the ISBI cell tracking challenge",
        image_level: false,
    },
    MeasureInfo {
        name: "hsd",
        description: "Hausdorff distance of the contours",
        image_level: true,
    },
    MeasureInfo {
        name: "nsd",
        description: "Normalized sum of distances",
        image_level: true,
    },
    MeasureInfo {
        name: "split",
        description: "Number of falsely split objects",
        image_level: false,
    },
    MeasureInfo {
        name: "merge",
        description: "Number of falsely merged objects",
        image_level: false,
    },
    MeasureInfo {
        name: "fp",
        description: "Number of spurious objects",
        image_level: false,
    },
    MeasureInfo {
        name: "fn",
        description: "Number of missing objects",
        image_level: false,
    },
];

/// Measures evaluated by the CLI when none are requested.
pub const DEFAULT_MEASURES: &[&str] = &["seg", "dice:ob", "hsd:ob:sym", "nsd:ob", "split", "merge"];

#[derive(Debug, Clone, Copy)]
enum Wrapper {
    ObjectBased,
    Reversed,
    Symmetric,
}

#[derive(Debug, Default)]
struct Options {
    aggregation: Option<Aggregation>,
    quantile: Option<f64>,
    no_detections: Option<f64>,
    wrappers: Vec<Wrapper>,
}

impl Options {
    fn parse<'a>(modifiers: impl Iterator<Item = &'a str>) -> Result<Self> {
        let mut options = Self::default();
        for modifier in modifiers {
            match modifier.split_once('=') {
                None => options.wrappers.push(match modifier {
                    "ob" => Wrapper::ObjectBased,
                    "rev" => Wrapper::Reversed,
                    "sym" => Wrapper::Symmetric,
                    other => return Err(invalid("modifier", format!("unknown modifier '{other}'"))),
                }),
                Some(("agg", value)) => options.aggregation = Some(value.parse()?),
                Some(("q", value)) => options.quantile = Some(parse_number("q", value)?),
                Some(("nodet", value)) => options.no_detections = Some(parse_number("nodet", value)?),
                Some((key, _)) => {
                    return Err(invalid("modifier", format!("unknown option '{key}'")));
                }
            }
        }
        Ok(options)
    }
}

/// Build a measure from its specification.
pub fn parse(spec: &str) -> Result<Box<dyn Measure>> {
    let mut parts = spec.split(':').map(str::trim);
    let name = parts.next().unwrap_or_default();
    let options = Options::parse(parts)?;

    if options.quantile.is_some() && name != "hsd" {
        return Err(invalid("q", format!("'{name}' has no quantile")));
    }
    if options.no_detections.is_some()
        && !options.wrappers.iter().any(|w| matches!(w, Wrapper::ObjectBased))
    {
        return Err(invalid("nodet", "requires the 'ob' modifier".to_string()));
    }

    let (mut measure, mut correspondence) = base(name, &options)?;
    for wrapper in &options.wrappers {
        measure = match wrapper {
            Wrapper::ObjectBased => {
                let Some(correspondence) = correspondence.take() else {
                    return Err(invalid(
                        "ob",
                        format!("'{name}' cannot be evaluated per object here"),
                    ));
                };
                let mut adapter = ObjectBased::with_correspondence(measure, correspondence);
                if let Some(value) = options.no_detections {
                    adapter = adapter.with_no_detections(value);
                }
                adapter.boxed()
            }
            Wrapper::Reversed => measure.reversed().boxed(),
            Wrapper::Symmetric => measure.symmetric().boxed(),
        };
        correspondence = None;
    }
    debug!(spec, name = %measure.default_name(), "parsed measure");
    Ok(measure)
}

/// The measure called `name`, with the aggregation and quantile options
/// applied, and its correspondence if it is an image-level measure.
fn base(name: &str, options: &Options) -> Result<(Box<dyn Measure>, Option<Correspondence>)> {
    macro_rules! configured {
        ($measure:expr) => {{
            let measure = $measure;
            match options.aggregation {
                Some(aggregation) => measure.with_aggregation(aggregation),
                None => measure,
            }
        }};
    }
    macro_rules! image_level {
        ($measure:expr) => {{
            let measure = configured!($measure);
            let correspondence = measure.correspondence();
            (measure.boxed(), Some(correspondence))
        }};
    }
    macro_rules! object_level {
        ($measure:expr) => {
            (configured!($measure).boxed(), None)
        };
    }

    Ok(match name {
        "dice" => image_level!(Dice::default()),
        "jc" => image_level!(JaccardCoefficient::default()),
        "ji" => image_level!(JaccardIndex::default()),
        "rand" => image_level!(RandIndex::default()),
        "ari" => image_level!(AdjustedRandIndex::default()),
        "seg" => object_level!(IsbiScore::default()),
        "hsd" => image_level!(match options.quantile {
            Some(quantile) => Hausdorff::with_quantile(quantile)?,
            None => Hausdorff::default(),
        }),
        "nsd" => image_level!(Nsd::default()),
        "split" => object_level!(FalseSplit::default()),
        "merge" => object_level!(FalseMerge::default()),
        "fp" => object_level!(FalsePositive::default()),
        "fn" => object_level!(FalseNegative::default()),
        other => return Err(Error::UnknownMeasure(other.to_string())),
    })
}

fn parse_number(name: &str, value: &str) -> Result<f64> {
    value
        .parse()
        .map_err(|_| invalid(name, format!("'{value}' is not a number")))
}

fn invalid(name: &str, reason: String) -> Error {
    Error::InvalidParameter {
        name: name.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::LabelImage;

    #[test]
    fn test_parse_plain_names() {
        for info in MEASURES {
            let measure = parse(info.name).unwrap();
            assert!(!measure.default_name().is_empty(), "{}", info.name);
        }
        assert_eq!(parse("fp").unwrap().default_name(), "Spurious");
    }

    #[test]
    fn test_parse_wrappers_in_order() {
        assert_eq!(parse("dice:ob").unwrap().default_name(), "Ob. Dice");
        assert_eq!(parse("dice:ob:rev").unwrap().default_name(), "Rev. Ob. Dice");
        assert_eq!(parse("seg:sym").unwrap().default_name(), "Sym. SEG");
        assert_eq!(parse("seg:rev:sym").unwrap().default_name(), "Sym. Rev. SEG");
    }

    #[test]
    fn test_parse_options() {
        let measure = parse("split:agg=object-mean").unwrap();
        assert_eq!(measure.aggregation(), Aggregation::ObjectMean);

        let measure = parse("hsd:q=0.5:ob").unwrap();
        assert_eq!(measure.default_name(), "Ob. HSD (Q=0.5)");
        assert_eq!(measure.aggregation(), Aggregation::Mean);
    }

    #[test]
    fn test_parse_no_detections() {
        let mut measure = parse("dice:ob:nodet=0").unwrap();
        measure.set_expected(&LabelImage::from_fn(8, 8, |x, _| u32::from(x < 3)));
        assert_eq!(measure.compute(&LabelImage::zeros(8, 8)).unwrap(), vec![0.0]);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse("foo"), Err(Error::UnknownMeasure(_))));
        assert!(matches!(parse(""), Err(Error::UnknownMeasure(_))));
        assert!(matches!(parse("dice:flip"), Err(Error::InvalidParameter { .. })));
        assert!(matches!(parse("dice:q=0.5"), Err(Error::InvalidParameter { .. })));
        assert!(matches!(parse("hsd:q=2"), Err(Error::InvalidParameter { .. })));
        assert!(matches!(parse("hsd:q=abc"), Err(Error::InvalidParameter { .. })));
        assert!(matches!(parse("dice:nodet=1"), Err(Error::InvalidParameter { .. })));
        assert!(matches!(parse("seg:ob"), Err(Error::InvalidParameter { .. })));
        assert!(matches!(parse("dice:ob:ob"), Err(Error::InvalidParameter { .. })));
        assert!(matches!(parse("dice:rev:ob"), Err(Error::InvalidParameter { .. })));
        assert!(matches!(parse("dice:agg=median"), Err(Error::InvalidParameter { .. })));
    }

    #[test]
    fn test_default_measures_parse() {
        for spec in DEFAULT_MEASURES {
            assert!(parse(spec).is_ok(), "{spec}");
        }
    }
}
