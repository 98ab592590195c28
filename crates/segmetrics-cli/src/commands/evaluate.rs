//! Evaluation command.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use segmetrics::label::io;
use segmetrics::measure::registry::{self, DEFAULT_MEASURES};
use segmetrics::parallel::{self, FnSource, ProcessOptions};
use segmetrics::Study;

/// Arguments of `segmetrics evaluate`.
pub struct Args {
    pub seg_dir: PathBuf,
    pub seg_pattern: String,
    pub gt_pattern: String,
    pub output: PathBuf,
    pub measures: Vec<String>,
    pub jobs: Option<usize>,
    pub recursive: bool,
    pub seg_unique: bool,
    pub gt_unique: bool,
}

pub fn run(args: &Args, verbose: bool) -> Result<()> {
    let seg_pattern = Pattern::parse(&args.seg_pattern)?;
    let gt_pattern = Pattern::parse(&args.gt_pattern)?;

    let mut study: Study<String> = Study::new();
    let specs: Vec<&str> = if args.measures.is_empty() {
        DEFAULT_MEASURES.to_vec()
    } else {
        args.measures.iter().map(String::as_str).collect()
    };
    for spec in specs {
        let measure =
            registry::parse(spec).with_context(|| format!("Invalid measure '{spec}'"))?;
        study.add_measure(measure)?;
    }

    let sample_ids = discover(&args.seg_dir, &seg_pattern, args.recursive)?;
    if sample_ids.is_empty() {
        bail!(
            "No files matching '{}' found in {}",
            args.seg_pattern,
            args.seg_dir.display()
        );
    }
    if verbose {
        eprintln!("Found {} samples in {}", sample_ids.len(), args.seg_dir.display());
    }

    let seg_dir = args.seg_dir.clone();
    let source = Arc::new(FnSource::new(
        move |id: &String| io::load(seg_dir.join(seg_pattern.substitute(id))),
        move |id: &String| io::load(gt_pattern.substitute(id)),
    ));

    let mut builder = ProcessOptions::builder()
        .actual_unique(args.seg_unique)
        .expected_unique(args.gt_unique);
    if let Some(jobs) = args.jobs {
        builder = builder.workers(jobs);
    }
    let options = builder.build();

    parallel::process(&mut study, source, &sample_ids, &options, |done, total| {
        eprint!("\rEvaluated {done}/{total}");
        if done == total {
            eprintln!();
        }
    })
    .context("Evaluation failed")?;

    let table = study.table()?;
    println!("Summary ({} samples):", table.rows.len());
    println!("{:-<60}", "");
    for (name, value) in table.columns.iter().zip(&table.summary) {
        match value {
            Some(value) => println!("  {name:<30} {value:.4}"),
            None => println!("  {name:<30} n/a"),
        }
    }

    table
        .save(&args.output)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    if verbose {
        eprintln!("Results written to: {}", args.output.display());
    }

    Ok(())
}

/// A relative path pattern with a single `*` wildcard.
#[derive(Debug, Clone)]
struct Pattern {
    prefix: String,
    suffix: String,
}

impl Pattern {
    fn parse(pattern: &str) -> Result<Self> {
        let pattern = pattern.replace('\\', "/");
        let Some((prefix, suffix)) = pattern.split_once('*') else {
            bail!("Pattern '{pattern}' has no '*'");
        };
        if suffix.contains('*') {
            bail!("Pattern '{pattern}' has more than one '*'");
        }
        Ok(Self {
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
        })
    }

    /// The part of `relative` matched by `*`.
    fn capture<'a>(&self, relative: &'a str) -> Option<&'a str> {
        if relative.len() < self.prefix.len() + self.suffix.len() {
            return None;
        }
        relative
            .strip_prefix(&self.prefix)?
            .strip_suffix(&self.suffix)
    }

    fn substitute(&self, capture: &str) -> String {
        format!("{}{}{}", self.prefix, capture, self.suffix)
    }
}

/// Captures of all files under `root` matching `pattern`, sorted.
fn discover(root: &Path, pattern: &Pattern, recursive: bool) -> Result<Vec<String>> {
    if !root.is_dir() {
        bail!("Not a directory: {}", root.display());
    }
    let mut captures = Vec::new();
    discover_in(root, root, pattern, recursive, &mut captures)?;
    captures.sort();
    Ok(captures)
}

fn discover_in(
    root: &Path,
    current: &Path,
    pattern: &Pattern,
    recursive: bool,
    captures: &mut Vec<String>,
) -> Result<()> {
    let entries = fs::read_dir(current)
        .with_context(|| format!("Failed to read directory {}", current.display()))?;

    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            if recursive {
                discover_in(root, &path, pattern, recursive, captures)?;
            }
        } else if path.is_file() {
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            let relative = relative.to_string_lossy().replace('\\', "/");
            if let Some(capture) = pattern.capture(&relative) {
                captures.push(capture.to_string());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_capture() {
        let pattern = Pattern::parse("seg/mask*.tif").unwrap();
        assert_eq!(pattern.capture("seg/mask012.tif"), Some("012"));
        assert_eq!(pattern.capture("seg/mask.tif"), Some(""));
        assert_eq!(pattern.capture("seg/other012.tif"), None);
        assert_eq!(pattern.capture("seg/mask012.png"), None);
        assert_eq!(pattern.substitute("012"), "seg/mask012.tif");
    }

    #[test]
    fn test_pattern_overlapping_affixes() {
        let pattern = Pattern::parse("a*a").unwrap();
        assert_eq!(pattern.capture("a"), None);
        assert_eq!(pattern.capture("aa"), Some(""));
    }

    #[test]
    fn test_pattern_requires_single_wildcard() {
        assert!(Pattern::parse("seg.tif").is_err());
        assert!(Pattern::parse("*/*.tif").is_err());
    }

    #[test]
    fn test_discover() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        for name in ["man_seg02.tif", "man_seg01.tif", "notes.txt", "sub/man_seg03.tif"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }

        let flat = Pattern::parse("man_seg*.tif").unwrap();
        assert_eq!(discover(dir.path(), &flat, false).unwrap(), ["01", "02"]);

        let nested = Pattern::parse("sub/man_seg*.tif").unwrap();
        assert!(discover(dir.path(), &nested, false).unwrap().is_empty());
        assert_eq!(discover(dir.path(), &nested, true).unwrap(), ["03"]);
    }
}
