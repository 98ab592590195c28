//! Tabular export of study results.

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Scores of one sample, one cell per measure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    /// Sample identifier.
    pub sample: String,
    /// Per-sample summary value of each measure, `None` if undefined.
    pub values: Vec<Option<f64>>,
}

/// Per-sample and overall summary values of a study.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Measure names in registration order.
    pub columns: Vec<String>,
    /// One row per sample, in ascending sample order.
    pub rows: Vec<TableRow>,
    /// Summary over all samples, one cell per measure.
    pub summary: Vec<Option<f64>>,
}

/// A table stamped with its export time.
#[derive(Serialize, Deserialize)]
struct Export {
    #[serde(with = "chrono_serde")]
    timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(flatten)]
    table: Table,
}

impl Table {
    /// Assemble a table.
    #[must_use]
    pub fn new(columns: Vec<String>, rows: Vec<TableRow>, summary: Vec<Option<f64>>) -> Self {
        Self {
            columns,
            rows,
            summary,
        }
    }

    /// Summary value of the column called `name`.
    #[must_use]
    pub fn summary_of(&self, name: &str) -> Option<f64> {
        let index = self.columns.iter().position(|c| c == name)?;
        self.summary.get(index).copied().flatten()
    }

    /// Write the table to `path`, choosing the format by extension:
    /// `.tsv` and `.json` are recognized, anything else is written as CSV.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("tsv") => self.write_tsv(path),
            Some("json") => {
                std::fs::write(path, self.to_json()?)?;
                Ok(())
            }
            _ => self.write_csv(path),
        }
    }

    /// Write comma-separated values to `path`.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        self.write_delimited(std::fs::File::create(path)?, b',')
    }

    /// Write tab-separated values to `path`.
    pub fn write_tsv(&self, path: impl AsRef<Path>) -> Result<()> {
        self.write_delimited(std::fs::File::create(path)?, b'\t')
    }

    /// Write delimited text: a header, one row per sample and a `Summary` row.
    /// Undefined values are empty cells.
    pub fn write_delimited<W: Write>(&self, writer: W, delimiter: u8) -> Result<()> {
        let mut wtr = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_writer(writer);

        let mut header = vec!["Sample"];
        header.extend(self.columns.iter().map(String::as_str));
        wtr.write_record(&header)?;

        for row in &self.rows {
            wtr.write_record(record(&row.sample, &row.values))?;
        }
        wtr.write_record(record("Summary", &self.summary))?;

        wtr.flush()?;
        Ok(())
    }

    /// Pretty-printed JSON including an export timestamp.
    pub fn to_json(&self) -> Result<String> {
        let export = Export {
            timestamp: chrono::Utc::now(),
            table: self.clone(),
        };
        Ok(serde_json::to_string_pretty(&export)?)
    }
}

fn record(label: &str, values: &[Option<f64>]) -> Vec<String> {
    std::iter::once(label.to_string())
        .chain(values.iter().map(|v| v.map_or(String::new(), |v| v.to_string())))
        .collect()
}

mod chrono_serde {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        dt.to_rfc3339().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
