use crate::{
    config::Mode,
    error::{GenerateError, Result},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// One table cell. Untagged in JSON: numbers stay numbers, RFC 3339 strings
/// become dates, anything else is text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Number(f64),
    Date(#[serde(with = "time::serde::rfc3339")] OffsetDateTime),
    Text(String),
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Text(s) => f.write_str(s),
            Cell::Number(n) if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            }
            Cell::Number(n) => write!(f, "{n}"),
            Cell::Date(d) => match d.format(&Rfc3339) {
                Ok(s) => f.write_str(&s),
                Err(_) => write!(f, "{d}"),
            },
        }
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::Text(s.to_string())
    }
}

impl From<String> for Cell {
    fn from(s: String) -> Self {
        Cell::Text(s)
    }
}

impl From<f64> for Cell {
    fn from(n: f64) -> Self {
        Cell::Number(n)
    }
}

impl From<i64> for Cell {
    fn from(n: i64) -> Self {
        Cell::Number(n as f64)
    }
}

impl From<OffsetDateTime> for Cell {
    fn from(d: OffsetDateTime) -> Self {
        Cell::Date(d)
    }
}

pub type Row = Vec<Cell>;

/// Input of one generation job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportData {
    pub header: Vec<String>,
    #[serde(alias = "data")]
    pub body: Vec<Row>,
    #[serde(default)]
    pub footer: Vec<String>,
}

impl ReportData {
    pub fn new(header: Vec<String>, body: Vec<Row>, footer: Vec<String>) -> Self {
        Self {
            header,
            body,
            footer,
        }
    }

    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading report data: {}", path.display()))?;
        let data = serde_json::from_str(&raw)
            .with_context(|| format!("parsing report data: {}", path.display()))?;
        Ok(data)
    }

    pub fn width(&self) -> usize {
        self.header.len()
    }

    /// Checks the report shape before anything is dispatched.
    ///
    /// With `strict_row_width` every body row must be exactly as wide as the
    /// header; otherwise ragged rows are accepted and fixed at render time.
    pub fn validate(&self, strict_row_width: bool) -> Result<()> {
        if self.header.is_empty() && !self.body.is_empty() {
            return Err(GenerateError::InvalidArgument(
                "report has body rows but no header".into(),
            ));
        }
        if !self.footer.is_empty() && self.footer.len() > self.header.len() {
            return Err(GenerateError::InvalidArgument(format!(
                "footer has {} cells but header has {}",
                self.footer.len(),
                self.header.len()
            )));
        }
        if strict_row_width {
            let width = self.width();
            if let Some((i, row)) = self.body.iter().enumerate().find(|(_, r)| r.len() != width) {
                return Err(GenerateError::InvalidArgument(format!(
                    "row {i} has {} cells, header has {width}",
                    row.len()
                )));
            }
        }
        Ok(())
    }
}

/// Summary of a delivered job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: String,
    pub file_name: String,
    pub mode: Mode,
    pub body_rows: usize,
    pub chunk_count: usize,
    pub chunk_size: usize,
    pub pages: usize,
    pub artifact_bytes: usize,
    pub artifact_sha256: String,
    pub delivered_to: String,
    pub started: String,
    pub finished: String,
}
