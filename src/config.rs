use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub generation: Generation,
    #[serde(default)]
    pub worker: Worker,
    #[serde(default)]
    pub render: Render,
    #[serde(default)]
    pub sanitize: Sanitize,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub logging: Logging,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }
}

/// How a job is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Whole body rendered in one call on the caller's task.
    Direct,
    /// Body split into chunks and fed to a background execution context.
    #[default]
    Chunked,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Direct => f.write_str("direct"),
            Mode::Chunked => f.write_str("chunked"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    pub mode: Mode,
    pub chunk_size: usize,
    pub job_timeout_seconds: u64,
    pub strict_row_width: bool,
}
impl Default for Generation {
    fn default() -> Self {
        Self {
            mode: Mode::Chunked,
            chunk_size: 1000,
            job_timeout_seconds: 0,
            strict_row_width: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub queue_capacity: usize,
    pub thread_name_prefix: String,
}
impl Default for Worker {
    fn default() -> Self {
        Self {
            queue_capacity: 8,
            thread_name_prefix: "ledger-pdf-ctx".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Render {
    pub title: String,
    pub page_width_mm: f32,
    pub page_height_mm: f32,
    pub margin_mm: f32,
    pub font_size: f32,
    pub row_height_mm: f32,
    pub header_fill: [u8; 3],
    pub stripe_fill: [u8; 3],
    pub stripe_even_rows: bool,
    pub show_generated_at: bool,
}
impl Default for Render {
    fn default() -> Self {
        Self {
            title: "Transactions".into(),
            page_width_mm: 210.0,
            page_height_mm: 297.0,
            margin_mm: 14.0,
            font_size: 9.0,
            row_height_mm: 7.0,
            header_fill: [47, 46, 121],
            stripe_fill: [236, 236, 246],
            stripe_even_rows: true,
            show_generated_at: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sanitize {
    pub normalize_unicode: bool,
    pub control_chars_to_sanitize: Vec<u8>,
}
impl Default for Sanitize {
    fn default() -> Self {
        Self {
            normalize_unicode: true,
            control_chars_to_sanitize: (0u8..=31).chain(std::iter::once(127)).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    pub out_dir: String,
    pub overwrite: bool,
    pub write_report_json: bool,
    pub report_suffix: String,
}
impl Default for Output {
    fn default() -> Self {
        Self {
            out_dir: "out".into(),
            overwrite: true,
            write_report_json: false,
            report_suffix: ".report.json".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: false,
            file_path: "".into(),
        }
    }
}
