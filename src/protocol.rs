//! Messages exchanged between the coordinator and an execution context.
//!
//! Both directions are closed enums; a context never sees anything but a
//! [`Command`] and the coordinator never sees anything but a [`Status`].

use crate::{report::Row, util::sha256_hex};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    Begin {
        header: Vec<String>,
        footer: Vec<String>,
        total_chunks: usize,
    },
    Chunk {
        index: usize,
        rows: Vec<Row>,
        header: Vec<String>,
        footer: Vec<String>,
    },
    Done,
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Begin { .. } => "begin",
            Command::Chunk { .. } => "chunk",
            Command::Done => "done",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Status {
    Processing { progress: Option<f32> },
    Completed { artifact: Artifact },
    Error { message: String },
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Status::Processing { .. })
    }
}

/// Finalized document bytes plus what the renderer put into them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub body_rows: usize,
    pub pages: usize,
}

impl Artifact {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn sha256(&self) -> String {
        sha256_hex(&self.bytes)
    }
}

/// URL-like reference to a finished artifact, handed to completion
/// callbacks before delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactHandle {
    pub job_id: String,
    pub uri: String,
    pub byte_len: usize,
}

impl ArtifactHandle {
    pub fn for_job(job_id: &str, artifact: &Artifact) -> Self {
        Self {
            job_id: job_id.to_string(),
            uri: format!("artifact://{job_id}"),
            byte_len: artifact.len(),
        }
    }
}
