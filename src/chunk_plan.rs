use crate::error::{GenerateError, Result};
use serde::{Deserialize, Serialize};

/// Splits `items` into ordered batches of at most `size` elements.
///
/// Concatenating the batches reproduces `items`; only the last batch may be
/// short, and an empty input yields no batches.
pub fn chunk<T: Clone>(items: &[T], size: usize) -> Result<Vec<Vec<T>>> {
    if size == 0 {
        return Err(GenerateError::InvalidArgument(
            "chunk size must be at least 1".into(),
        ));
    }
    Ok(items.chunks(size).map(<[T]>::to_vec).collect())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPlan {
    pub row_count: usize,
    pub chunk_size: usize,
    pub chunks: Vec<RowRange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowRange {
    pub start_row: usize, // 0-based inclusive
    pub end_row: usize,   // 0-based exclusive
}

impl RowRange {
    pub fn len(&self) -> usize {
        self.end_row - self.start_row
    }

    pub fn is_empty(&self) -> bool {
        self.start_row == self.end_row
    }
}

impl ChunkPlan {
    pub fn from_row_count(row_count: usize, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(GenerateError::InvalidArgument(
                "chunk size must be at least 1".into(),
            ));
        }

        let mut chunks = Vec::with_capacity(row_count.div_ceil(chunk_size));
        let mut start = 0usize;
        while start < row_count {
            let end = (start + chunk_size).min(row_count);
            chunks.push(RowRange {
                start_row: start,
                end_row: end,
            });
            start = end;
        }

        Ok(Self {
            row_count,
            chunk_size,
            chunks,
        })
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
