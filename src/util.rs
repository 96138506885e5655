use crate::error::GenerateError;
use anyhow::{Context, Result};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::LazyLock;
use time::format_description::well_known::Rfc3339;

// A bare file name: no separators, no control characters.
static FILE_NAME: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[^/\\\x00-\x1f\x7f]{1,255}$"));

pub fn ensure_dir(p: &Path) -> Result<()> {
    std::fs::create_dir_all(p).with_context(|| format!("create_dir_all {}", p.display()))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    format!("{:x}", h.finalize())
}

pub fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Rejects anything that is not a plain file name.
pub fn validate_file_name(name: &str) -> std::result::Result<(), GenerateError> {
    let pattern = FILE_NAME
        .as_ref()
        .map_err(|e| GenerateError::InvalidArgument(format!("file name pattern: {e}")))?;
    if name == "." || name == ".." || !pattern.is_match(name) {
        return Err(GenerateError::InvalidArgument(format!(
            "not a plain file name: {name:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names() {
        assert!(validate_file_name("report.pdf").is_ok());
        assert!(validate_file_name("Q1 2024 (final).pdf").is_ok());
        assert!(validate_file_name("").is_err());
        assert!(validate_file_name("..").is_err());
        assert!(validate_file_name("../etc/passwd").is_err());
        assert!(validate_file_name("a\\b.pdf").is_err());
        assert!(validate_file_name("a\nb.pdf").is_err());
    }

    #[test]
    fn sha256_is_hex() {
        let h = sha256_hex(b"abc");
        assert_eq!(h.len(), 64);
        assert!(h.starts_with("ba7816bf"));
    }
}
