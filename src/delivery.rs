use crate::{protocol::Artifact, util::ensure_dir};
use anyhow::{Context, Result, anyhow};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Hands finished bytes to the user under a caller-chosen name.
pub trait Delivery: Send + Sync {
    /// Returns where the file ended up.
    fn deliver(&self, file_name: &str, artifact: &Artifact) -> Result<String>;
}

/// Writes artifacts into a directory. The file only appears under its final
/// name once every byte is on disk.
#[derive(Debug, Clone)]
pub struct FileDelivery {
    out_dir: PathBuf,
    overwrite: bool,
}

impl FileDelivery {
    pub fn new(out_dir: impl Into<PathBuf>, overwrite: bool) -> Self {
        Self {
            out_dir: out_dir.into(),
            overwrite,
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }
}

impl Delivery for FileDelivery {
    fn deliver(&self, file_name: &str, artifact: &Artifact) -> Result<String> {
        ensure_dir(&self.out_dir)?;
        let target = self.out_dir.join(file_name);
        if target.exists() && !self.overwrite {
            return Err(anyhow!(
                "{} already exists and overwrite=false",
                target.display()
            ));
        }

        let partial = self.out_dir.join(format!(".{file_name}.part"));
        let written = write_synced(&partial, &artifact.bytes).and_then(|()| {
            std::fs::rename(&partial, &target)
                .with_context(|| format!("rename into {}", target.display()))
        });
        if let Err(e) = written {
            let _ = std::fs::remove_file(&partial);
            return Err(e);
        }

        debug!("delivered {} bytes to {}", artifact.len(), target.display());
        Ok(target.display().to_string())
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut f =
        std::fs::File::create(path).with_context(|| format!("create {}", path.display()))?;
    f.write_all(bytes)
        .with_context(|| format!("write {}", path.display()))?;
    f.sync_all()
        .with_context(|| format!("sync {}", path.display()))
}
