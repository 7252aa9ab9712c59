use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

use crate::error::{PipelineError, PipelineResult};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RunMetadata {
    pub original_name: String,
    pub source_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub run_id: String,
}

/// Run-exclusive working area. The directory and everything in it is removed
/// when the context is dropped.
#[derive(Debug)]
pub struct RunContext {
    pub metadata: RunMetadata,
    dir: TempDir,
}

impl RunContext {
    /// Create a fresh working area for `source`, under `root` if given.
    pub fn create(source: &Path, root: Option<&Path>) -> PipelineResult<Self> {
        let stem = video_stem(source)?;

        let mut builder = tempfile::Builder::new();
        builder.prefix("highlight-run-");
        let dir = match root {
            Some(root) => {
                fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };

        let created_at = Utc::now();
        let metadata = RunMetadata {
            original_name: source
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| stem.clone()),
            source_path: source.to_path_buf(),
            created_at,
            run_id: format!("{}-{}", stem, created_at.format("%Y%m%dT%H%M%S")),
        };

        let content = serde_json::to_string_pretty(&metadata)?;
        fs::write(dir.path().join("metadata.json"), content)?;
        tracing::debug!("Working area for {} at {}", metadata.run_id, dir.path().display());

        Ok(Self { metadata, dir })
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Files currently in the working area, for end-of-run diagnostics.
    pub fn list_files(&self) -> Vec<PathBuf> {
        WalkDir::new(self.dir.path())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.path().to_path_buf())
            .collect()
    }
}

pub fn video_stem(path: &Path) -> PipelineResult<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| PipelineError::source_read(path, "invalid video file name"))
}

/// Output name of the reel for a source video: `<stem>_highlights.mp4`.
pub fn reel_file_name(source: &Path) -> PipelineResult<String> {
    Ok(format!("{}_highlights.mp4", video_stem(source)?))
}

/// Move a file, falling back to copy + delete across filesystems.
pub fn move_file(src: &Path, dst: &Path) -> PipelineResult<()> {
    if let Some(parent) = dst.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            tracing::debug!(
                "Cross-device rename, copying instead: {} -> {}",
                src.display(),
                dst.display()
            );
            let tmp_dst = dst.with_extension("tmp");
            if let Err(e) = fs::copy(src, &tmp_dst) {
                let _ = fs::remove_file(&tmp_dst);
                return Err(e.into());
            }
            fs::rename(&tmp_dst, dst)?;
            fs::remove_file(src)?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// EXDEV on Linux and macOS
fn is_cross_device_error(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(18)
}
