// Stage 3: cut each interval out of the source and stitch the clips together.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::EncodeConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::types::EventInterval;
use crate::video::ffmpeg_cli::concat_entry;
use crate::video::MediaTool;

pub const CONCAT_MANIFEST: &str = "concat_list.txt";

pub fn clip_file_name(ordinal: usize) -> String {
    format!("clip_{:03}.mp4", ordinal)
}

/// Removes intermediate files when dropped.
#[derive(Debug, Default)]
struct ScratchFiles {
    paths: Vec<PathBuf>,
}

impl ScratchFiles {
    fn track(&mut self, path: PathBuf) -> PathBuf {
        self.paths.push(path.clone());
        path
    }
}

impl Drop for ScratchFiles {
    fn drop(&mut self) {
        for path in &self.paths {
            match fs::remove_file(path) {
                Ok(()) => tracing::debug!("Removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Could not remove {}: {}", path.display(), e),
            }
        }
    }
}

fn write_manifest(path: &Path, clips: &[PathBuf]) -> PipelineResult<()> {
    let mut file = fs::File::create(path)?;
    for clip in clips {
        let absolute = std::path::absolute(clip)?;
        writeln!(file, "{}", concat_entry(&absolute))?;
    }
    file.flush()?;
    Ok(())
}

/// Extract every interval into `work_dir` and concatenate them into `output`.
///
/// Returns `Ok(None)` when there is nothing to assemble. Clips that fail to
/// extract are skipped; if none survive the run fails. Intermediate files are
/// removed on every path, and a failed concat leaves no output behind.
pub fn assemble(
    media: &dyn MediaTool,
    source: &Path,
    intervals: &[EventInterval],
    encode: &EncodeConfig,
    work_dir: &Path,
    output: &Path,
) -> PipelineResult<Option<PathBuf>> {
    if intervals.is_empty() {
        tracing::info!("No intervals to assemble");
        return Ok(None);
    }

    let mut scratch = ScratchFiles::default();
    let manifest = scratch.track(work_dir.join(CONCAT_MANIFEST));

    let mut clips = Vec::with_capacity(intervals.len());
    for (i, interval) in intervals.iter().enumerate() {
        let clip_path = scratch.track(work_dir.join(clip_file_name(i)));
        tracing::info!(
            "Creating clip {}/{}: {:.2}s - {:.2}s",
            i + 1,
            intervals.len(),
            interval.start,
            interval.end
        );

        match media.extract_clip(source, &clip_path, interval, encode) {
            Ok(()) => clips.push(clip_path),
            Err(e) => {
                let err = PipelineError::Extraction {
                    start: interval.start,
                    end: interval.end,
                    message: e.to_string(),
                };
                tracing::warn!("{}; skipping clip", err);
            }
        }
    }

    if clips.is_empty() {
        return Err(PipelineError::assembly(format!(
            "all {} clips failed to extract",
            intervals.len()
        )));
    }
    if clips.len() < intervals.len() {
        tracing::warn!(
            "Assembling {} of {} clips",
            clips.len(),
            intervals.len()
        );
    }

    write_manifest(&manifest, &clips)?;

    if let Err(e) = media.concat(&manifest, output) {
        if output.exists() {
            if let Err(rm) = fs::remove_file(output) {
                tracing::warn!("Could not remove partial output {}: {}", output.display(), rm);
            }
        }
        return Err(PipelineError::assembly(format!("concatenation failed: {}", e)));
    }

    tracing::info!("Merged {} clips into {}", clips.len(), output.display());
    Ok(Some(output.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::FakeMedia;
    use crate::video::FrameRate;

    fn setup() -> (tempfile::TempDir, FakeMedia, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let media = FakeMedia::new(FrameRate::new(30, 1), 60.0);
        let output = dir.path().join("reel.mp4");
        (dir, media, output)
    }

    fn leftover_scratch(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|n| n.starts_with("clip_") || n == CONCAT_MANIFEST)
            .collect()
    }

    #[test]
    fn test_no_intervals_means_no_output() {
        let (dir, media, output) = setup();
        let result = assemble(
            &media,
            Path::new("in.mp4"),
            &[],
            &EncodeConfig::default(),
            dir.path(),
            &output,
        )
        .unwrap();
        assert!(result.is_none());
        assert!(media.extracted().is_empty());
        assert!(media.manifest().is_none());
    }

    #[test]
    fn test_single_interval_still_concatenates() {
        let (dir, media, output) = setup();
        let result = assemble(
            &media,
            Path::new("in.mp4"),
            &[EventInterval::new(1.0, 4.0)],
            &EncodeConfig::default(),
            dir.path(),
            &output,
        )
        .unwrap();

        assert_eq!(result, Some(output.clone()));
        assert!(output.exists());
        let manifest = media.manifest().unwrap();
        assert_eq!(manifest.lines().count(), 1);
        assert!(manifest.starts_with("file '"));
        assert!(leftover_scratch(dir.path()).is_empty());
    }

    #[test]
    fn test_failed_clip_is_skipped() {
        let (dir, media, output) = setup();
        media.fail_clip(1);
        let intervals = [
            EventInterval::new(0.0, 4.0),
            EventInterval::new(10.0, 14.0),
            EventInterval::new(20.0, 24.0),
        ];
        let result = assemble(
            &media,
            Path::new("in.mp4"),
            &intervals,
            &EncodeConfig::default(),
            dir.path(),
            &output,
        )
        .unwrap();

        assert!(result.is_some());
        let manifest = media.manifest().unwrap();
        let lines: Vec<&str> = manifest.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("clip_000.mp4"));
        assert!(lines[1].contains("clip_002.mp4"));
        assert!(leftover_scratch(dir.path()).is_empty());
    }

    #[test]
    fn test_all_clips_failing_is_assembly_error() {
        let (dir, media, output) = setup();
        media.fail_clip(0);
        media.fail_clip(1);
        let err = assemble(
            &media,
            Path::new("in.mp4"),
            &[EventInterval::new(0.0, 4.0), EventInterval::new(10.0, 14.0)],
            &EncodeConfig::default(),
            dir.path(),
            &output,
        )
        .unwrap_err();

        assert!(matches!(err, PipelineError::Assembly(_)));
        assert!(media.manifest().is_none());
        assert!(!output.exists());
    }

    #[test]
    fn test_failed_concat_leaves_nothing() {
        let (dir, media, output) = setup();
        media.fail_concat();
        let err = assemble(
            &media,
            Path::new("in.mp4"),
            &[EventInterval::new(0.0, 4.0)],
            &EncodeConfig::default(),
            dir.path(),
            &output,
        )
        .unwrap_err();

        assert!(matches!(err, PipelineError::Assembly(_)));
        assert!(!output.exists());
        assert!(leftover_scratch(dir.path()).is_empty());
    }
}
