// Classifier evaluation over a labelled folder of still frames
//
// Layout: <root>/positive/* and <root>/negative/*

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::PipelineResult;
use crate::pipeline::classifier::ClassifierSession;

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "webp", "bmp"];

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ConfusionCounts {
    pub tp: usize,
    pub tn: usize,
    pub fp: usize,
    pub fn_: usize,
}

impl ConfusionCounts {
    pub fn record(&mut self, actual: bool, predicted: bool) {
        match (actual, predicted) {
            (true, true) => self.tp += 1,
            (false, false) => self.tn += 1,
            (false, true) => self.fp += 1,
            (true, false) => self.fn_ += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.tp + self.tn + self.fp + self.fn_
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.tp + self.tn, self.total())
    }

    pub fn precision(&self) -> f64 {
        ratio(self.tp, self.tp + self.fp)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.tp, self.tp + self.fn_)
    }

    pub fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r > 0.0 {
            2.0 * p * r / (p + r)
        } else {
            0.0
        }
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Labelled images under `root`, positives first, each folder sorted by name.
pub fn list_labelled_images(root: &Path) -> Vec<(PathBuf, bool)> {
    let mut items = Vec::new();
    for (folder, label) in [("positive", true), ("negative", false)] {
        let dir = root.join(folder);
        if !dir.is_dir() {
            continue;
        }
        let images = WalkDir::new(&dir)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                e.path()
                    .extension()
                    .and_then(|s| s.to_str())
                    .map(|s| IMAGE_EXTENSIONS.contains(&s.to_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .map(|e| (e.path().to_path_buf(), label));
        items.extend(images);
    }
    items
}

/// Classify every labelled image and report the confusion counts.
/// Images that cannot be opened are logged and left out.
pub fn evaluate(
    session: &mut ClassifierSession,
    root: &Path,
    confidence_threshold: f64,
) -> PipelineResult<ConfusionCounts> {
    let items = list_labelled_images(root);
    if items.is_empty() {
        tracing::warn!(
            "No images found in {}/positive or {}/negative",
            root.display(),
            root.display()
        );
        return Ok(ConfusionCounts::default());
    }

    let mut counts = ConfusionCounts::default();
    for (path, actual) in items {
        let image = match image::open(&path) {
            Ok(img) => img.to_rgb8(),
            Err(e) => {
                tracing::error!("{}: {}", path.display(), e);
                continue;
            }
        };

        let record = session.classify_image(image)?;
        let predicted = record.is_accepted(confidence_threshold);
        tracing::info!(
            "{} | {:<30} | pred={} | label={} conf={:.3}",
            if actual { "P" } else { "N" },
            path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default(),
            if predicted { "yes" } else { "no" },
            record.label,
            record.confidence
        );
        counts.record(actual, predicted);
    }

    tracing::info!(
        "TP={} TN={} FP={} FN={}",
        counts.tp,
        counts.tn,
        counts.fp,
        counts.fn_
    );
    tracing::info!(
        "Accuracy: {:.3} Precision: {:.3} Recall: {:.3} F1: {:.3}",
        counts.accuracy(),
        counts.precision(),
        counts.recall(),
        counts.f1()
    );
    Ok(counts)
}
