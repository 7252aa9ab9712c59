use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::Instant;

// Status lines consumed by the external progress reporter. Wording is fixed.
pub const STAGE1_COMPLETED: &str = "Stage 1 (downsampling) completed";
pub const STAGE2_COMPLETED: &str = "Stage 2 (inference) completed";
pub const STAGE3_COMPLETED: &str = "Stage 3 (clipping & merging) completed";
pub const RUN_FINISHED: &str = "=== Video Highlight Processor Finished Successfully ===";

pub const STAGES: [&str; 4] = ["sample", "classify", "postprocess", "assemble"];

pub fn clipping_started(name: &str) -> String {
    format!("Starting clipping and merging for '{}'...", name)
}

pub fn reel_saved(path: &std::path::Path) -> String {
    format!("Final highlight video saved to: {}", path.display())
}

#[derive(Debug, Serialize, Clone, Default)]
pub struct StageProgress {
    pub current: usize,
    pub total: usize,
    pub ms_per_unit: f64,
}

/// Per-run progress, one entry per stage.
#[derive(Debug)]
pub struct ProcessingState {
    pub run_id: String,
    pub stages: RwLock<BTreeMap<String, StageProgress>>,
    pub start_time: Instant,
}

impl ProcessingState {
    pub fn new(run_id: String) -> Self {
        let stages = STAGES
            .iter()
            .map(|s| (s.to_string(), StageProgress::default()))
            .collect();
        Self {
            run_id,
            stages: RwLock::new(stages),
            start_time: Instant::now(),
        }
    }

    pub fn set_total(&self, stage: &str, total: usize) {
        if let Ok(mut stages) = self.stages.write() {
            if let Some(progress) = stages.get_mut(stage) {
                progress.total = total;
            }
        }
    }

    pub fn update_stage(&self, stage: &str, current: usize, ms_per_unit: f64) {
        if let Ok(mut stages) = self.stages.write() {
            if let Some(progress) = stages.get_mut(stage) {
                progress.current = current;
                // Exponential moving average for smoothing durations
                if progress.ms_per_unit == 0.0 {
                    progress.ms_per_unit = ms_per_unit;
                } else {
                    progress.ms_per_unit = progress.ms_per_unit * 0.9 + ms_per_unit * 0.1;
                }
            }
        }
    }

    #[cfg(test)]
    pub fn stage(&self, stage: &str) -> Option<StageProgress> {
        self.stages.read().ok()?.get(stage).cloned()
    }

    pub fn to_progress_json(&self) -> serde_json::Value {
        let stages_json: BTreeMap<String, serde_json::Value> = self
            .stages
            .read()
            .map(|stages| {
                stages
                    .iter()
                    .map(|(k, v)| {
                        (
                            k.clone(),
                            serde_json::json!({
                                "current": v.current,
                                "total": v.total,
                                "ms_per_unit": v.ms_per_unit,
                                "per_sec": if v.ms_per_unit > 0.0 { 1000.0 / v.ms_per_unit } else { 0.0 },
                            }),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();

        serde_json::json!({
            "run_id": self.run_id,
            "elapsed_sec": self.start_time.elapsed().as_secs_f64(),
            "stages": stages_json,
        })
    }
}

/// Emits `Running Inference: N%` each time the integer percentage advances.
#[derive(Debug)]
pub struct InferencePercent {
    total: usize,
    last: Option<u32>,
}

impl InferencePercent {
    pub fn new(total: usize) -> Self {
        Self { total, last: None }
    }

    /// Returns the percent that was logged, if any.
    pub fn advance(&mut self, done: usize) -> Option<u32> {
        if self.total == 0 {
            return None;
        }
        let percent = ((done.min(self.total) * 100) / self.total) as u32;
        if self.last.is_some_and(|last| percent <= last) {
            return None;
        }
        self.last = Some(percent);
        tracing::info!("Running Inference: {}%", percent);
        Some(percent)
    }
}
