use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A frame of the reduced-rate stream and where it sits in the original video.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampledFrame {
    #[serde(rename = "inference_frame_number")]
    pub sampled_index: usize,
    pub original_frame_number: u64,
    #[serde(rename = "original_timestamp_sec")]
    pub timestamp_sec: f64,
}

/// Ordered sampled-index -> original-timestamp mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimestampTable {
    frames: Vec<SampledFrame>,
}

impl TimestampTable {
    pub fn new(mut frames: Vec<SampledFrame>) -> Self {
        frames.sort_by_key(|f| f.sampled_index);
        Self { frames }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[SampledFrame] {
        &self.frames
    }

    pub fn get(&self, sampled_index: usize) -> Option<&SampledFrame> {
        // Tables built by the sampler are dense, so the index is the position.
        match self.frames.get(sampled_index) {
            Some(frame) if frame.sampled_index == sampled_index => Some(frame),
            _ => self
                .frames
                .binary_search_by_key(&sampled_index, |f| f.sampled_index)
                .ok()
                .map(|pos| &self.frames[pos]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Yes,
    No,
}

impl Label {
    /// `yes` iff the last line of the answer mentions "yes", case-insensitively.
    pub fn from_answer(answer: &str) -> Self {
        let normalized = answer.trim().to_lowercase();
        let last_line = normalized.lines().last().unwrap_or("");
        if last_line.contains("yes") {
            Label::Yes
        } else {
            Label::No
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Yes => write!(f, "yes"),
            Label::No => write!(f, "no"),
        }
    }
}

/// Classifier verdict for one sampled frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassificationRecord {
    pub sampled_index: usize,
    pub label: Label,
    pub confidence: f32,
}

impl ClassificationRecord {
    pub fn is_accepted(&self, confidence_threshold: f64) -> bool {
        self.label == Label::Yes && f64::from(self.confidence) >= confidence_threshold
    }
}

/// A span of the original video believed to contain the target action.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EventInterval {
    pub start: f64,
    pub end: f64,
}

impl EventInterval {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Terminal, non-error result of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Reel(PathBuf),
    NoEvents,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_from_answer() {
        assert_eq!(Label::from_answer("Yes"), Label::Yes);
        assert_eq!(Label::from_answer("  YES, someone is jumping "), Label::Yes);
        assert_eq!(Label::from_answer("no"), Label::No);
        assert_eq!(Label::from_answer(""), Label::No);
        // Only the final line of the decoded answer counts
        assert_eq!(Label::from_answer("answer yes or no\nno"), Label::No);
        assert_eq!(Label::from_answer("question?\nyes"), Label::Yes);
    }

    #[test]
    fn test_record_acceptance() {
        let record = ClassificationRecord {
            sampled_index: 3,
            label: Label::Yes,
            confidence: 0.9,
        };
        assert!(record.is_accepted(0.845));
        assert!(!record.is_accepted(0.95));

        let rejected = ClassificationRecord {
            label: Label::No,
            ..record
        };
        assert!(!rejected.is_accepted(0.0));
    }

    #[test]
    fn test_timestamp_table_lookup() {
        let table = TimestampTable::new(vec![
            SampledFrame {
                sampled_index: 1,
                original_frame_number: 6,
                timestamp_sec: 0.25,
            },
            SampledFrame {
                sampled_index: 0,
                original_frame_number: 0,
                timestamp_sec: 0.0,
            },
            SampledFrame {
                sampled_index: 3,
                original_frame_number: 18,
                timestamp_sec: 0.75,
            },
        ]);

        assert_eq!(table.len(), 3);
        assert_eq!(table.get(0).map(|f| f.timestamp_sec), Some(0.0));
        assert_eq!(table.get(1).map(|f| f.original_frame_number), Some(6));
        // Sparse tables fall back to a search
        assert_eq!(table.get(3).map(|f| f.timestamp_sec), Some(0.75));
        assert!(table.get(2).is_none());
    }
}
