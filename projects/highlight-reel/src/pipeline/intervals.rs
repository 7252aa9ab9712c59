// Turns per-frame verdicts into merged event intervals on the source timeline.

use crate::config::PostProcessConfig;
use crate::pipeline::types::{ClassificationRecord, EventInterval, TimestampTable};
use crate::run_artifacts::PredictionRow;

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// How to place a sampled index that has no timestamp table entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimestampFallback {
    /// Stride and source rate known: same mapping the sampler used
    Stride { stride: u32, fps: f64 },
    /// Only the classification rate is known
    TargetRate(i32),
}

impl TimestampFallback {
    pub fn estimate(&self, index: usize) -> f64 {
        match *self {
            Self::Stride { stride, fps } if fps > 0.0 => {
                let secs = (index as u64 * u64::from(stride.max(1))) as f64 / fps;
                (secs * 1000.0).round() / 1000.0
            }
            Self::Stride { .. } => 0.0,
            Self::TargetRate(target_fps) => round2(index as f64 / target_fps.max(1) as f64),
        }
    }
}

/// Source timestamps of accepted detections, ascending.
pub fn accepted_timestamps(
    records: &[ClassificationRecord],
    table: &TimestampTable,
    fallback: TimestampFallback,
    confidence_threshold: f64,
) -> Vec<f64> {
    let mut missing = 0usize;
    let mut timestamps: Vec<f64> = records
        .iter()
        .filter(|r| r.is_accepted(confidence_threshold))
        .map(|r| match table.get(r.sampled_index) {
            Some(frame) => frame.timestamp_sec,
            None => {
                missing += 1;
                fallback.estimate(r.sampled_index)
            }
        })
        .collect();

    if missing > 0 {
        tracing::warn!(
            "{} accepted frames have no timestamp entry; estimated with {:?}",
            missing,
            fallback
        );
    }

    timestamps.sort_by(f64::total_cmp);
    timestamps
}

/// Splits sorted timestamps wherever the gap exceeds `threshold`.
/// Each group is returned as its (first, last) timestamp.
pub fn group_timestamps(timestamps: &[f64], threshold: f64) -> Vec<(f64, f64)> {
    let mut groups: Vec<(f64, f64)> = Vec::new();
    for &ts in timestamps {
        match groups.last_mut() {
            Some((_, last)) if ts - *last <= threshold => *last = ts,
            _ => groups.push((ts, ts)),
        }
    }
    groups
}

/// Pads each group and clamps it to `[0, duration]`. Empty results are dropped.
pub fn buffer_groups(
    groups: &[(f64, f64)],
    buffer_start: f64,
    buffer_end: f64,
    duration: f64,
) -> Vec<EventInterval> {
    groups
        .iter()
        .filter_map(|&(first, last)| {
            let start = round2((first - buffer_start).max(0.0));
            let end = round2(last + buffer_end).min(duration);
            (end > start).then(|| EventInterval::new(start, end))
        })
        .collect()
}

/// Sorts by start and merges neighbours closer than `max_gap`.
pub fn merge_intervals(intervals: &[EventInterval], max_gap: f64) -> Vec<EventInterval> {
    let mut sorted = intervals.to_vec();
    sorted.sort_by(|a, b| a.start.total_cmp(&b.start).then(a.end.total_cmp(&b.end)));

    let mut merged: Vec<EventInterval> = Vec::with_capacity(sorted.len());
    for interval in sorted {
        match merged.last_mut() {
            Some(prev) if interval.start - prev.end <= max_gap => {
                prev.end = prev.end.max(interval.end);
            }
            _ => merged.push(interval),
        }
    }
    merged
}

/// Full post-processing: filter, group, pad, merge.
pub fn derive_intervals(
    records: &[ClassificationRecord],
    table: &TimestampTable,
    fallback: TimestampFallback,
    config: &PostProcessConfig,
    duration: f64,
) -> Vec<EventInterval> {
    let timestamps = accepted_timestamps(records, table, fallback, config.confidence_threshold);
    let groups = group_timestamps(&timestamps, config.grouping_threshold_sec);
    let buffered = buffer_groups(
        &groups,
        config.buffer_start_sec,
        config.buffer_end_sec,
        duration,
    );
    let intervals = merge_intervals(&buffered, config.merge_gap_sec);

    tracing::info!(
        "{} accepted frames -> {} groups -> {} intervals",
        timestamps.len(),
        groups.len(),
        intervals.len()
    );
    intervals
}

/// Same as [`derive_intervals`] for rows read back from predictions.csv.
pub fn derive_from_rows(
    rows: &[PredictionRow],
    target_fps: i32,
    config: &PostProcessConfig,
    duration: f64,
) -> Vec<EventInterval> {
    let table = TimestampTable::new(
        rows.iter()
            .filter_map(|row| {
                Some(crate::pipeline::types::SampledFrame {
                    sampled_index: row.inference_frame_number,
                    original_frame_number: row.original_frame_number?,
                    timestamp_sec: row.timestamp_sec?,
                })
            })
            .collect(),
    );
    let records: Vec<ClassificationRecord> = rows.iter().map(PredictionRow::to_record).collect();
    derive_intervals(
        &records,
        &table,
        TimestampFallback::TargetRate(target_fps),
        config,
        duration,
    )
}

/// Cleans caller-supplied intervals: drops invalid entries, clamps to the
/// source, sorts and fuses overlaps.
pub fn normalize_intervals(intervals: &[EventInterval], duration: f64) -> Vec<EventInterval> {
    let mut valid: Vec<EventInterval> = intervals
        .iter()
        .filter(|i| i.start.is_finite() && i.end.is_finite())
        .map(|i| EventInterval::new(i.start.max(0.0), i.end.min(duration)))
        .filter(|i| i.end > i.start)
        .collect();

    let dropped = intervals.len() - valid.len();
    if dropped > 0 {
        tracing::warn!("Dropped {} invalid or out-of-range intervals", dropped);
    }

    valid.sort_by(|a, b| a.start.total_cmp(&b.start));
    let mut fused: Vec<EventInterval> = Vec::with_capacity(valid.len());
    for interval in valid {
        match fused.last_mut() {
            Some(prev) if interval.start < prev.end => prev.end = prev.end.max(interval.end),
            _ => fused.push(interval),
        }
    }
    fused
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{Label, SampledFrame};

    const TARGET_4: TimestampFallback = TimestampFallback::TargetRate(4);

    fn table_at(timestamps: &[f64]) -> TimestampTable {
        TimestampTable::new(
            timestamps
                .iter()
                .enumerate()
                .map(|(i, &ts)| SampledFrame {
                    sampled_index: i,
                    original_frame_number: i as u64,
                    timestamp_sec: ts,
                })
                .collect(),
        )
    }

    fn yes(index: usize, confidence: f32) -> ClassificationRecord {
        ClassificationRecord {
            sampled_index: index,
            label: Label::Yes,
            confidence,
        }
    }

    #[test]
    fn test_reference_example() {
        let table = table_at(&[1.0, 2.0, 2.4, 10.0]);
        let records: Vec<_> = (0..4).map(|i| yes(i, 0.9)).collect();
        let intervals = derive_intervals(&records, &table, TARGET_4, &PostProcessConfig::default(), 60.0);
        assert_eq!(intervals, vec![EventInterval::new(0.0, 13.0)]);
    }

    #[test]
    fn test_derived_intervals_ignore_record_order() {
        let table = table_at(&[1.0, 2.0, 2.4, 10.0]);
        for order in [[2, 0, 3, 1], [3, 2, 1, 0], [1, 3, 0, 2]] {
            let records: Vec<_> = order.iter().map(|&i| yes(i, 0.9)).collect();
            let intervals =
                derive_intervals(&records, &table, TARGET_4, &PostProcessConfig::default(), 60.0);
            assert_eq!(intervals, vec![EventInterval::new(0.0, 13.0)], "order {:?}", order);
        }
    }

    #[test]
    fn test_groups_and_buffers_before_merge() {
        let groups = group_timestamps(&[1.0, 2.0, 2.4, 10.0], 2.5);
        assert_eq!(groups, vec![(1.0, 2.4), (10.0, 10.0)]);

        let buffered = buffer_groups(&groups, 1.5, 3.0, 60.0);
        assert_eq!(
            buffered,
            vec![EventInterval::new(0.0, 5.4), EventInterval::new(8.5, 13.0)]
        );
    }

    #[test]
    fn test_filter_uses_label_and_threshold() {
        let table = table_at(&[1.0, 2.0, 3.0, 4.0]);
        let records = vec![
            yes(0, 0.9),
            yes(1, 0.845),
            yes(2, 0.5),
            ClassificationRecord {
                label: Label::No,
                ..yes(3, 0.99)
            },
        ];
        assert_eq!(accepted_timestamps(&records, &table, TARGET_4, 0.845), vec![1.0, 2.0]);
    }

    #[test]
    fn test_missing_index_falls_back_to_target_rate() {
        let table = table_at(&[0.0]);
        assert_eq!(accepted_timestamps(&[yes(10, 0.9)], &table, TARGET_4, 0.5), vec![2.5]);
    }

    #[test]
    fn test_missing_index_uses_stride_when_known() {
        let table = table_at(&[0.0]);
        let fallback = TimestampFallback::Stride {
            stride: 7,
            fps: 30000.0 / 1001.0,
        };
        // 400 * 7 frames at 29.97 fps
        assert_eq!(accepted_timestamps(&[yes(400, 0.9)], &table, fallback, 0.5), vec![93.427]);
        assert_eq!(fallback.estimate(0), 0.0);
    }

    #[test]
    fn test_no_accepted_frames_gives_no_intervals() {
        let table = table_at(&[1.0, 2.0]);
        let records = vec![yes(0, 0.1), yes(1, 0.2)];
        assert!(derive_intervals(&records, &table, TARGET_4, &PostProcessConfig::default(), 60.0).is_empty());
        assert!(derive_intervals(&[], &table, TARGET_4, &PostProcessConfig::default(), 60.0).is_empty());
    }

    #[test]
    fn test_end_clamped_to_duration() {
        let intervals = buffer_groups(&[(9.0, 9.5)], 1.5, 3.0, 10.0);
        assert_eq!(intervals, vec![EventInterval::new(7.5, 10.0)]);

        // Padding start already past the end of the source
        assert!(buffer_groups(&[(12.0, 12.0)], 1.0, 1.0, 10.0).is_empty());
    }

    #[test]
    fn test_merge_ignores_input_order() {
        let intervals = vec![
            EventInterval::new(20.0, 24.0),
            EventInterval::new(0.0, 4.0),
            EventInterval::new(6.0, 9.0),
            EventInterval::new(40.0, 41.0),
            EventInterval::new(8.0, 12.0),
        ];
        let expected = vec![
            EventInterval::new(0.0, 12.0),
            EventInterval::new(20.0, 24.0),
            EventInterval::new(40.0, 41.0),
        ];

        let mut shuffled = intervals.clone();
        for rotation in 0..shuffled.len() {
            shuffled.rotate_left(1);
            assert_eq!(merge_intervals(&shuffled, 3.5), expected, "rotation {}", rotation);
            let mut reversed = shuffled.clone();
            reversed.reverse();
            assert_eq!(merge_intervals(&reversed, 3.5), expected);
        }
    }

    #[test]
    fn test_merged_output_is_disjoint() {
        let intervals = vec![
            EventInterval::new(0.0, 5.0),
            EventInterval::new(1.0, 2.0),
            EventInterval::new(9.0, 10.0),
        ];
        let merged = merge_intervals(&intervals, 0.5);
        assert_eq!(
            merged,
            vec![EventInterval::new(0.0, 5.0), EventInterval::new(9.0, 10.0)]
        );
        assert!(merged.windows(2).all(|w| w[0].end < w[1].start));
    }

    #[test]
    fn test_normalize_caller_intervals() {
        let raw = vec![
            EventInterval::new(25.0, 30.0),
            EventInterval::new(5.0, 10.0),
            EventInterval::new(8.0, 12.0),
            EventInterval::new(-2.0, 1.0),
            EventInterval::new(3.0, 3.0),
            EventInterval::new(18.0, 40.0),
            EventInterval::new(f64::NAN, 2.0),
        ];
        assert_eq!(
            normalize_intervals(&raw, 20.0),
            vec![
                EventInterval::new(0.0, 1.0),
                EventInterval::new(5.0, 12.0),
                EventInterval::new(18.0, 20.0),
            ]
        );
    }

    #[test]
    fn test_rows_round_trip_through_postprocess() {
        let rows = vec![
            PredictionRow {
                inference_frame_number: 0,
                original_frame_number: Some(0),
                timestamp_sec: Some(1.0),
                predicted_label: Label::Yes,
                confidence: 0.95,
            },
            PredictionRow {
                inference_frame_number: 1,
                original_frame_number: Some(8),
                timestamp_sec: Some(30.0),
                predicted_label: Label::No,
                confidence: 0.95,
            },
        ];
        let intervals = derive_from_rows(&rows, 4, &PostProcessConfig::default(), f64::INFINITY);
        assert_eq!(intervals, vec![EventInterval::new(0.0, 4.0)]);
    }
}
