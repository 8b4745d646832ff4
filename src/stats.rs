//! Side-panel statistics.
//!
//! Counts come from the visible detections. Quality metrics are invented from
//! the model profile with bounded noise; they never feed back into generation.

use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::classes::DetectionClass;
use crate::detect::Detection;
use crate::models::ModelProfile;

const PRECISION_OFFSET: f32 = 0.30;
const RECALL_OFFSET: f32 = 0.20;
const METRIC_JITTER: f32 = 0.03;
const LATENCY_JITTER: f32 = 0.10;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ClassCount {
    pub class: DetectionClass,
    pub count: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectionStats {
    pub total: usize,
    pub average_confidence: f32,
    /// Sorted by count descending, then label.
    pub per_class: Vec<ClassCount>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ModelMetrics {
    pub precision: f32,
    pub recall: f32,
    pub f1: f32,
    pub inference_ms: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub model_id: String,
    pub detections: DetectionStats,
    pub metrics: ModelMetrics,
}

pub fn class_counts(detections: &[Detection]) -> BTreeMap<DetectionClass, usize> {
    let mut counts = BTreeMap::new();
    for det in detections {
        *counts.entry(det.class()).or_insert(0) += 1;
    }
    counts
}

pub fn detection_stats(detections: &[Detection]) -> DetectionStats {
    let mut per_class: Vec<ClassCount> = class_counts(detections)
        .into_iter()
        .map(|(class, count)| ClassCount { class, count })
        .collect();
    per_class.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.class.label().cmp(b.class.label()))
    });
    let average_confidence = if detections.is_empty() {
        0.0
    } else {
        detections.iter().map(|d| d.confidence()).sum::<f32>() / detections.len() as f32
    };
    DetectionStats {
        total: detections.len(),
        average_confidence,
        per_class,
    }
}

/// Display metrics consistent with the model's declared meanAP and fps.
pub fn model_metrics(model: &ModelProfile, rng: &mut impl Rng) -> ModelMetrics {
    let base = model.mean_ap / 100.0;
    let precision =
        (base + PRECISION_OFFSET + rng.gen_range(-METRIC_JITTER..=METRIC_JITTER)).clamp(0.0, 1.0);
    let recall =
        (base + RECALL_OFFSET + rng.gen_range(-METRIC_JITTER..=METRIC_JITTER)).clamp(0.0, 1.0);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    let frame_ms = 1000.0 / model.fps.max(1) as f32;
    let inference_ms = frame_ms * (1.0 + rng.gen_range(-LATENCY_JITTER..=LATENCY_JITTER));
    ModelMetrics {
        precision,
        recall,
        f1,
        inference_ms,
    }
}

pub struct StatsAggregator;

impl StatsAggregator {
    pub fn summarize(visible: &[Detection], model: &ModelProfile) -> StatsSnapshot {
        StatsSnapshot {
            model_id: model.id.to_string(),
            detections: detection_stats(visible),
            metrics: model_metrics(model, &mut rand::thread_rng()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;
    use crate::models::catalog;

    fn det(class: &str, confidence: f32) -> Detection {
        Detection::new(
            format!("{}-{}", class, confidence),
            DetectionClass::from_label(class).unwrap(),
            confidence,
            BoundingBox::default(),
        )
    }

    #[test]
    fn counts_and_ordering() {
        let visible = vec![
            det("dog", 0.6),
            det("car", 0.8),
            det("dog", 0.7),
            det("bus", 0.9),
        ];
        let stats = detection_stats(&visible);
        assert_eq!(stats.total, 4);
        assert!((stats.average_confidence - 0.75).abs() < 1e-6);
        let order: Vec<_> = stats
            .per_class
            .iter()
            .map(|c| (c.class.label(), c.count))
            .collect();
        assert_eq!(order, vec![("dog", 2), ("bus", 1), ("car", 1)]);
        assert_eq!(class_counts(&visible).values().sum::<usize>(), 4);
    }

    #[test]
    fn empty_set_has_zero_average() {
        let stats = detection_stats(&[]);
        assert_eq!(stats.total, 0);
        assert_eq!(stats.average_confidence, 0.0);
        assert!(stats.per_class.is_empty());
    }

    #[test]
    fn metrics_stay_in_bounds() {
        let mut rng = rand::thread_rng();
        for model in catalog() {
            let frame_ms = 1000.0 / model.fps as f32;
            for _ in 0..200 {
                let m = model_metrics(model, &mut rng);
                assert!((0.0..=1.0).contains(&m.precision));
                assert!((0.0..=1.0).contains(&m.recall));
                assert!(m.f1 <= m.precision.max(m.recall) + 1e-6);
                assert!(m.f1 >= m.precision.min(m.recall) - 1e-6);
                assert!(m.inference_ms >= frame_ms * 0.89 && m.inference_ms <= frame_ms * 1.11);
            }
        }
    }
}
