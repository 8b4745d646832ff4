//! Static catalog of selectable model profiles.
//!
//! Profiles stand in for real models: `fps` paces the processing simulation
//! and `mean_ap` shapes how many detections appear and how confident they are.

use anyhow::Result;
use serde::Serialize;

use crate::SimError;

pub const DEFAULT_MODEL_ID: &str = "yolov8n";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedTier {
    Fast,
    Medium,
    Slow,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccuracyTier {
    Standard,
    High,
    Highest,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ModelProfile {
    pub id: &'static str,
    pub display_name: &'static str,
    pub speed_tier: SpeedTier,
    pub accuracy_tier: AccuracyTier,
    pub size_label: &'static str,
    /// Declared frames per second.
    pub fps: u32,
    /// Declared mean average precision, 0..=100.
    pub mean_ap: f32,
}

pub static MODEL_CATALOG: [ModelProfile; 5] = [
    ModelProfile {
        id: "yolov8n",
        display_name: "YOLOv8 Nano",
        speed_tier: SpeedTier::Fast,
        accuracy_tier: AccuracyTier::Standard,
        size_label: "6.2 MB",
        fps: 45,
        mean_ap: 37.3,
    },
    ModelProfile {
        id: "yolov8s",
        display_name: "YOLOv8 Small",
        speed_tier: SpeedTier::Fast,
        accuracy_tier: AccuracyTier::High,
        size_label: "21.5 MB",
        fps: 35,
        mean_ap: 44.9,
    },
    ModelProfile {
        id: "yolov8m",
        display_name: "YOLOv8 Medium",
        speed_tier: SpeedTier::Medium,
        accuracy_tier: AccuracyTier::High,
        size_label: "49.7 MB",
        fps: 25,
        mean_ap: 50.2,
    },
    ModelProfile {
        id: "yolov8x",
        display_name: "YOLOv8 XLarge",
        speed_tier: SpeedTier::Slow,
        accuracy_tier: AccuracyTier::Highest,
        size_label: "130.5 MB",
        fps: 12,
        mean_ap: 53.9,
    },
    ModelProfile {
        id: "detr-r50",
        display_name: "DETR ResNet-50",
        speed_tier: SpeedTier::Slow,
        accuracy_tier: AccuracyTier::High,
        size_label: "159 MB",
        fps: 10,
        mean_ap: 42.0,
    },
];

pub fn catalog() -> &'static [ModelProfile] {
    &MODEL_CATALOG
}

/// Look up a profile by id. Unknown ids fail with `SimError::NotFound`.
pub fn model_by_id(id: &str) -> Result<&'static ModelProfile> {
    MODEL_CATALOG
        .iter()
        .find(|model| model.id == id)
        .ok_or_else(|| SimError::not_found("model", id).into())
}

/// The profile used when nothing else has been chosen.
pub fn default_model() -> &'static ModelProfile {
    &MODEL_CATALOG[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_model_is_in_catalog() {
        assert_eq!(model_by_id(DEFAULT_MODEL_ID).unwrap(), default_model());
    }

    #[test]
    fn unknown_model_is_not_found() {
        let err = model_by_id("resnet-9000").unwrap_err();
        assert_eq!(
            err.downcast_ref::<SimError>(),
            Some(&SimError::NotFound {
                what: "model",
                id: "resnet-9000".to_string()
            })
        );
    }

    #[test]
    fn catalog_values_are_sane() {
        for model in catalog() {
            assert!(model.fps > 0, "{} has zero fps", model.id);
            assert!((0.0..=100.0).contains(&model.mean_ap));
        }
        let mut ids: Vec<_> = catalog().iter().map(|m| m.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), catalog().len());
    }
}
