//! Confidence / visibility filter.
//!
//! The visible set is a pure function of three inputs: the raw detections, the
//! confidence threshold and the per-class visibility map. `FilterPipeline`
//! stores the last result and must be recomputed after any input changes.

use std::collections::BTreeSet;

use crate::classes::DetectionClass;
use crate::detect::Detection;

pub const MIN_CONFIDENCE_THRESHOLD: f32 = 0.1;
pub const MAX_CONFIDENCE_THRESHOLD: f32 = 1.0;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// Minimum confidence a detection needs to be shown, kept within `[0.1, 1.0]`.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct ConfidenceThreshold(f32);

impl ConfidenceThreshold {
    /// Clamp `value` into range. NaN falls back to the minimum.
    pub fn clamped(value: f32) -> Self {
        if value.is_nan() {
            return Self(MIN_CONFIDENCE_THRESHOLD);
        }
        Self(value.clamp(MIN_CONFIDENCE_THRESHOLD, MAX_CONFIDENCE_THRESHOLD))
    }

    /// Accept `value` only when it is already in range.
    pub fn checked(value: f32) -> Option<Self> {
        (MIN_CONFIDENCE_THRESHOLD..=MAX_CONFIDENCE_THRESHOLD)
            .contains(&value)
            .then_some(Self(value))
    }

    pub fn value(self) -> f32 {
        self.0
    }

    pub fn admits(self, confidence: f32) -> bool {
        confidence >= self.0
    }
}

impl Default for ConfidenceThreshold {
    fn default() -> Self {
        Self(DEFAULT_CONFIDENCE_THRESHOLD)
    }
}

/// Per-class on/off switches. Every class starts visible; only hidden classes
/// are stored.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClassVisibility {
    hidden: BTreeSet<DetectionClass>,
}

impl ClassVisibility {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_visible(&self, class: DetectionClass) -> bool {
        !self.hidden.contains(&class)
    }

    /// Flip visibility; returns the new state.
    pub fn toggle(&mut self, class: DetectionClass) -> bool {
        if self.hidden.remove(&class) {
            true
        } else {
            self.hidden.insert(class);
            false
        }
    }

    pub fn set(&mut self, class: DetectionClass, visible: bool) {
        if visible {
            self.hidden.remove(&class);
        } else {
            self.hidden.insert(class);
        }
    }

    pub fn show_all(&mut self) {
        self.hidden.clear();
    }

    pub fn hide_all(&mut self) {
        self.hidden = DetectionClass::all().collect();
    }

    pub fn hidden(&self) -> impl Iterator<Item = DetectionClass> + '_ {
        self.hidden.iter().copied()
    }
}

/// `raw` filtered by threshold and visibility, preserving order.
pub fn filter_detections(
    raw: &[Detection],
    threshold: ConfidenceThreshold,
    visibility: &ClassVisibility,
) -> Vec<Detection> {
    raw.iter()
        .filter(|det| threshold.admits(det.confidence()) && visibility.is_visible(det.class()))
        .cloned()
        .collect()
}

/// Holds the filter inputs owned by the UI and the derived visible set.
#[derive(Clone, Debug, Default)]
pub struct FilterPipeline {
    threshold: ConfidenceThreshold,
    visibility: ClassVisibility,
    filtered: Vec<Detection>,
}

impl FilterPipeline {
    pub fn new(threshold: ConfidenceThreshold) -> Self {
        Self {
            threshold,
            ..Self::default()
        }
    }

    pub fn threshold(&self) -> ConfidenceThreshold {
        self.threshold
    }

    pub fn visibility(&self) -> &ClassVisibility {
        &self.visibility
    }

    pub fn set_threshold(&mut self, threshold: ConfidenceThreshold) {
        self.threshold = threshold;
    }

    pub fn visibility_mut(&mut self) -> &mut ClassVisibility {
        &mut self.visibility
    }

    /// Rebuild the visible set from `raw`. Returns the visible count.
    pub fn recompute(&mut self, raw: &[Detection]) -> usize {
        self.filtered = filter_detections(raw, self.threshold, &self.visibility);
        log::debug!(
            "filter recomputed: {}/{} visible at threshold {:.2}",
            self.filtered.len(),
            raw.len(),
            self.threshold.value()
        );
        self.filtered.len()
    }

    pub fn filtered(&self) -> &[Detection] {
        &self.filtered
    }

    pub fn contains(&self, id: &str) -> bool {
        self.filtered.iter().any(|det| det.id() == id)
    }
}
