use serde::{Deserialize, Serialize};

use crate::classes::DetectionClass;

/// Axis-aligned box in image pixel space. Serialized as `[x, y, width, height]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// True when the box lies entirely inside a `width` x `height` image.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.x >= 0.0
            && self.y >= 0.0
            && self.right() <= width as f32
            && self.bottom() <= height as f32
    }

    pub fn contains_point(&self, px: f32, py: f32) -> bool {
        px >= self.x && px <= self.right() && py >= self.y && py <= self.bottom()
    }

    /// Box grown by `margin` on every side.
    pub fn inflate(&self, margin: f32) -> Self {
        Self::new(
            self.x - margin,
            self.y - margin,
            self.width + margin * 2.0,
            self.height + margin * 2.0,
        )
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from(v: [f32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x, b.y, b.width, b.height]
    }
}

/// One detection. Fields are private: a detection never changes after the
/// generator creates it; a new run replaces the whole set instead.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    id: String,
    class: DetectionClass,
    confidence: f32,
    bbox: BoundingBox,
}

impl Detection {
    pub fn new(id: impl Into<String>, class: DetectionClass, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            id: id.into(),
            class,
            confidence,
            bbox,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn class(&self) -> DetectionClass {
        self.class
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    /// Display label, e.g. `person 87%`.
    pub fn label(&self) -> String {
        format!("{} {:.0}%", self.class.label(), self.confidence * 100.0)
    }
}

/// Output of one generator call: the raw detection set for one run.
#[derive(Clone, Debug, Default)]
pub struct DetectionResult {
    /// Sorted by descending confidence.
    pub detections: Vec<Detection>,
    pub image_width: u32,
    pub image_height: u32,
    pub model_id: String,
}

impl DetectionResult {
    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_exports_with_bbox_array() {
        let det = Detection::new(
            "det-1-0",
            DetectionClass::from_label("dog").unwrap(),
            0.5,
            BoundingBox::new(10.0, 20.0, 30.0, 40.0),
        );
        let json = serde_json::to_string(&det).unwrap();
        assert_eq!(
            json,
            r#"{"id":"det-1-0","class":"dog","confidence":0.5,"bbox":[10.0,20.0,30.0,40.0]}"#
        );
    }

    #[test]
    fn bbox_geometry() {
        let b = BoundingBox::new(5.0, 5.0, 10.0, 20.0);
        assert_eq!(b.right(), 15.0);
        assert_eq!(b.bottom(), 25.0);
        assert!(b.fits_within(15, 25));
        assert!(!b.fits_within(14, 25));
        assert!(b.contains_point(5.0, 25.0));
        assert!(!b.contains_point(4.9, 10.0));
        assert_eq!(b.inflate(1.0), BoundingBox::new(4.0, 4.0, 12.0, 22.0));
    }

    #[test]
    fn label_formats_percent() {
        let det = Detection::new(
            "x",
            DetectionClass::from_label("car").unwrap(),
            0.874,
            BoundingBox::default(),
        );
        assert_eq!(det.label(), "car 87%");
    }
}
