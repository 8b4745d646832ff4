use anyhow::Result;
use rand::Rng;

use crate::classes::{DetectionClass, CLASS_COUNT, COMMON_CLASS_COUNT};
use crate::detect::backend::DetectionGenerator;
use crate::detect::result::{BoundingBox, Detection, DetectionResult};
use crate::models::ModelProfile;
use crate::SimError;

/// Picks at the start of a batch that are drawn from the common-objects subset.
const COMMON_PICKS: usize = 3;

/// Jitter added to the meanAP-derived detection count.
const COUNT_JITTER_MIN: i32 = -2;
const COUNT_JITTER_MAX: i32 = 3;

/// Smallest box side, in pixels, before capping at the image size.
const MIN_BOX_SIDE: u32 = 20;

/// Half-width of the symmetric confidence jitter.
const CONFIDENCE_JITTER: f32 = 0.2;
const MAX_CONFIDENCE: f32 = 0.99;

/// Random stand-in for a detection model.
///
/// Output is intentionally unseeded: repeated calls with the same inputs give
/// different scenes. Only the shape of the output is guaranteed.
#[derive(Debug, Default)]
pub struct SimulatedDetectionGenerator {
    batches: u64,
}

impl SimulatedDetectionGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of batches generated so far.
    pub fn batches(&self) -> u64 {
        self.batches
    }
}

impl DetectionGenerator for SimulatedDetectionGenerator {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn is_simulated(&self) -> bool {
        true
    }

    fn generate(&mut self, width: u32, height: u32, model: &ModelProfile) -> Result<DetectionResult> {
        if width == 0 || height == 0 {
            return Err(SimError::InvalidImageDimensions { width, height }.into());
        }

        let mut rng = rand::thread_rng();
        self.batches += 1;
        let batch = self.batches;

        let count = detection_count(model.mean_ap, &mut rng);
        let mut scene: Vec<(DetectionClass, f32, BoundingBox)> = (0..count)
            .map(|pick| {
                let class = pick_class(pick, &mut rng);
                let confidence = pick_confidence(model.mean_ap, &mut rng);
                let bbox = pick_box(width, height, &mut rng);
                (class, confidence, bbox)
            })
            .collect();
        scene.sort_by(|a, b| b.1.total_cmp(&a.1));

        let detections: Vec<Detection> = scene
            .into_iter()
            .enumerate()
            .map(|(n, (class, confidence, bbox))| {
                Detection::new(format!("det-{}-{}", batch, n), class, confidence, bbox)
            })
            .collect();

        log::debug!(
            "simulated {} detections on {}x{} with {}",
            detections.len(),
            width,
            height,
            model.id
        );

        Ok(DetectionResult {
            detections,
            image_width: width,
            image_height: height,
            model_id: model.id.to_string(),
        })
    }
}

/// Higher-accuracy models yield more detections.
fn detection_count(mean_ap: f32, rng: &mut impl Rng) -> usize {
    let base = (mean_ap / 10.0).round() as i32;
    let jitter = rng.gen_range(COUNT_JITTER_MIN..=COUNT_JITTER_MAX);
    (base + jitter).max(1) as usize
}

fn pick_class(pick: usize, rng: &mut impl Rng) -> DetectionClass {
    let pool = if pick < COMMON_PICKS {
        COMMON_CLASS_COUNT
    } else {
        CLASS_COUNT
    };
    DetectionClass::nth(rng.gen_range(0..pool))
}

fn pick_confidence(mean_ap: f32, rng: &mut impl Rng) -> f32 {
    let base = mean_ap / 100.0;
    let jitter = rng.gen_range(-CONFIDENCE_JITTER..CONFIDENCE_JITTER);
    let rounded = ((base + jitter) * 1000.0).round() / 1000.0;
    rounded.clamp(0.0, MAX_CONFIDENCE)
}

fn pick_box(width: u32, height: u32, rng: &mut impl Rng) -> BoundingBox {
    let (w, x) = pick_span(width, rng);
    let (h, y) = pick_span(height, rng);
    BoundingBox::new(x, y, w, h)
}

/// Side length and offset along one axis, keeping `offset + side <= dim`.
fn pick_span(dim: u32, rng: &mut impl Rng) -> (f32, f32) {
    let dim_f = dim as f32;
    let floor = MIN_BOX_SIDE.min(dim) as f32;
    let side = ((rng.gen::<f32>() * dim_f / 3.0).floor() + floor).min(dim_f);
    let offset = (rng.gen::<f32>() * (dim_f - side)).floor().max(0.0);
    (side, offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{catalog, model_by_id};

    #[test]
    fn boxes_stay_inside_image() {
        let mut generator = SimulatedDetectionGenerator::new();
        for model in catalog() {
            for (w, h) in [(640, 480), (1, 1), (19, 300), (3000, 25)] {
                for _ in 0..50 {
                    let result = generator.generate(w, h, model).unwrap();
                    for det in &result.detections {
                        let b = det.bbox();
                        assert!(b.fits_within(w, h), "{:?} outside {}x{}", b, w, h);
                        assert!(b.width > 0.0 && b.height > 0.0);
                    }
                }
            }
        }
    }

    #[test]
    fn confidence_is_bounded_and_sorted() {
        let mut generator = SimulatedDetectionGenerator::new();
        for model in catalog() {
            for _ in 0..100 {
                let result = generator.generate(320, 240, model).unwrap();
                assert!(!result.is_empty());
                for det in &result.detections {
                    assert!((0.0..=MAX_CONFIDENCE).contains(&det.confidence()));
                }
                for pair in result.detections.windows(2) {
                    assert!(pair[0].confidence() >= pair[1].confidence());
                }
            }
        }
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        let mut generator = SimulatedDetectionGenerator::new();
        let model = model_by_id("yolov8n").unwrap();
        for (w, h) in [(0, 480), (640, 0), (0, 0)] {
            let err = generator.generate(w, h, model).unwrap_err();
            assert_eq!(
                err.downcast_ref::<SimError>(),
                Some(&SimError::InvalidImageDimensions { width: w, height: h })
            );
        }
        assert_eq!(generator.batches(), 0);
    }

    #[test]
    fn more_accurate_models_find_more_on_average() {
        let mut generator = SimulatedDetectionGenerator::new();
        let nano = model_by_id("yolov8n").unwrap();
        let xlarge = model_by_id("yolov8x").unwrap();
        let runs = 400;
        let mean = |generator: &mut SimulatedDetectionGenerator, model: &ModelProfile| {
            let total: usize = (0..runs)
                .map(|_| generator.generate(640, 480, model).unwrap().len())
                .sum();
            total as f32 / runs as f32
        };
        let nano_mean = mean(&mut generator, nano);
        let xlarge_mean = mean(&mut generator, xlarge);
        assert!(xlarge_mean > nano_mean, "{} vs {}", xlarge_mean, nano_mean);
    }

    #[test]
    fn first_picks_come_from_common_subset() {
        let mut rng = rand::thread_rng();
        for pick in 0..COMMON_PICKS {
            for _ in 0..200 {
                assert!(pick_class(pick, &mut rng).is_common());
            }
        }
    }

    #[test]
    fn ids_are_unique_across_batches() {
        let mut generator = SimulatedDetectionGenerator::new();
        let model = model_by_id("yolov8m").unwrap();
        let mut ids = std::collections::HashSet::new();
        for _ in 0..20 {
            for det in generator.generate(100, 100, model).unwrap().detections {
                assert!(ids.insert(det.id().to_string()));
            }
        }
    }
}
