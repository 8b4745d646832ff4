use anyhow::Result;

use crate::detect::result::DetectionResult;
use crate::models::ModelProfile;

/// Detection generator trait.
///
/// Implementations receive the image dimensions and the model profile chosen
/// for the run and return the full raw detection set, sorted by descending
/// confidence. Boxes must lie inside the image.
///
/// Zero-sized images must fail with `SimError::InvalidImageDimensions` rather
/// than produce empty or degenerate boxes.
pub trait DetectionGenerator: Send {
    /// Generator identifier.
    fn name(&self) -> &'static str;

    /// True when results are invented rather than inferred.
    fn is_simulated(&self) -> bool;

    /// Produce the detections for one run.
    fn generate(&mut self, width: u32, height: u32, model: &ModelProfile) -> Result<DetectionResult>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
