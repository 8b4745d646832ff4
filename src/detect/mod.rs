//! Detection generation.
//!
//! `DetectionGenerator` is the seam between the demo and whatever produces
//! detections. Today the only implementation is `SimulatedDetectionGenerator`,
//! which invents results at random; a real model can be registered behind the
//! same trait without touching the session or renderer.

mod backend;
mod backends;
mod registry;
mod result;

pub use backend::DetectionGenerator;
pub use backends::SimulatedDetectionGenerator;
pub use registry::GeneratorRegistry;
pub use result::{BoundingBox, Detection, DetectionResult};
