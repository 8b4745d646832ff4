//! Simulated object-detection engine.
//!
//! This crate drives a computer-vision demo without running any model. Every
//! "inference" result is generated at random to look like real model output.
//!
//! # Pipeline
//!
//! 1. An image is selected (`image_source`) and a model profile chosen (`models`).
//! 2. `processing` walks a staged, timer-driven progress sequence whose pace
//!    follows the model's declared fps.
//! 3. On the final stage a `detect::DetectionGenerator` produces the raw detection set.
//! 4. `filter` derives the visible subset from the confidence threshold and
//!    per-class visibility.
//! 5. `render` draws image + visible detections onto a canvas; `stats` tallies
//!    summary numbers for side panels.
//!
//! `session::DemoSession` ties the pieces together and is the surface a UI talks to.
//!
//! # Module Structure
//!
//! - `classes`: closed label set and the process-wide class color map
//! - `models`: static model catalog
//! - `detect`: generator trait, registry, simulated backend, result types
//! - `processing`: staged run state machine and its cancellable timer driver
//! - `filter`: threshold/visibility filter pipeline
//! - `render`: raqote canvas renderer with pan/zoom and visualization modes
//! - `stats`: per-class counts and model-quality metrics
//! - `session`: single-writer session state and external operations
//! - `config`: file + environment configuration

pub mod classes;
pub mod config;
pub mod detect;
pub mod filter;
pub mod image_source;
pub mod models;
pub mod processing;
pub mod render;
pub mod session;
pub mod stats;
pub mod ui;

pub use classes::{color_for, init_class_colors, ClassColorMap, DetectionClass, Rgb};
pub use config::SimConfig;
pub use detect::{
    BoundingBox, Detection, DetectionGenerator, DetectionResult, GeneratorRegistry,
    SimulatedDetectionGenerator,
};
pub use filter::{ClassVisibility, ConfidenceThreshold, FilterPipeline};
pub use image_source::ImageSource;
pub use models::{model_by_id, ModelProfile, MODEL_CATALOG};
pub use processing::{ProcessingRun, RunPhase, Stage, STAGES};
pub use render::{CanvasRenderer, RenderedFrame, ViewTransform, VisualizationMode};
pub use session::{DemoSession, SessionEvent};
pub use stats::{ModelMetrics, StatsAggregator, StatsSnapshot};

// -------------------- Error kinds --------------------

/// Local, recoverable failures surfaced to the UI layer.
///
/// Library functions return `anyhow::Result`; these travel inside the
/// `anyhow::Error` and can be recovered with `downcast_ref::<SimError>()`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SimError {
    /// Detection was requested before any image was selected.
    NoImageSelected,
    /// Generator called with a zero-sized image.
    InvalidImageDimensions { width: u32, height: u32 },
    /// Lookup of an unknown id (model, detection, generator).
    NotFound { what: &'static str, id: String },
}

impl SimError {
    /// Stable code for toasts and logs.
    pub fn code(&self) -> &'static str {
        match self {
            SimError::NoImageSelected => "NO_IMAGE_SELECTED",
            SimError::InvalidImageDimensions { .. } => "INVALID_IMAGE_DIMENSIONS",
            SimError::NotFound { .. } => "NOT_FOUND",
        }
    }

    pub(crate) fn not_found(what: &'static str, id: &str) -> Self {
        SimError::NotFound {
            what,
            id: id.to_string(),
        }
    }
}

impl std::fmt::Display for SimError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimError::NoImageSelected => write!(f, "{}: select an image first", self.code()),
            SimError::InvalidImageDimensions { width, height } => write!(
                f,
                "{}: image must be at least 1x1, got {}x{}",
                self.code(),
                width,
                height
            ),
            SimError::NotFound { what, id } => {
                write!(f, "{}: unknown {} '{}'", self.code(), what, id)
            }
        }
    }
}

impl std::error::Error for SimError {}

/// Returns the `SimError` carried by an `anyhow::Error`, if any.
pub fn sim_error(err: &anyhow::Error) -> Option<&SimError> {
    err.downcast_ref::<SimError>()
}
