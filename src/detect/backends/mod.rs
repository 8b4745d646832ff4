pub mod simulated;

pub use simulated::SimulatedDetectionGenerator;
