use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::detect::result::DetectionResult;
use crate::models::ModelProfile;
use crate::SimError;

use super::backend::DetectionGenerator;

/// Thread-safe registry of detection generators.
///
/// Generators are wrapped in `Mutex` because `DetectionGenerator::generate` takes `&mut self`.
pub struct GeneratorRegistry {
    generators: HashMap<String, Arc<Mutex<dyn DetectionGenerator>>>,
    default_name: Option<String>,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self {
            generators: HashMap::new(),
            default_name: None,
        }
    }

    /// Registry holding only the simulated generator.
    pub fn simulated() -> Result<Self> {
        let mut registry = Self::new();
        registry.register(super::SimulatedDetectionGenerator::new())?;
        Ok(registry)
    }

    /// Warm up and register a generator. The first registered generator
    /// becomes the default. A generator that fails to warm up is not added.
    pub fn register<G: DetectionGenerator + 'static>(&mut self, mut generator: G) -> Result<()> {
        let name = generator.name().to_string();
        generator
            .warm_up()
            .map_err(|e| anyhow!("generator {} failed to warm up: {}", name, e))?;
        log::info!(
            "registered detection generator {} (simulated: {})",
            name,
            generator.is_simulated()
        );
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.generators.insert(name, Arc::new(Mutex::new(generator)));
        Ok(())
    }

    /// Set default generator by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.generators.contains_key(name) {
            return Err(SimError::not_found("generator", name).into());
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Mutex<dyn DetectionGenerator>>> {
        self.generators.get(name).cloned()
    }

    pub fn default_generator(&self) -> Option<Arc<Mutex<dyn DetectionGenerator>>> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    /// Registered generator names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.generators.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run the default generator.
    pub fn generate(&self, width: u32, height: u32, model: &ModelProfile) -> Result<DetectionResult> {
        let generator = self
            .default_generator()
            .ok_or_else(|| anyhow!("no detection generator registered"))?;
        let mut guard = generator
            .lock()
            .map_err(|_| anyhow!("generator lock poisoned"))?;
        guard.generate(width, height, model)
    }
}

impl Default for GeneratorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes::DetectionClass;
    use crate::detect::{BoundingBox, Detection};
    use crate::models::default_model;

    struct FixedGenerator;

    struct ColdGenerator {
        ready: bool,
    }

    impl DetectionGenerator for ColdGenerator {
        fn name(&self) -> &'static str {
            "cold"
        }

        fn is_simulated(&self) -> bool {
            false
        }

        fn generate(&mut self, width: u32, height: u32, model: &ModelProfile) -> Result<DetectionResult> {
            if !self.ready {
                return Err(anyhow!("generate before warm-up"));
            }
            Ok(DetectionResult {
                detections: Vec::new(),
                image_width: width,
                image_height: height,
                model_id: model.id.to_string(),
            })
        }

        fn warm_up(&mut self) -> Result<()> {
            self.ready = true;
            Ok(())
        }
    }

    struct BrokenGenerator;

    impl DetectionGenerator for BrokenGenerator {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn is_simulated(&self) -> bool {
            false
        }

        fn generate(&mut self, _width: u32, _height: u32, _model: &ModelProfile) -> Result<DetectionResult> {
            Err(anyhow!("unreachable"))
        }

        fn warm_up(&mut self) -> Result<()> {
            Err(anyhow!("weights missing"))
        }
    }

    impl DetectionGenerator for FixedGenerator {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn is_simulated(&self) -> bool {
            false
        }

        fn generate(&mut self, width: u32, height: u32, model: &ModelProfile) -> Result<DetectionResult> {
            Ok(DetectionResult {
                detections: vec![Detection::new(
                    "fixed-0",
                    DetectionClass::from_label("cat").unwrap(),
                    0.9,
                    BoundingBox::new(0.0, 0.0, 1.0, 1.0),
                )],
                image_width: width,
                image_height: height,
                model_id: model.id.to_string(),
            })
        }
    }

    #[test]
    fn first_registered_is_default() {
        let mut registry = GeneratorRegistry::simulated().unwrap();
        registry.register(FixedGenerator).unwrap();
        assert_eq!(registry.default_name(), Some("simulated"));
        assert_eq!(registry.list(), vec!["fixed", "simulated"]);
    }

    #[test]
    fn set_default_switches_generator() {
        let mut registry = GeneratorRegistry::simulated().unwrap();
        registry.register(FixedGenerator).unwrap();
        registry.set_default("fixed").unwrap();
        let result = registry.generate(64, 64, default_model()).unwrap();
        assert_eq!(result.detections[0].id(), "fixed-0");
    }

    #[test]
    fn unknown_default_is_rejected() {
        let mut registry = GeneratorRegistry::simulated().unwrap();
        let err = registry.set_default("onnx").unwrap_err();
        assert_eq!(err.downcast_ref::<SimError>().unwrap().code(), "NOT_FOUND");
        assert_eq!(registry.default_name(), Some("simulated"));
    }

    #[test]
    fn empty_registry_cannot_generate() {
        let registry = GeneratorRegistry::new();
        assert!(registry.generate(10, 10, default_model()).is_err());
    }

    #[test]
    fn register_warms_generator_up() {
        let mut registry = GeneratorRegistry::new();
        registry.register(ColdGenerator { ready: false }).unwrap();
        assert!(registry.generate(8, 8, default_model()).is_ok());
    }

    #[test]
    fn failed_warm_up_is_not_registered() {
        let mut registry = GeneratorRegistry::new();
        let err = registry.register(BrokenGenerator).unwrap_err();
        assert!(err.to_string().contains("weights missing"));
        assert!(registry.list().is_empty());
        assert_eq!(registry.default_name(), None);
    }
}
