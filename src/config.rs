use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::filter::{ConfidenceThreshold, DEFAULT_CONFIDENCE_THRESHOLD};
use crate::models::{model_by_id, ModelProfile, DEFAULT_MODEL_ID};

const DEFAULT_BASE_TICK_MS: u64 = 400;
const DEFAULT_REFERENCE_FPS: u32 = 30;
const DEFAULT_COMPLETE_HOLD_MS: u64 = 500;
const DEFAULT_GRID_SPACING: u32 = 50;
const DEFAULT_HEATMAP_CELL: u32 = 16;
const DEFAULT_LINE_WIDTH: f32 = 2.0;

#[derive(Debug, Deserialize, Default)]
struct SimConfigFile {
    default_model: Option<String>,
    confidence_threshold: Option<f32>,
    timing: Option<TimingConfigFile>,
    render: Option<RenderConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct TimingConfigFile {
    base_tick_ms: Option<u64>,
    reference_fps: Option<u32>,
    complete_hold_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RenderConfigFile {
    grid_spacing: Option<u32>,
    heatmap_cell: Option<u32>,
    line_width: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub default_model: String,
    pub confidence_threshold: f32,
    pub timing: TimingSettings,
    pub render: RenderSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimingSettings {
    /// Per-tick delay for a model running at `reference_fps`.
    pub base_tick: Duration,
    pub reference_fps: u32,
    /// Hold between `Complete` and the run reporting idle.
    pub complete_hold: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderSettings {
    pub grid_spacing: u32,
    pub heatmap_cell: u32,
    pub line_width: f32,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            base_tick: Duration::from_millis(DEFAULT_BASE_TICK_MS),
            reference_fps: DEFAULT_REFERENCE_FPS,
            complete_hold: Duration::from_millis(DEFAULT_COMPLETE_HOLD_MS),
        }
    }
}

impl TimingSettings {
    /// Per-tick delay for `model`: inversely proportional to its fps, never
    /// below one millisecond.
    pub fn tick_for(&self, model: &ModelProfile) -> Duration {
        let fps = model.fps.max(1) as u128;
        let micros = self.base_tick.as_micros() * self.reference_fps as u128 / fps;
        Duration::from_micros(micros.max(1000) as u64)
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            grid_spacing: DEFAULT_GRID_SPACING,
            heatmap_cell: DEFAULT_HEATMAP_CELL,
            line_width: DEFAULT_LINE_WIDTH,
        }
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_MODEL_ID.to_string(),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            timing: TimingSettings::default(),
            render: RenderSettings::default(),
        }
    }
}

impl SimConfig {
    /// Load from `DETECT_SIM_CONFIG` (JSON), then environment overrides, then validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("DETECT_SIM_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults with a custom tick, handy for fast tests and demos.
    pub fn with_tick(base_tick: Duration, complete_hold: Duration) -> Self {
        Self {
            timing: TimingSettings {
                base_tick,
                complete_hold,
                ..TimingSettings::default()
            },
            ..Self::default()
        }
    }

    fn from_file(file: SimConfigFile) -> Self {
        let defaults = Self::default();
        let timing = TimingSettings {
            base_tick: file
                .timing
                .as_ref()
                .and_then(|timing| timing.base_tick_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.timing.base_tick),
            reference_fps: file
                .timing
                .as_ref()
                .and_then(|timing| timing.reference_fps)
                .unwrap_or(defaults.timing.reference_fps),
            complete_hold: file
                .timing
                .as_ref()
                .and_then(|timing| timing.complete_hold_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.timing.complete_hold),
        };
        let render = RenderSettings {
            grid_spacing: file
                .render
                .as_ref()
                .and_then(|render| render.grid_spacing)
                .unwrap_or(defaults.render.grid_spacing),
            heatmap_cell: file
                .render
                .as_ref()
                .and_then(|render| render.heatmap_cell)
                .unwrap_or(defaults.render.heatmap_cell),
            line_width: file
                .render
                .as_ref()
                .and_then(|render| render.line_width)
                .unwrap_or(defaults.render.line_width),
        };
        Self {
            default_model: file.default_model.unwrap_or(defaults.default_model),
            confidence_threshold: file
                .confidence_threshold
                .unwrap_or(defaults.confidence_threshold),
            timing,
            render,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(model) = std::env::var("DETECT_SIM_MODEL") {
            if !model.trim().is_empty() {
                self.default_model = model.trim().to_string();
            }
        }
        if let Ok(threshold) = std::env::var("DETECT_SIM_THRESHOLD") {
            self.confidence_threshold = threshold
                .trim()
                .parse()
                .map_err(|_| anyhow!("DETECT_SIM_THRESHOLD must be a number"))?;
        }
        if let Ok(tick) = std::env::var("DETECT_SIM_TICK_MS") {
            let millis: u64 = tick.trim().parse().map_err(|_| {
                anyhow!("DETECT_SIM_TICK_MS must be an integer number of milliseconds")
            })?;
            self.timing.base_tick = Duration::from_millis(millis);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        model_by_id(&self.default_model)
            .map_err(|e| anyhow!("default_model is not in the catalog: {}", e))?;
        if ConfidenceThreshold::checked(self.confidence_threshold).is_none() {
            return Err(anyhow!(
                "confidence_threshold must be within [0.1, 1.0], got {}",
                self.confidence_threshold
            ));
        }
        if self.timing.reference_fps == 0 {
            return Err(anyhow!("timing.reference_fps must be greater than zero"));
        }
        if self.render.grid_spacing == 0 {
            return Err(anyhow!("render.grid_spacing must be greater than zero"));
        }
        if self.render.heatmap_cell == 0 {
            return Err(anyhow!("render.heatmap_cell must be greater than zero"));
        }
        if !(self.render.line_width > 0.0) {
            return Err(anyhow!("render.line_width must be positive"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<SimConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn faster_models_tick_faster() {
        let timing = TimingSettings::default();
        let nano = model_by_id("yolov8n").unwrap();
        let xlarge = model_by_id("yolov8x").unwrap();
        assert!(timing.tick_for(nano) < timing.tick_for(xlarge));
        // 400ms * 30 / 45
        assert_eq!(timing.tick_for(nano), Duration::from_micros(266_666));
    }

    #[test]
    fn tick_has_a_floor() {
        let timing = TimingSettings {
            base_tick: Duration::ZERO,
            ..TimingSettings::default()
        };
        assert_eq!(timing.tick_for(model_by_id("yolov8n").unwrap()), Duration::from_millis(1));
    }

    #[test]
    fn defaults_validate() {
        SimConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let cfg = SimConfig {
            confidence_threshold: 0.05,
            ..SimConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_unknown_model() {
        let cfg = SimConfig {
            default_model: "mobilenet".to_string(),
            ..SimConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("mobilenet"));
    }
}
