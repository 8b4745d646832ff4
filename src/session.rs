//! Demo session: the operations a UI calls.
//!
//! All mutable state lives in one `SessionState` behind a mutex. The UI thread
//! and the active run's timer thread are the only writers, and the timer
//! thread may only write while its run id is still the active one. Every
//! mutation that touches a filter input recomputes the visible set before the
//! lock is released, so readers never observe a stale filtered set.

use anyhow::{anyhow, Result};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::classes::DetectionClass;
use crate::config::SimConfig;
use crate::detect::{Detection, GeneratorRegistry};
use crate::filter::{ClassVisibility, ConfidenceThreshold, FilterPipeline};
use crate::image_source::ImageSource;
use crate::models::{model_by_id, ModelProfile};
use crate::processing::{
    ProcessingRun, ProcessingSimulator, RunHandle, RunObserver, RunTiming, Stage,
};
use crate::render::{CanvasRenderer, RenderInput, RenderedFrame, ViewTransform, VisualizationMode};
use crate::stats::{StatsAggregator, StatsSnapshot};
use crate::SimError;

/// Notifications for UI panels and progress displays.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    ImageSelected { name: String, width: u32, height: u32 },
    ModelSelected { model_id: String },
    RunStarted { run_id: u64, model_id: String },
    StageAdvanced { run_id: u64, stage: Stage },
    /// The raw detection set was replaced by this run's output.
    RunCompleted { run_id: u64, detections: usize },
    RunFailed { run_id: u64, message: String },
    RunCancelled { run_id: u64 },
    /// Post-completion hold elapsed; the run is no longer running.
    RunFinished { run_id: u64 },
    FilterRecomputed { visible: usize },
}

/// What a run captured when it was triggered. Later model/image changes do
/// not affect it.
#[derive(Clone, Debug)]
struct RunContext {
    run_id: u64,
    model: &'static ModelProfile,
    width: u32,
    height: u32,
}

struct SessionState {
    image: Option<ImageSource>,
    model: &'static ModelProfile,
    raw: Vec<Detection>,
    pipeline: FilterPipeline,
    selected: Option<String>,
    run: ProcessingRun,
    run_context: Option<RunContext>,
    next_run_id: u64,
    view: ViewTransform,
    mode: VisualizationMode,
    show_grid: bool,
}

impl SessionState {
    /// Derive the visible set and drop a selection that is no longer visible.
    fn recompute(&mut self) -> usize {
        let visible = self.pipeline.recompute(&self.raw);
        if let Some(id) = &self.selected {
            if !self.pipeline.contains(id) {
                self.selected = None;
            }
        }
        visible
    }

    /// Tear down run bookkeeping. Returns the id of the run that was in flight.
    fn abandon_run(&mut self) -> Option<u64> {
        let previous = self.run_context.take().map(|ctx| ctx.run_id);
        if previous.is_some() || self.run.is_running {
            self.run = ProcessingRun::idle();
        }
        previous
    }
}

struct SessionCore {
    state: Mutex<SessionState>,
    subscribers: Mutex<Vec<Sender<SessionEvent>>>,
    generators: GeneratorRegistry,
}

impl SessionCore {
    fn lock_state(&self) -> Result<MutexGuard<'_, SessionState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("session state lock poisoned"))
    }

    fn emit(&self, event: SessionEvent) {
        match self.subscribers.lock() {
            Ok(mut subscribers) => subscribers.retain(|tx| tx.send(event.clone()).is_ok()),
            Err(_) => log::warn!("session subscriber lock poisoned; dropped {:?}", event),
        }
    }

    fn with_active_run<T>(
        &self,
        run_id: u64,
        f: impl FnOnce(&mut SessionState) -> T,
    ) -> Option<T> {
        let mut state = match self.lock_state() {
            Ok(state) => state,
            Err(err) => {
                log::warn!("run {}: {}", run_id, err);
                return None;
            }
        };
        if !state.run.is_active(run_id) {
            log::warn!("discarding stale callback from run {}", run_id);
            return None;
        }
        Some(f(&mut state))
    }
}

impl RunObserver for SessionCore {
    fn stage_reached(&self, run_id: u64) -> bool {
        match self.with_active_run(run_id, |state| state.run.advance()) {
            Some(Some(stage)) => {
                log::debug!("run {}: {} ({}%)", run_id, stage.label, stage.percent);
                self.emit(SessionEvent::StageAdvanced { run_id, stage });
                true
            }
            Some(None) | None => false,
        }
    }

    fn final_stage_reached(&self, run_id: u64) -> bool {
        let outcome = self.with_active_run(run_id, |state| {
            if !state.run.at_final_stage() {
                return Err(anyhow!("run {} reached completion early", run_id));
            }
            let ctx = state
                .run_context
                .clone()
                .filter(|ctx| ctx.run_id == run_id)
                .ok_or_else(|| anyhow!("run {} has no context", run_id))?;
            let generated = self.generators.generate(ctx.width, ctx.height, ctx.model);
            match generated {
                Ok(result) => {
                    state.raw = result.detections;
                    state.selected = None;
                    state.run.complete();
                    let visible = state.recompute();
                    Ok((state.raw.len(), visible))
                }
                Err(err) => {
                    state.run.finish();
                    state.run_context = None;
                    Err(err)
                }
            }
        });
        match outcome {
            Some(Ok((detections, visible))) => {
                log::info!("run {} complete: {} detections, {} visible", run_id, detections, visible);
                self.emit(SessionEvent::RunCompleted { run_id, detections });
                self.emit(SessionEvent::FilterRecomputed { visible });
                true
            }
            Some(Err(err)) => {
                log::warn!("run {} failed: {}", run_id, err);
                self.emit(SessionEvent::RunFailed {
                    run_id,
                    message: err.to_string(),
                });
                false
            }
            None => false,
        }
    }

    fn hold_elapsed(&self, run_id: u64) {
        let finished = self.with_active_run(run_id, |state| {
            state.run.finish();
            state.run_context = None;
        });
        if finished.is_some() {
            self.emit(SessionEvent::RunFinished { run_id });
        }
    }

    fn cancelled(&self, run_id: u64) {
        log::info!("run {} cancelled", run_id);
        self.emit(SessionEvent::RunCancelled { run_id });
    }
}

/// One UI session. Dropping it cancels any in-flight run.
pub struct DemoSession {
    core: Arc<SessionCore>,
    config: SimConfig,
    renderer: CanvasRenderer,
    active: Option<RunHandle>,
}

impl DemoSession {
    /// Session backed by the simulated generator.
    pub fn new(config: SimConfig) -> Result<Self> {
        Self::with_generators(config, GeneratorRegistry::simulated()?)
    }

    pub fn with_generators(config: SimConfig, generators: GeneratorRegistry) -> Result<Self> {
        let model = model_by_id(&config.default_model)?;
        let threshold = ConfidenceThreshold::clamped(config.confidence_threshold);
        crate::classes::init_class_colors();
        let state = SessionState {
            image: None,
            model,
            raw: Vec::new(),
            pipeline: FilterPipeline::new(threshold),
            selected: None,
            run: ProcessingRun::idle(),
            run_context: None,
            next_run_id: 1,
            view: ViewTransform::default(),
            mode: VisualizationMode::default(),
            show_grid: false,
        };
        Ok(Self {
            core: Arc::new(SessionCore {
                state: Mutex::new(state),
                subscribers: Mutex::new(Vec::new()),
                generators,
            }),
            renderer: CanvasRenderer::new(config.render.clone()),
            config,
            active: None,
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> Result<Receiver<SessionEvent>> {
        let (tx, rx) = mpsc::channel();
        self.core
            .subscribers
            .lock()
            .map_err(|_| anyhow!("session subscriber lock poisoned"))?
            .push(tx);
        Ok(rx)
    }

    // -------------------- Image / model --------------------

    /// Replace the image. Cancels any run, clears detections and selection.
    pub fn select_image(&mut self, source: ImageSource) -> Result<()> {
        let (name, (width, height)) = (source.name().to_string(), source.dimensions());
        {
            let mut state = self.core.lock_state()?;
            state.abandon_run();
            state.run = ProcessingRun::idle();
            state.image = Some(source);
            state.raw.clear();
            state.selected = None;
            state.view.reset();
            state.recompute();
        }
        self.stop_active_run()?;
        log::info!("image selected: {} ({}x{})", name, width, height);
        self.core.emit(SessionEvent::ImageSelected {
            name,
            width,
            height,
        });
        self.core.emit(SessionEvent::FilterRecomputed { visible: 0 });
        Ok(())
    }

    /// Choose the model for the next run. Cancels any in-flight run; the
    /// previous detections are kept.
    pub fn select_model(&mut self, model_id: &str) -> Result<()> {
        let model = model_by_id(model_id)?;
        let abandoned = {
            let mut state = self.core.lock_state()?;
            state.model = model;
            state.abandon_run()
        };
        self.stop_active_run()?;
        if let Some(run_id) = abandoned {
            log::info!("run {} preempted by model change", run_id);
        }
        log::info!("model selected: {}", model.id);
        self.core.emit(SessionEvent::ModelSelected {
            model_id: model.id.to_string(),
        });
        Ok(())
    }

    pub fn current_model(&self) -> Result<&'static ModelProfile> {
        Ok(self.core.lock_state()?.model)
    }

    pub fn image(&self) -> Result<Option<ImageSource>> {
        Ok(self.core.lock_state()?.image.clone())
    }

    // -------------------- Runs --------------------

    /// Start a simulated detection run. Any previous run is stopped first.
    /// Fails with `SimError::NoImageSelected` before creating a run.
    pub fn start_detection(&mut self) -> Result<u64> {
        let (run_id, timing, model_id) = {
            let mut state = self.core.lock_state()?;
            let (width, height) = match &state.image {
                Some(image) => image.dimensions(),
                None => return Err(SimError::NoImageSelected.into()),
            };
            state.abandon_run();
            let run_id = state.next_run_id;
            state.next_run_id += 1;
            let model = state.model;
            state.run = ProcessingRun::started(run_id);
            state.run_context = Some(RunContext {
                run_id,
                model,
                width,
                height,
            });
            (run_id, RunTiming::for_model(&self.config.timing, model), model.id)
        };

        // The old run is already inactive; wait for its thread before the new one starts.
        self.stop_active_run()?;

        log::info!(
            "run {} started with {} ({:?} per stage)",
            run_id,
            model_id,
            timing.tick
        );
        self.core.emit(SessionEvent::RunStarted {
            run_id,
            model_id: model_id.to_string(),
        });
        let observer: Arc<dyn RunObserver> = self.core.clone();
        match ProcessingSimulator::spawn(run_id, timing, observer) {
            Ok(handle) => {
                self.active = Some(handle);
                Ok(run_id)
            }
            Err(err) => {
                self.core.lock_state()?.abandon_run();
                Err(err)
            }
        }
    }

    /// Stop the in-flight run, if any. The previous detection set is kept.
    pub fn cancel_detection(&mut self) -> Result<()> {
        let abandoned = self.core.lock_state()?.abandon_run();
        if let Some(run_id) = abandoned {
            log::info!("cancelling run {}", run_id);
        }
        self.stop_active_run()
    }

    /// Block until the current run's thread exits, or `timeout` elapses.
    /// Returns true when no run thread is left.
    pub fn wait_for_run(&mut self, timeout: Duration) -> Result<bool> {
        let deadline = std::time::Instant::now() + timeout;
        while let Some(handle) = &self.active {
            if handle.is_finished() {
                break;
            }
            if std::time::Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        if let Some(handle) = self.active.take() {
            handle.wait()?;
        }
        Ok(true)
    }

    pub fn run_state(&self) -> Result<ProcessingRun> {
        Ok(self.core.lock_state()?.run.clone())
    }

    fn stop_active_run(&mut self) -> Result<()> {
        match self.active.take() {
            Some(handle) => handle.cancel(),
            None => Ok(()),
        }
    }

    // -------------------- Filter inputs --------------------

    /// Set the confidence threshold, clamped to `[0.1, 1.0]`. Returns the
    /// value applied.
    pub fn set_confidence_threshold(&mut self, value: f32) -> Result<f32> {
        let threshold = ConfidenceThreshold::clamped(value);
        self.update_filter(|pipeline| pipeline.set_threshold(threshold))?;
        Ok(threshold.value())
    }

    /// Flip one class's visibility. Returns the new state.
    pub fn toggle_class_visibility(&mut self, class: DetectionClass) -> Result<bool> {
        self.update_filter(|pipeline| pipeline.visibility_mut().toggle(class))
    }

    pub fn set_class_visibility(&mut self, class: DetectionClass, visible: bool) -> Result<()> {
        self.update_filter(|pipeline| pipeline.visibility_mut().set(class, visible))
    }

    pub fn show_all_classes(&mut self) -> Result<()> {
        self.update_filter(|pipeline| pipeline.visibility_mut().show_all())
    }

    pub fn hide_all_classes(&mut self) -> Result<()> {
        self.update_filter(|pipeline| pipeline.visibility_mut().hide_all())
    }

    pub fn confidence_threshold(&self) -> Result<f32> {
        Ok(self.core.lock_state()?.pipeline.threshold().value())
    }

    pub fn class_visibility(&self) -> Result<ClassVisibility> {
        Ok(self.core.lock_state()?.pipeline.visibility().clone())
    }

    fn update_filter<T>(&mut self, f: impl FnOnce(&mut FilterPipeline) -> T) -> Result<T> {
        let (out, visible) = {
            let mut state = self.core.lock_state()?;
            let out = f(&mut state.pipeline);
            (out, state.recompute())
        };
        self.core.emit(SessionEvent::FilterRecomputed { visible });
        Ok(out)
    }

    // -------------------- Detections / selection --------------------

    pub fn raw_detections(&self) -> Result<Vec<Detection>> {
        Ok(self.core.lock_state()?.raw.clone())
    }

    pub fn filtered_detections(&self) -> Result<Vec<Detection>> {
        Ok(self.core.lock_state()?.pipeline.filtered().to_vec())
    }

    /// Select a visible detection by id.
    pub fn select_detection(&mut self, id: &str) -> Result<()> {
        let mut state = self.core.lock_state()?;
        if !state.pipeline.contains(id) {
            return Err(SimError::not_found("detection", id).into());
        }
        state.selected = Some(id.to_string());
        Ok(())
    }

    /// Select the most confident visible detection under a canvas point.
    pub fn select_at(&mut self, canvas_x: f32, canvas_y: f32) -> Result<Option<String>> {
        let mut state = self.core.lock_state()?;
        let (x, y) = state.view.to_image(canvas_x, canvas_y);
        let hit = state
            .pipeline
            .filtered()
            .iter()
            .filter(|det| det.bbox().contains_point(x, y))
            .max_by(|a, b| a.confidence().total_cmp(&b.confidence()))
            .map(|det| det.id().to_string());
        state.selected = hit.clone();
        Ok(hit)
    }

    pub fn clear_selection(&mut self) -> Result<()> {
        self.core.lock_state()?.selected = None;
        Ok(())
    }

    pub fn selected_detection(&self) -> Result<Option<Detection>> {
        let state = self.core.lock_state()?;
        Ok(state.selected.as_ref().and_then(|id| {
            state
                .pipeline
                .filtered()
                .iter()
                .find(|det| det.id() == id)
                .cloned()
        }))
    }

    /// Visible detections as a JSON array of `{id, class, confidence, bbox}`.
    pub fn export_detections(&self) -> Result<String> {
        let state = self.core.lock_state()?;
        Ok(serde_json::to_string_pretty(state.pipeline.filtered())?)
    }

    pub fn stats(&self) -> Result<StatsSnapshot> {
        let state = self.core.lock_state()?;
        Ok(StatsAggregator::summarize(
            state.pipeline.filtered(),
            state.model,
        ))
    }

    // -------------------- View / rendering --------------------

    pub fn view(&self) -> Result<ViewTransform> {
        Ok(self.core.lock_state()?.view)
    }

    pub fn pan_by(&mut self, dx: f32, dy: f32) -> Result<()> {
        self.core.lock_state()?.view.pan_by(dx, dy);
        Ok(())
    }

    pub fn zoom_by(&mut self, factor: f32) -> Result<()> {
        self.core.lock_state()?.view.zoom_by(factor);
        Ok(())
    }

    pub fn reset_view(&mut self) -> Result<()> {
        self.core.lock_state()?.view.reset();
        Ok(())
    }

    pub fn set_visualization_mode(&mut self, mode: VisualizationMode) -> Result<()> {
        self.core.lock_state()?.mode = mode;
        Ok(())
    }

    pub fn set_grid(&mut self, show: bool) -> Result<()> {
        self.core.lock_state()?.show_grid = show;
        Ok(())
    }

    /// Draw the current image and visible detections.
    pub fn render(&self) -> Result<RenderedFrame> {
        let state = self.core.lock_state()?;
        let image = state
            .image
            .as_ref()
            .ok_or(SimError::NoImageSelected)?
            .to_rgba();
        self.renderer.render(&RenderInput {
            image: &image,
            detections: state.pipeline.filtered(),
            selected: state.selected.as_deref(),
            view: state.view,
            mode: state.mode,
            show_grid: state.show_grid,
        })
    }
}

impl Drop for DemoSession {
    fn drop(&mut self) {
        if let Ok(mut state) = self.core.lock_state() {
            state.abandon_run();
        }
        if let Err(err) = self.stop_active_run() {
            log::warn!("failed to stop run on session drop: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, DetectionGenerator, DetectionResult};

    fn fast_config() -> SimConfig {
        SimConfig::with_tick(Duration::from_millis(1), Duration::from_millis(1))
    }

    struct Scripted;

    impl DetectionGenerator for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn is_simulated(&self) -> bool {
            true
        }

        fn generate(&mut self, width: u32, height: u32, model: &ModelProfile) -> Result<DetectionResult> {
            let det = |id: &str, class: &str, confidence: f32, x: f32| {
                Detection::new(
                    id,
                    DetectionClass::from_label(class).unwrap(),
                    confidence,
                    BoundingBox::new(x, 10.0, 20.0, 20.0),
                )
            };
            Ok(DetectionResult {
                detections: vec![
                    det("a", "person", 0.9, 0.0),
                    det("b", "car", 0.6, 30.0),
                    det("c", "dog", 0.3, 60.0),
                ],
                image_width: width,
                image_height: height,
                model_id: model.id.to_string(),
            })
        }
    }

    fn scripted_session() -> DemoSession {
        let mut registry = GeneratorRegistry::new();
        registry.register(Scripted).unwrap();
        DemoSession::with_generators(fast_config(), registry).unwrap()
    }

    fn completed(session: &mut DemoSession) {
        session.select_image(ImageSource::synthetic("s", 100, 50)).unwrap();
        session.start_detection().unwrap();
        assert!(session.wait_for_run(Duration::from_secs(5)).unwrap());
    }

    #[test]
    fn start_without_image_creates_no_run() {
        let mut session = scripted_session();
        let err = session.start_detection().unwrap_err();
        assert_eq!(err.downcast_ref::<SimError>(), Some(&SimError::NoImageSelected));
        assert_eq!(session.run_state().unwrap(), ProcessingRun::idle());
        assert!(session.active.is_none());
    }

    #[test]
    fn threshold_change_recomputes_immediately() {
        let mut session = scripted_session();
        completed(&mut session);
        assert_eq!(session.filtered_detections().unwrap().len(), 2);
        assert_eq!(session.set_confidence_threshold(0.2).unwrap(), 0.2);
        assert_eq!(session.filtered_detections().unwrap().len(), 3);
        assert_eq!(session.set_confidence_threshold(5.0).unwrap(), 1.0);
        assert!(session.filtered_detections().unwrap().is_empty());
    }

    #[test]
    fn hiding_selected_class_clears_selection() {
        let mut session = scripted_session();
        completed(&mut session);
        session.select_detection("a").unwrap();
        session
            .toggle_class_visibility(DetectionClass::from_label("person").unwrap())
            .unwrap();
        assert_eq!(session.selected_detection().unwrap(), None);
    }

    #[test]
    fn select_detection_rejects_hidden_ids() {
        let mut session = scripted_session();
        completed(&mut session);
        // "c" is below the default 0.5 threshold.
        let err = session.select_detection("c").unwrap_err();
        assert_eq!(err.downcast_ref::<SimError>().unwrap().code(), "NOT_FOUND");
    }

    #[test]
    fn select_at_maps_through_view() {
        let mut session = scripted_session();
        completed(&mut session);
        assert_eq!(session.select_at(35.0, 15.0).unwrap().as_deref(), Some("b"));
        session.zoom_by(2.0).unwrap();
        session.pan_by(10.0, 0.0).unwrap();
        // image (5, 15) -> canvas (20, 30)
        assert_eq!(session.select_at(20.0, 30.0).unwrap().as_deref(), Some("a"));
        assert_eq!(session.select_at(500.0, 500.0).unwrap(), None);
        assert_eq!(session.selected_detection().unwrap(), None);
        // view changes never move detections
        assert_eq!(
            session.raw_detections().unwrap()[0].bbox(),
            BoundingBox::new(0.0, 10.0, 20.0, 20.0)
        );
    }

    #[test]
    fn select_model_keeps_finished_detections() {
        let mut session = scripted_session();
        completed(&mut session);
        session.select_model("yolov8s").unwrap();
        assert_eq!(session.raw_detections().unwrap().len(), 3);
        assert_eq!(session.filtered_detections().unwrap().len(), 2);
    }

    #[test]
    fn select_model_unknown_keeps_current() {
        let mut session = scripted_session();
        assert!(session.select_model("nope").is_err());
        assert_eq!(session.current_model().unwrap().id, "yolov8n");
        session.select_model("yolov8x").unwrap();
        assert_eq!(session.current_model().unwrap().id, "yolov8x");
    }
}
