//! Staged processing simulation.
//!
//! A run walks `Idle -> Stage 1 .. Stage N -> Complete -> idle`, one timer tick
//! per stage. The tick length follows the model's fps, so slower models feel
//! slower. Generation happens exactly once, after the final stage.
//!
//! Each run is driven by its own thread. The thread sleeps on a channel that
//! doubles as the cancel signal: dropping the `RunHandle`'s sender wakes it
//! immediately and it exits without touching session state. Observers also
//! reject callbacks carrying a run id that is no longer active, so a late tick
//! from an old run can never overwrite a newer result.

use anyhow::{anyhow, Result};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::TimingSettings;
use crate::models::ModelProfile;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stage {
    pub label: &'static str,
    pub percent: u8,
}

pub const STAGES: [Stage; 6] = [
    Stage {
        label: "Loading image",
        percent: 10,
    },
    Stage {
        label: "Preprocessing",
        percent: 25,
    },
    Stage {
        label: "Running inference",
        percent: 50,
    },
    Stage {
        label: "Post-processing",
        percent: 75,
    },
    Stage {
        label: "Applying NMS",
        percent: 90,
    },
    Stage {
        label: "Finalizing",
        percent: 100,
    },
];

const IDLE_MESSAGE: &str = "Ready";
const STARTING_MESSAGE: &str = "Starting";
const COMPLETE_MESSAGE: &str = "Detection complete";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    /// Index into `STAGES`.
    Stage(usize),
    Complete,
}

/// Observable state of the current (or last) run.
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessingRun {
    pub run_id: u64,
    pub phase: RunPhase,
    pub progress_percent: u8,
    pub stage_message: String,
    pub is_running: bool,
}

impl ProcessingRun {
    pub fn idle() -> Self {
        Self {
            run_id: 0,
            phase: RunPhase::Idle,
            progress_percent: 0,
            stage_message: IDLE_MESSAGE.to_string(),
            is_running: false,
        }
    }

    /// A freshly triggered run, before its first tick.
    pub fn started(run_id: u64) -> Self {
        Self {
            run_id,
            phase: RunPhase::Idle,
            progress_percent: 0,
            stage_message: STARTING_MESSAGE.to_string(),
            is_running: true,
        }
    }

    /// Move to the next stage. Returns the stage entered, or `None` when the
    /// run is past the last stage or not running.
    pub fn advance(&mut self) -> Option<Stage> {
        if !self.is_running {
            return None;
        }
        let next = match self.phase {
            RunPhase::Idle => 0,
            RunPhase::Stage(index) if index + 1 < STAGES.len() => index + 1,
            RunPhase::Stage(_) | RunPhase::Complete => return None,
        };
        let stage = STAGES[next];
        self.phase = RunPhase::Stage(next);
        self.progress_percent = stage.percent;
        self.stage_message = stage.label.to_string();
        Some(stage)
    }

    pub fn at_final_stage(&self) -> bool {
        self.phase == RunPhase::Stage(STAGES.len() - 1)
    }

    /// Mark complete. Only valid from the final stage.
    pub fn complete(&mut self) -> bool {
        if !self.is_running || !self.at_final_stage() {
            return false;
        }
        self.phase = RunPhase::Complete;
        self.progress_percent = 100;
        self.stage_message = COMPLETE_MESSAGE.to_string();
        true
    }

    /// Back to `Idle` once the run is over. The run id and last progress stay
    /// readable until the next run starts.
    pub fn finish(&mut self) {
        self.phase = RunPhase::Idle;
        self.is_running = false;
    }

    pub fn is_active(&self, run_id: u64) -> bool {
        self.is_running && self.run_id == run_id
    }
}

impl Default for ProcessingRun {
    fn default() -> Self {
        Self::idle()
    }
}

/// Delays for one run, fixed when the run starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunTiming {
    pub tick: Duration,
    pub hold: Duration,
}

impl RunTiming {
    pub fn for_model(settings: &TimingSettings, model: &ModelProfile) -> Self {
        Self {
            tick: settings.tick_for(model),
            hold: settings.complete_hold,
        }
    }

    /// Simulated latency from trigger to `Complete`.
    pub fn total_latency(&self) -> Duration {
        self.tick * STAGES.len() as u32
    }
}

/// Receives the timer callbacks of a run.
///
/// Every callback carries the run id; implementations must ignore ids that are
/// no longer the active run and return `false` so the driver stops.
pub trait RunObserver: Send + Sync {
    /// A stage tick fired.
    fn stage_reached(&self, run_id: u64) -> bool;

    /// The final stage has been reached: generate, commit, mark complete.
    fn final_stage_reached(&self, run_id: u64) -> bool;

    /// The post-completion hold elapsed.
    fn hold_elapsed(&self, run_id: u64);

    /// The run was torn down before finishing.
    fn cancelled(&self, run_id: u64);
}

/// Handle to a running timer thread. Dropping it cancels the run.
#[derive(Debug)]
pub struct RunHandle {
    run_id: u64,
    cancel: Option<Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl RunHandle {
    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, |join| join.is_finished())
    }

    /// Stop the timers and wait for the thread to exit.
    pub fn cancel(mut self) -> Result<()> {
        self.cancel.take();
        self.join_thread()
    }

    /// Wait for the run to end on its own.
    pub fn wait(mut self) -> Result<()> {
        self.join_thread()
    }

    fn join_thread(&mut self) -> Result<()> {
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("processing thread for run {} panicked", self.run_id))?;
        }
        Ok(())
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        self.cancel.take();
        if let Err(err) = self.join_thread() {
            log::warn!("{}", err);
        }
    }
}

pub struct ProcessingSimulator;

impl ProcessingSimulator {
    /// Start the timer thread for `run_id`.
    pub fn spawn(
        run_id: u64,
        timing: RunTiming,
        observer: Arc<dyn RunObserver>,
    ) -> Result<RunHandle> {
        let (cancel_tx, cancel_rx) = mpsc::channel();
        let join = std::thread::Builder::new()
            .name(format!("detect-run-{}", run_id))
            .spawn(move || drive(run_id, timing, observer.as_ref(), &cancel_rx))?;
        Ok(RunHandle {
            run_id,
            cancel: Some(cancel_tx),
            join: Some(join),
        })
    }
}

fn drive(run_id: u64, timing: RunTiming, observer: &dyn RunObserver, cancel: &Receiver<()>) {
    for _ in 0..STAGES.len() {
        if !sleep_unless_cancelled(cancel, timing.tick) {
            observer.cancelled(run_id);
            return;
        }
        if !observer.stage_reached(run_id) {
            return;
        }
    }
    if !observer.final_stage_reached(run_id) {
        return;
    }
    if !sleep_unless_cancelled(cancel, timing.hold) {
        observer.cancelled(run_id);
        return;
    }
    observer.hold_elapsed(run_id);
}

/// Sleep for `delay`. Returns false if the handle was dropped or signalled.
fn sleep_unless_cancelled(cancel: &Receiver<()>, delay: Duration) -> bool {
    matches!(cancel.recv_timeout(delay), Err(RecvTimeoutError::Timeout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn run_walks_every_stage_in_order() {
        let mut run = ProcessingRun::started(7);
        let mut seen = Vec::new();
        while let Some(stage) = run.advance() {
            seen.push(stage.percent);
            assert_eq!(run.progress_percent, stage.percent);
        }
        assert_eq!(seen, vec![10, 25, 50, 75, 90, 100]);
        assert!(run.at_final_stage());
        assert!(run.complete());
        assert_eq!(run.phase, RunPhase::Complete);
        assert!(run.is_running);
        run.finish();
        assert!(!run.is_running);
        assert!(!run.is_active(7));
        assert_eq!(run.phase, RunPhase::Idle);
        assert_eq!((run.run_id, run.progress_percent), (7, 100));
        assert_eq!(run.advance(), None);
    }

    #[test]
    fn complete_requires_final_stage() {
        let mut run = ProcessingRun::started(1);
        run.advance();
        assert!(!run.complete());
        assert_eq!(run.phase, RunPhase::Stage(0));
    }

    #[test]
    fn idle_run_does_not_advance() {
        let mut run = ProcessingRun::idle();
        assert_eq!(run.advance(), None);
        assert_eq!(run.phase, RunPhase::Idle);
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn push(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl RunObserver for Recorder {
        fn stage_reached(&self, run_id: u64) -> bool {
            self.push(format!("stage:{}", run_id));
            true
        }

        fn final_stage_reached(&self, run_id: u64) -> bool {
            self.push(format!("final:{}", run_id));
            true
        }

        fn hold_elapsed(&self, run_id: u64) {
            self.push(format!("hold:{}", run_id));
        }

        fn cancelled(&self, run_id: u64) {
            self.push(format!("cancelled:{}", run_id));
        }
    }

    fn fast() -> RunTiming {
        RunTiming {
            tick: Duration::from_millis(2),
            hold: Duration::from_millis(2),
        }
    }

    #[test]
    fn driver_fires_final_once_after_all_stages() {
        let recorder = Arc::new(Recorder::default());
        let handle = ProcessingSimulator::spawn(3, fast(), recorder.clone()).unwrap();
        handle.wait().unwrap();
        let events = recorder.events();
        assert_eq!(events.len(), STAGES.len() + 2);
        assert!(events[..STAGES.len()].iter().all(|e| e == "stage:3"));
        assert_eq!(events[STAGES.len()], "final:3");
        assert_eq!(events[STAGES.len() + 1], "hold:3");
    }

    #[test]
    fn cancel_stops_pending_timers() {
        let recorder = Arc::new(Recorder::default());
        let slow = RunTiming {
            tick: Duration::from_secs(30),
            hold: Duration::from_secs(30),
        };
        let handle = ProcessingSimulator::spawn(9, slow, recorder.clone()).unwrap();
        handle.cancel().unwrap();
        assert_eq!(recorder.events(), vec!["cancelled:9".to_string()]);
    }

    #[test]
    fn total_latency_scales_with_tick() {
        let timing = fast();
        assert_eq!(timing.total_latency(), Duration::from_millis(12));
    }
}
