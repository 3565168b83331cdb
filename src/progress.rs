// Simulated progress for long-running processing jobs (digital book
// generation). Progress comes from a `ProgressSource`; the random source is
// a placeholder until the backend reports real status.
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

pub const COMPLETION_MESSAGE: &str = "Digital book generated successfully";
pub const SECTIONS_GENERATED: u32 = 12;
const MIN_TICK: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    #[default]
    Pending,
    Active,
    Completed,
    /// Reserved for real backend status; the simulated path never sets it.
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStep {
    pub id: String,
    pub label: String,
    pub description: String,
    #[serde(default)]
    pub status: StepStatus,
    /// Seconds; only feeds the remaining-time estimate.
    pub estimated_duration: u64,
}

impl ProcessingStep {
    pub fn new(id: &str, label: &str, description: &str, estimated_duration: u64) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            description: description.to_string(),
            status: StepStatus::Pending,
            estimated_duration,
        }
    }
}

pub fn default_steps() -> Vec<ProcessingStep> {
    vec![
        ProcessingStep::new("upload", "Uploading document", "Sending the file to the server", 5),
        ProcessingStep::new("extract", "Extracting content", "Reading text, tables and images", 15),
        ProcessingStep::new("analyze", "Analyzing building data", "Identifying technical sections", 20),
        ProcessingStep::new("validate", "Validating information", "Checking regulatory compliance", 10),
        ProcessingStep::new("finalize", "Generating digital book", "Assembling the final sections", 5),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub success: bool,
    pub message: String,
    pub sections_generated: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModalView {
    #[default]
    Expanded,
    Minimized,
}

impl ModalView {
    fn toggled(self) -> Self {
        match self {
            ModalView::Expanded => ModalView::Minimized,
            ModalView::Minimized => ModalView::Expanded,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    /// 0..=100, never decreases.
    pub progress: f64,
    pub time_elapsed: u64,
    pub estimated_remaining: u64,
    pub total_estimated: u64,
    pub steps: Vec<ProcessingStep>,
    pub view: ModalView,
    pub completed: bool,
    pub running: bool,
}

/// Where progress increments come from.
pub trait ProgressSource: Send {
    /// Percentage points to add on this tick.
    fn next_increment(&mut self) -> f64;
}

/// Uniform increments in `[0, max)`.
pub struct RandomIncrement {
    rng: StdRng,
    max: f64,
}

impl RandomIncrement {
    pub fn new(max: f64) -> Self {
        Self {
            rng: StdRng::from_os_rng(),
            max,
        }
    }

    pub fn seeded(seed: u64, max: f64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            max,
        }
    }
}

impl ProgressSource for RandomIncrement {
    fn next_increment(&mut self) -> f64 {
        if !(self.max.is_finite() && self.max > 0.0) {
            return 0.0;
        }
        self.rng.random_range(0.0..self.max)
    }
}

#[derive(Debug, Clone)]
pub struct SimulatorSettings {
    pub elapsed_tick: Duration,
    pub progress_tick: Duration,
    pub message: String,
    pub sections_generated: u32,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            elapsed_tick: Duration::from_secs(1),
            progress_tick: Duration::from_secs(2),
            message: COMPLETION_MESSAGE.to_string(),
            sections_generated: SECTIONS_GENERATED,
        }
    }
}

pub type CompletionCallback = Box<dyn FnOnce(ProcessingResult) + Send + 'static>;

enum ControlMessage {
    ToggleView,
    MarkError(String),
    Stop,
}

/// Owner-side handle of a running simulation. Dropping it stops both
/// timers.
pub struct ProgressHandle {
    snapshots: watch::Receiver<ProgressSnapshot>,
    control: mpsc::UnboundedSender<ControlMessage>,
    task: JoinHandle<()>,
}

impl ProgressHandle {
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.snapshots.clone()
    }

    pub fn toggle_view(&self) {
        let _ = self.control.send(ControlMessage::ToggleView);
    }

    pub fn mark_error(&self, step_id: &str) {
        let _ = self.control.send(ControlMessage::MarkError(step_id.to_string()));
    }

    pub fn stop(&self) {
        let _ = self.control.send(ControlMessage::Stop);
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for ProgressHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct SimulationState {
    progress: f64,
    time_elapsed: u64,
    total_estimated: u64,
    steps: Vec<ProcessingStep>,
    view: ModalView,
    completed: bool,
}

impl SimulationState {
    fn new(mut steps: Vec<ProcessingStep>) -> Self {
        for step in &mut steps {
            step.status = StepStatus::Pending;
        }
        let total_estimated = steps.iter().map(|s| s.estimated_duration).sum();
        let mut state = Self {
            progress: 0.0,
            time_elapsed: 0,
            total_estimated,
            steps,
            view: ModalView::Expanded,
            completed: false,
        };
        state.sync_steps();
        state
    }

    fn estimated_remaining(&self) -> u64 {
        self.total_estimated.saturating_sub(self.time_elapsed)
    }

    fn advance(&mut self, increment: f64) {
        let increment = if increment.is_finite() { increment.max(0.0) } else { 0.0 };
        self.progress = (self.progress + increment).min(100.0);
        if self.progress >= 100.0 {
            self.progress = 100.0;
            self.completed = true;
        }
        self.sync_steps();
    }

    // Steps own a share of 0..100 proportional to their estimate. `Error` is
    // sticky.
    fn sync_steps(&mut self) {
        let weights: Vec<f64> = if self.total_estimated == 0 {
            vec![1.0; self.steps.len()]
        } else {
            self.steps
                .iter()
                .map(|s| s.estimated_duration as f64)
                .collect()
        };
        let total: f64 = weights.iter().sum();
        let mut boundary = 0.0;
        let mut active_assigned = false;
        for (step, weight) in self.steps.iter_mut().zip(weights) {
            boundary += if total > 0.0 { weight / total * 100.0 } else { 0.0 };
            if step.status == StepStatus::Error {
                continue;
            }
            step.status = if self.completed || self.progress >= boundary {
                StepStatus::Completed
            } else if !active_assigned {
                active_assigned = true;
                StepStatus::Active
            } else {
                StepStatus::Pending
            };
        }
    }

    fn snapshot(&self, running: bool) -> ProgressSnapshot {
        ProgressSnapshot {
            progress: self.progress,
            time_elapsed: self.time_elapsed,
            estimated_remaining: self.estimated_remaining(),
            total_estimated: self.total_estimated,
            steps: self.steps.clone(),
            view: self.view,
            completed: self.completed,
            running,
        }
    }
}

pub struct ProgressSimulator;

impl ProgressSimulator {
    /// Starts the two timers on the current tokio runtime. State always
    /// starts from zero.
    pub fn start(
        steps: Vec<ProcessingStep>,
        mut source: Box<dyn ProgressSource>,
        settings: SimulatorSettings,
        on_complete: Option<CompletionCallback>,
    ) -> ProgressHandle {
        let mut state = SimulationState::new(steps);
        let (snapshot_tx, snapshot_rx) = watch::channel(state.snapshot(true));
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();
        let mut on_complete = on_complete;

        let task = tokio::spawn(async move {
            let elapsed_period = settings.elapsed_tick.max(MIN_TICK);
            let progress_period = settings.progress_tick.max(MIN_TICK);
            let now = Instant::now();
            let mut elapsed_timer = interval_at(now + elapsed_period, elapsed_period);
            let mut progress_timer = interval_at(now + progress_period, progress_period);
            elapsed_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            progress_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::debug!(total_estimated = state.total_estimated, "progress simulation started");

            loop {
                tokio::select! {
                    message = control_rx.recv() => match message {
                        None | Some(ControlMessage::Stop) => {
                            tracing::debug!(progress = state.progress, "progress simulation stopped");
                            break;
                        }
                        Some(ControlMessage::ToggleView) => {
                            state.view = state.view.toggled();
                        }
                        Some(ControlMessage::MarkError(step_id)) => {
                            if let Some(step) = state.steps.iter_mut().find(|s| s.id == step_id) {
                                step.status = StepStatus::Error;
                            }
                        }
                    },
                    _ = elapsed_timer.tick() => {
                        state.time_elapsed += 1;
                    }
                    _ = progress_timer.tick() => {
                        state.advance(source.next_increment());
                        if state.completed {
                            let _ = snapshot_tx.send(state.snapshot(false));
                            if let Some(callback) = on_complete.take() {
                                callback(ProcessingResult {
                                    success: true,
                                    message: settings.message.clone(),
                                    sections_generated: settings.sections_generated,
                                });
                            }
                            tracing::info!(time_elapsed = state.time_elapsed, "progress simulation completed");
                            return;
                        }
                    }
                }
                let _ = snapshot_tx.send(state.snapshot(true));
            }
            let _ = snapshot_tx.send(state.snapshot(false));
        });

        ProgressHandle {
            snapshots: snapshot_rx,
            control: control_tx,
            task,
        }
    }
}

type SourceFactory = Box<dyn Fn() -> Box<dyn ProgressSource> + Send + Sync>;

/// The processing modal: `open` starts a fresh simulation, `close` discards
/// it without reporting completion.
pub struct ProgressModal {
    pub file_name: String,
    pub file_size: u64,
    steps: Vec<ProcessingStep>,
    settings: SimulatorSettings,
    source_factory: SourceFactory,
    on_complete: Option<Arc<dyn Fn(ProcessingResult) + Send + Sync>>,
    handle: Option<ProgressHandle>,
}

impl ProgressModal {
    pub fn new(file_name: impl Into<String>, file_size: u64) -> Self {
        Self {
            file_name: file_name.into(),
            file_size,
            steps: default_steps(),
            settings: SimulatorSettings::default(),
            source_factory: Box::new(|| Box::new(RandomIncrement::new(10.0))),
            on_complete: None,
            handle: None,
        }
    }

    pub fn with_steps(mut self, steps: Vec<ProcessingStep>) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_settings(mut self, settings: SimulatorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_source<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn ProgressSource> + Send + Sync + 'static,
    {
        self.source_factory = Box::new(factory);
        self
    }

    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProcessingResult) + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(callback));
        self
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn open(&mut self) {
        if self.handle.is_some() {
            return;
        }
        let callback: Option<CompletionCallback> = self.on_complete.clone().map(|cb| {
            Box::new(move |result: ProcessingResult| cb(result)) as CompletionCallback
        });
        tracing::info!(file = %self.file_name, size = self.file_size, "processing modal opened");
        self.handle = Some(ProgressSimulator::start(
            self.steps.clone(),
            (self.source_factory)(),
            self.settings.clone(),
            callback,
        ));
    }

    pub fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.stop();
            tracing::info!(file = %self.file_name, "processing modal closed");
        }
    }

    pub fn toggle_view(&self) {
        if let Some(handle) = &self.handle {
            handle.toggle_view();
        }
    }

    pub fn snapshot(&self) -> Option<ProgressSnapshot> {
        self.handle.as_ref().map(ProgressHandle::snapshot)
    }

    pub fn subscribe(&self) -> Option<watch::Receiver<ProgressSnapshot>> {
        self.handle.as_ref().map(ProgressHandle::subscribe)
    }

    pub fn file_size_label(&self) -> String {
        format_file_size(self.file_size)
    }
}

pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// `mm:ss`; minutes keep counting past 59.
pub fn format_clock(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Fixed(f64);

    impl ProgressSource for Fixed {
        fn next_increment(&mut self) -> f64 {
            self.0
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<ProcessingResult>>>, CompletionCallback) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        (calls, Box::new(move |r: ProcessingResult| sink.lock().unwrap().push(r)))
    }

    async fn settle(duration: Duration) {
        tokio::time::sleep(duration).await;
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn step_statuses_follow_weighted_progress() {
        let mut state = SimulationState::new(default_steps());
        let statuses = |s: &SimulationState| s.steps.iter().map(|x| x.status).collect::<Vec<_>>();
        assert_eq!(state.total_estimated, 55);
        assert_eq!(
            statuses(&state),
            vec![
                StepStatus::Active,
                StepStatus::Pending,
                StepStatus::Pending,
                StepStatus::Pending,
                StepStatus::Pending
            ]
        );
        // upload owns 0..9.09, extract up to 36.36
        state.advance(20.0);
        assert_eq!(statuses(&state)[0], StepStatus::Completed);
        assert_eq!(statuses(&state)[1], StepStatus::Active);
        state.advance(500.0);
        assert_eq!(state.progress, 100.0);
        assert!(statuses(&state).iter().all(|s| *s == StepStatus::Completed));
    }

    #[test]
    fn negative_or_nan_increments_never_decrease_progress() {
        let mut state = SimulationState::new(default_steps());
        state.advance(7.5);
        state.advance(-3.0);
        state.advance(f64::NAN);
        assert_eq!(state.progress, 7.5);
    }

    #[test]
    fn random_increment_stays_in_range_and_is_seedable() {
        let mut a = RandomIncrement::seeded(7, 10.0);
        let mut b = RandomIncrement::seeded(7, 10.0);
        for _ in 0..200 {
            let value = a.next_increment();
            assert!((0.0..10.0).contains(&value));
            assert_eq!(value, b.next_increment());
        }
        assert_eq!(RandomIncrement::seeded(1, 0.0).next_increment(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_and_remaining_tick_every_second() {
        let handle = ProgressSimulator::start(
            default_steps(),
            Box::new(Fixed(0.0)),
            SimulatorSettings::default(),
            None,
        );
        settle(Duration::from_millis(3_500)).await;
        let snap = handle.snapshot();
        assert_eq!(snap.time_elapsed, 3);
        assert_eq!(snap.estimated_remaining, 52);
        assert!(snap.running);
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_time_never_goes_negative() {
        let handle = ProgressSimulator::start(
            default_steps(),
            Box::new(Fixed(0.0)),
            SimulatorSettings::default(),
            None,
        );
        settle(Duration::from_millis(90_500)).await;
        let snap = handle.snapshot();
        assert_eq!(snap.time_elapsed, 90);
        assert_eq!(snap.estimated_remaining, 0);
        assert_eq!(snap.progress, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn completion_fires_exactly_once_and_stops_timers() {
        let (calls, callback) = recorder();
        let handle = ProgressSimulator::start(
            default_steps(),
            Box::new(Fixed(30.0)),
            SimulatorSettings::default(),
            Some(callback),
        );
        // 30 + 30 + 30 + 30 saturates on the fourth progress tick (t = 8s).
        settle(Duration::from_millis(8_500)).await;
        let snap = handle.snapshot();
        assert_eq!(snap.progress, 100.0);
        assert!(snap.completed);
        assert!(!snap.running);
        assert!(!handle.is_running());

        settle(Duration::from_secs(30)).await;
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0],
            ProcessingResult {
                success: true,
                message: COMPLETION_MESSAGE.to_string(),
                sections_generated: SECTIONS_GENERATED,
            }
        );
        assert_eq!(handle.snapshot().time_elapsed, snap.time_elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn progress_is_monotonic_and_bounded() {
        let handle = ProgressSimulator::start(
            default_steps(),
            Box::new(RandomIncrement::seeded(42, 10.0)),
            SimulatorSettings::default(),
            None,
        );
        let mut last = 0.0;
        for _ in 0..150 {
            settle(Duration::from_secs(2)).await;
            let progress = handle.snapshot().progress;
            assert!(progress >= last);
            assert!(progress <= 100.0);
            last = progress;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stop_and_drop_release_the_task() {
        let handle = ProgressSimulator::start(
            default_steps(),
            Box::new(Fixed(1.0)),
            SimulatorSettings::default(),
            None,
        );
        handle.stop();
        settle(Duration::from_millis(10)).await;
        assert!(!handle.is_running());
        assert!(!handle.snapshot().running);

        let (calls, callback) = recorder();
        let dropped = ProgressSimulator::start(
            default_steps(),
            Box::new(Fixed(50.0)),
            SimulatorSettings::default(),
            Some(callback),
        );
        drop(dropped);
        settle(Duration::from_secs(10)).await;
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn view_toggle_and_error_status_do_not_touch_timers() {
        let handle = ProgressSimulator::start(
            default_steps(),
            Box::new(Fixed(0.0)),
            SimulatorSettings::default(),
            None,
        );
        handle.toggle_view();
        handle.mark_error("validate");
        settle(Duration::from_millis(2_500)).await;
        let snap = handle.snapshot();
        assert_eq!(snap.view, ModalView::Minimized);
        assert_eq!(snap.steps[3].status, StepStatus::Error);
        assert_eq!(snap.time_elapsed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn closing_before_completion_suppresses_callback_and_reopen_resets() {
        let calls = Arc::new(Mutex::new(0usize));
        let sink = calls.clone();
        let mut modal = ProgressModal::new("libro.pdf", 2_621_440)
            .with_source(|| Box::new(Fixed(10.0)))
            .on_complete(move |_| *sink.lock().unwrap() += 1);

        modal.open();
        settle(Duration::from_millis(6_500)).await;
        let before_close = modal.snapshot().unwrap();
        assert_eq!(before_close.time_elapsed, 6);
        assert_eq!(before_close.progress, 30.0);
        modal.close();
        assert!(!modal.is_open());
        assert!(modal.snapshot().is_none());
        settle(Duration::from_secs(60)).await;
        assert_eq!(*calls.lock().unwrap(), 0);

        modal.open();
        let fresh = modal.snapshot().unwrap();
        assert_eq!(fresh.progress, 0.0);
        assert_eq!(fresh.time_elapsed, 0);
        settle(Duration::from_millis(20_500)).await;
        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(modal.snapshot().unwrap().progress, 100.0);
        assert_eq!(modal.file_size_label(), "2.5 MB");
    }

    #[test]
    fn display_helpers() {
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_clock(65), "01:05");
        assert_eq!(format_clock(3_600), "60:00");
    }
}
