use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use super::api::QuizApi;
use super::countdown::{CountdownTimer, TimerSnapshot};
use super::fullscreen::FullscreenGuard;
use super::loader::{load_with_retry, LoadOutcome};
use super::reconcile;
use super::store::SessionStore;
use super::visibility::{VisibilityMonitor, VisibilitySubscription};
use crate::config::Config;
use crate::error::QuizError;
use crate::models::{PauseReason, QuizSession, QuizStatus};
use crate::utils::retry::RetryConfig;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub tick_interval: Duration,
    pub init_timeout: Duration,
    pub load_retry: RetryConfig,
    pub terminal_retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            init_timeout: Duration::from_secs(12),
            load_retry: RetryConfig::initialization(),
            terminal_retry: RetryConfig::terminal(),
        }
    }
}

impl From<&Config> for EngineConfig {
    fn from(config: &Config) -> Self {
        Self {
            init_timeout: Duration::from_millis(config.init_timeout_ms),
            load_retry: RetryConfig {
                max_attempts: config.load_retry_attempts,
                base_backoff: Duration::from_millis(config.load_retry_base_ms),
                ..RetryConfig::initialization()
            },
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ControllerPhase {
    #[default]
    Idle,
    Initializing,
    Pending,
    InProgress,
    Paused,
    Completed,
    Expired,
    /// Initialization gave up; `last_error` says why.
    Failed,
}

impl ControllerPhase {
    fn of(quiz: &QuizSession) -> Self {
        match quiz.status {
            QuizStatus::Pending => ControllerPhase::Pending,
            QuizStatus::InProgress if quiz.is_paused() => ControllerPhase::Paused,
            QuizStatus::InProgress => ControllerPhase::InProgress,
            QuizStatus::Completed => ControllerPhase::Completed,
            QuizStatus::Expired => ControllerPhase::Expired,
        }
    }
}

/// Where the presentation layer should go after a controller action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Navigation {
    Stay,
    Results { expired: bool },
    BackToCreate { message: String },
}

/// Non-blocking proctoring problems shown next to the quiz.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "kebab-case")]
pub enum ProctoringWarning {
    VisibilityUnsupported,
    FullscreenUnavailable(String),
}

/// Snapshot published to the presentation layer. `timer` is as of the last
/// publish; read [`SessionController::timer`] for a live value.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerView {
    pub quiz_id: Option<String>,
    pub phase: ControllerPhase,
    pub session: Option<QuizSession>,
    pub current_question_index: usize,
    pub timer: TimerSnapshot,
    pub warnings: Vec<ProctoringWarning>,
    pub resume_prompt: bool,
    pub error: Option<String>,
}

/// Callbacks from the timer and visibility monitor, tagged with the quiz they
/// were wired for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    TimerExpired { quiz_id: String },
    VisibilityChanged { quiz_id: String, visible: bool },
}

impl ControllerEvent {
    pub fn quiz_id(&self) -> &str {
        match self {
            ControllerEvent::TimerExpired { quiz_id }
            | ControllerEvent::VisibilityChanged { quiz_id, .. } => quiz_id,
        }
    }
}

/// Drives one quiz page: initialization, timer, proctoring and the terminal
/// transitions.
///
/// Timer and visibility callbacks only enqueue [`ControllerEvent`]s; they are
/// handled one at a time by [`pump`](Self::pump) or
/// [`drain_events`](Self::drain_events), so no two transitions overlap.
pub struct SessionController {
    store: SessionStore,
    timer: CountdownTimer,
    visibility: VisibilityMonitor,
    fullscreen: FullscreenGuard,
    config: EngineConfig,
    /// Quiz ids whose initialization already ran on this instance.
    started: HashSet<String>,
    mounted: Option<String>,
    subscription: Option<VisibilitySubscription>,
    events_tx: mpsc::UnboundedSender<ControllerEvent>,
    events_rx: mpsc::UnboundedReceiver<ControllerEvent>,
    view_tx: watch::Sender<ControllerView>,
    phase: ControllerPhase,
    warnings: Vec<ProctoringWarning>,
    resume_prompt: bool,
    last_error: Option<String>,
}

impl SessionController {
    pub fn new(
        api: Arc<dyn QuizApi>,
        visibility: VisibilityMonitor,
        fullscreen: FullscreenGuard,
        config: EngineConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (view_tx, _) = watch::channel(ControllerView::default());

        Self {
            store: SessionStore::new(api),
            timer: CountdownTimer::with_tick_interval(config.tick_interval),
            visibility,
            fullscreen,
            config,
            started: HashSet::new(),
            mounted: None,
            subscription: None,
            events_tx,
            events_rx,
            view_tx,
            phase: ControllerPhase::Idle,
            warnings: Vec::new(),
            resume_prompt: false,
            last_error: None,
        }
    }

    /// No visibility signal and no fullscreen; both raise warnings once wired.
    pub fn headless(api: Arc<dyn QuizApi>, config: EngineConfig) -> Self {
        Self::new(
            api,
            VisibilityMonitor::unsupported(),
            FullscreenGuard::headless(),
            config,
        )
    }

    pub fn subscribe(&self) -> watch::Receiver<ControllerView> {
        self.view_tx.subscribe()
    }

    pub fn view(&self) -> ControllerView {
        self.view_tx.borrow().clone()
    }

    pub fn phase(&self) -> ControllerPhase {
        self.phase
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn timer(&self) -> TimerSnapshot {
        self.timer.snapshot()
    }

    pub fn warnings(&self) -> &[ProctoringWarning] {
        &self.warnings
    }

    pub fn resume_prompt(&self) -> bool {
        self.resume_prompt
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Loads (and if needed starts) `quiz_id`, then wires timer and proctoring.
    ///
    /// Runs at most once per mounted quiz id; repeat calls while it stays
    /// mounted return `Navigation::Stay`. Fails only with `QuizError::Timeout`
    /// (the whole sequence is bounded by `init_timeout`) or when an expiry
    /// found during initialization cannot be recorded. After a timeout the
    /// phase is `Failed` and the same id may be initialized again.
    pub async fn initialize(&mut self, quiz_id: &str) -> Result<Navigation, QuizError> {
        if self.mounted.as_deref().is_some_and(|mounted| mounted != quiz_id) {
            self.unmount().await;
        }
        if !self.started.insert(quiz_id.to_string()) {
            tracing::debug!("Initialization already ran for quiz {}", quiz_id);
            return Ok(Navigation::Stay);
        }

        self.mounted = Some(quiz_id.to_string());
        self.phase = ControllerPhase::Initializing;
        self.last_error = None;
        self.publish();

        let init_timeout = self.config.init_timeout;
        match tokio::time::timeout(init_timeout, self.run_initialization(quiz_id)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(
                    "Initialization of quiz {} timed out after {:?}",
                    quiz_id,
                    init_timeout
                );
                self.unmount().await;
                self.phase = ControllerPhase::Failed;
                self.last_error = Some("Loading the quiz took too long".to_string());
                self.publish();
                Err(QuizError::Timeout(init_timeout))
            }
        }
    }

    async fn run_initialization(&mut self, quiz_id: &str) -> Result<Navigation, QuizError> {
        let quiz = match self.load_authoritative(quiz_id).await {
            Ok(quiz) => quiz,
            Err(navigation) => return Ok(navigation),
        };

        let quiz = if quiz.status == QuizStatus::Pending {
            match self
                .store
                .start_with_retry(quiz_id, self.config.load_retry.clone())
                .await
            {
                Ok(_) => {}
                Err(e) if e.is_conflict() => {
                    tracing::info!("Quiz {} was started elsewhere, reloading", quiz_id);
                }
                Err(e) => {
                    return Ok(self.back_to_create(format!("Could not start the quiz: {}", e)));
                }
            }
            // startTime comes from the server copy
            match self.load_authoritative(quiz_id).await {
                Ok(quiz) => quiz,
                Err(navigation) => return Ok(navigation),
            }
        } else {
            quiz
        };

        self.enter(quiz).await
    }

    async fn load_authoritative(&mut self, quiz_id: &str) -> Result<QuizSession, Navigation> {
        match load_with_retry(self.store.api(), quiz_id, self.config.load_retry.clone()).await {
            LoadOutcome::Found(quiz) => Ok(self.store.adopt(quiz)),
            LoadOutcome::NotFoundAfterRetries => {
                Err(self.back_to_create(format!("Quiz {} could not be found", quiz_id)))
            }
            LoadOutcome::Fatal(e) => {
                Err(self.back_to_create(format!("Failed to load the quiz: {}", e)))
            }
        }
    }

    fn back_to_create(&mut self, message: String) -> Navigation {
        tracing::warn!("Leaving quiz page: {}", message);
        self.phase = ControllerPhase::Idle;
        self.last_error = Some(message.clone());
        self.publish();
        Navigation::BackToCreate { message }
    }

    /// Applies a server copy of the quiz: results for terminal quizzes,
    /// otherwise reconciled timer state.
    async fn enter(&mut self, quiz: QuizSession) -> Result<Navigation, QuizError> {
        match quiz.status {
            QuizStatus::Completed | QuizStatus::Expired => Ok(self.conclude(&quiz).await),
            QuizStatus::Pending => {
                self.phase = ControllerPhase::Pending;
                self.publish();
                Ok(Navigation::Stay)
            }
            QuizStatus::InProgress => {
                self.wire(&quiz.id).await;

                let remaining = reconcile::remaining_seconds(&quiz, Utc::now());
                if remaining == 0 {
                    tracing::info!("Quiz {} has no time left", quiz.id);
                    return self.handle_expiry().await;
                }

                if quiz.is_paused() {
                    self.timer.load_paused(remaining);
                    self.phase = ControllerPhase::Paused;
                    self.resume_prompt = quiz.pause_reason == Some(PauseReason::TabChange);
                } else {
                    self.timer.start(remaining);
                    self.phase = ControllerPhase::InProgress;
                    self.resume_prompt = false;
                }
                tracing::info!(
                    "Quiz {} active: remaining={}s paused={}",
                    quiz.id,
                    remaining,
                    quiz.is_paused()
                );
                self.publish();

                if !quiz.is_paused() && !self.visibility.is_visible() {
                    // handled by the next pump like any other transition
                    let _ = self.events_tx.send(ControllerEvent::VisibilityChanged {
                        quiz_id: quiz.id.clone(),
                        visible: false,
                    });
                }
                Ok(Navigation::Stay)
            }
        }
    }

    /// Registers the expiry callback, the visibility subscription and fullscreen.
    async fn wire(&mut self, quiz_id: &str) {
        let tx = self.events_tx.clone();
        let expired_id = quiz_id.to_string();
        self.timer.on_expire(move || {
            let _ = tx.send(ControllerEvent::TimerExpired {
                quiz_id: expired_id.clone(),
            });
        });

        if self.subscription.is_none() {
            if self.visibility.is_supported() {
                let tx = self.events_tx.clone();
                let watched_id = quiz_id.to_string();
                self.subscription = Some(self.visibility.on_visibility_change(move |visible| {
                    let _ = tx.send(ControllerEvent::VisibilityChanged {
                        quiz_id: watched_id.clone(),
                        visible,
                    });
                }));
            } else {
                tracing::warn!("Visibility changes cannot be detected on this surface");
                self.add_warning(ProctoringWarning::VisibilityUnsupported);
            }
        }

        if !self.fullscreen.is_fullscreen() {
            if let Err(e) = self.fullscreen.enter_fullscreen(None).await {
                tracing::warn!("Fullscreen unavailable for quiz {}: {}", quiz_id, e);
                self.add_warning(ProctoringWarning::FullscreenUnavailable(e.to_string()));
            }
        }
    }

    fn add_warning(&mut self, warning: ProctoringWarning) {
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }

    /// Waits for the next timer/visibility event and handles it.
    pub async fn pump(&mut self) -> Option<Result<Navigation, QuizError>> {
        let event = self.events_rx.recv().await?;
        Some(self.handle_event(event).await)
    }

    /// Handles every event already queued, without waiting.
    pub async fn drain_events(&mut self) -> Vec<Result<Navigation, QuizError>> {
        let mut results = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            results.push(self.handle_event(event).await);
        }
        results
    }

    pub async fn handle_event(&mut self, event: ControllerEvent) -> Result<Navigation, QuizError> {
        if self.mounted.as_deref() != Some(event.quiz_id()) {
            tracing::debug!("Ignoring stale event for quiz {}", event.quiz_id());
            return Ok(Navigation::Stay);
        }

        match event {
            ControllerEvent::TimerExpired { .. } => self.handle_expiry().await,
            ControllerEvent::VisibilityChanged { visible: false, .. } => self.on_hidden().await,
            ControllerEvent::VisibilityChanged { visible: true, .. } => Ok(self.on_visible()),
        }
    }

    fn active_quiz(&self) -> Option<&QuizSession> {
        self.store
            .session()
            .filter(|quiz| quiz.status == QuizStatus::InProgress && !quiz.is_paused())
    }

    /// Timer first, then the server, so no time is lost to the round trip.
    async fn on_hidden(&mut self) -> Result<Navigation, QuizError> {
        let Some(quiz_id) = self.active_quiz().map(|quiz| quiz.id.clone()) else {
            return Ok(Navigation::Stay);
        };

        self.timer.pause();
        self.phase = ControllerPhase::Paused;
        self.resume_prompt = false;

        match self.store.pause(PauseReason::TabChange).await {
            Ok(_) => tracing::info!("Quiz {} paused: tab hidden", quiz_id),
            Err(e) if e.is_conflict() => {
                tracing::info!("Quiz {} changed on the server, resyncing", quiz_id);
                return self.resync().await;
            }
            Err(e) => {
                tracing::warn!("Failed to record tab-change pause for quiz {}: {}", quiz_id, e);
            }
        }

        self.publish();
        Ok(Navigation::Stay)
    }

    /// Coming back never resumes by itself; it only offers the prompt.
    fn on_visible(&mut self) -> Navigation {
        let manual = self
            .store
            .session()
            .is_some_and(|quiz| quiz.pause_reason == Some(PauseReason::Manual));
        if self.phase == ControllerPhase::Paused && !manual {
            self.resume_prompt = true;
            self.publish();
        }
        Navigation::Stay
    }

    /// User-initiated pause. No resume prompt; resumed by `confirm_resume`.
    pub async fn pause_manual(&mut self) -> Result<Navigation, QuizError> {
        let Some(quiz_id) = self.active_quiz().map(|quiz| quiz.id.clone()) else {
            return Ok(Navigation::Stay);
        };

        self.timer.pause();
        match self.store.pause(PauseReason::Manual).await {
            Ok(_) => {
                tracing::info!("Quiz {} paused by user", quiz_id);
                self.phase = ControllerPhase::Paused;
                self.resume_prompt = false;
                self.publish();
                Ok(Navigation::Stay)
            }
            Err(e) if e.is_conflict() => self.resync().await,
            Err(e) => {
                self.timer.resume();
                self.last_error = Some(format!("Could not pause the quiz: {}", e));
                self.publish();
                Err(e)
            }
        }
    }

    /// Resumes a paused quiz and re-arms the timer from server time.
    pub async fn confirm_resume(&mut self) -> Result<Navigation, QuizError> {
        if self.phase != ControllerPhase::Paused {
            return Ok(Navigation::Stay);
        }

        let quiz = match self.store.resume().await {
            Ok(quiz) => quiz,
            Err(e) if e.is_conflict() => {
                tracing::info!("Resume rejected ({}), resyncing", e);
                return self.resync().await;
            }
            Err(e) => {
                self.last_error = Some(format!("Could not resume the quiz: {}", e));
                self.publish();
                return Err(e);
            }
        };

        tracing::info!(
            "Quiz {} resumed after {} pause(s)",
            quiz.id,
            quiz.pause_count
        );
        self.resume_prompt = false;
        self.last_error = None;
        self.enter(quiz).await
    }

    /// Re-reads the quiz and applies whatever the server says.
    async fn resync(&mut self) -> Result<Navigation, QuizError> {
        let Some(quiz_id) = self.mounted.clone() else {
            return Ok(Navigation::Stay);
        };
        match self.store.load(&quiz_id).await? {
            Some(quiz) => self.enter(quiz).await,
            None => Ok(self.back_to_create(format!("Quiz {} no longer exists", quiz_id))),
        }
    }

    /// Saves a selection. Failures are logged; the selection stays pending.
    pub async fn select_answer(&mut self, question_id: &str, answer: &str) {
        if self.phase != ControllerPhase::InProgress {
            tracing::debug!("Ignoring answer for {} while {:?}", question_id, self.phase);
            return;
        }
        if let Err(e) = self.store.answer(question_id, answer).await {
            tracing::warn!(
                "Saving answer for {} failed, keeping local selection: {}",
                question_id,
                e
            );
        }
        self.publish();
    }

    pub async fn next(&mut self) -> usize {
        self.store.flush_pending_answers().await;
        let index = self.store.next();
        self.publish();
        index
    }

    pub async fn previous(&mut self) -> usize {
        self.store.flush_pending_answers().await;
        let index = self.store.previous();
        self.publish();
        index
    }

    /// Fill-forward, then finish. A second failure is surfaced as a blocking error.
    pub async fn finish(&mut self) -> Result<Navigation, QuizError> {
        let quiz = self
            .store
            .session()
            .cloned()
            .ok_or_else(|| QuizError::ConflictingState("no quiz loaded".to_string()))?;
        if quiz.is_terminal() {
            return Ok(self.conclude(&quiz).await);
        }

        let failures = self.store.fill_forward().await;
        if failures > 0 {
            tracing::warn!(
                "{} answer(s) of quiz {} could not be recorded before finishing",
                failures,
                quiz.id
            );
        }

        match self
            .store
            .finish_with_retry(self.config.terminal_retry.clone())
            .await
        {
            Ok(quiz) => Ok(self.conclude(&quiz).await),
            Err(e) => {
                tracing::error!("Finishing quiz {} failed: {}", quiz.id, e);
                self.last_error = Some(format!("Could not submit the quiz: {}", e));
                self.publish();
                Err(e)
            }
        }
    }

    /// Best-effort save of unsaved selections, then expire.
    async fn handle_expiry(&mut self) -> Result<Navigation, QuizError> {
        let Some(quiz) = self.store.session().cloned() else {
            return Ok(Navigation::Stay);
        };
        if quiz.is_terminal() {
            return Ok(self.conclude(&quiz).await);
        }

        self.timer.stop();
        let unsaved = self.store.flush_pending_answers().await;
        if unsaved > 0 {
            tracing::warn!(
                "{} selection(s) of quiz {} were not saved before expiry",
                unsaved,
                quiz.id
            );
        }

        match self
            .store
            .expire_with_retry(self.config.terminal_retry.clone())
            .await
        {
            Ok(quiz) => {
                tracing::info!("Quiz {} closed by the timer", quiz.id);
                Ok(self.conclude(&quiz).await)
            }
            Err(e) => {
                tracing::error!("Expiring quiz {} failed: {}", quiz.id, e);
                self.last_error = Some(format!("Could not close the quiz: {}", e));
                self.publish();
                Err(e)
            }
        }
    }

    async fn conclude(&mut self, quiz: &QuizSession) -> Navigation {
        self.teardown().await;
        self.phase = ControllerPhase::of(quiz);
        self.resume_prompt = false;
        self.publish();
        Navigation::Results {
            expired: quiz.status == QuizStatus::Expired,
        }
    }

    async fn teardown(&mut self) {
        self.timer.stop();
        self.subscription = None;
        self.fullscreen.exit_fullscreen().await;
    }

    /// Leaves the page. The quiz may be initialized again afterwards.
    pub async fn unmount(&mut self) {
        self.teardown().await;
        self.timer.reset();
        if let Some(quiz_id) = self.mounted.take() {
            self.started.remove(&quiz_id);
            tracing::info!("Quiz {} unmounted", quiz_id);
        }
        while self.events_rx.try_recv().is_ok() {}

        self.store.clear();
        self.phase = ControllerPhase::Idle;
        self.warnings.clear();
        self.resume_prompt = false;
        self.last_error = None;
        self.publish();
    }

    fn publish(&self) {
        let view = ControllerView {
            quiz_id: self.mounted.clone(),
            phase: self.phase,
            session: self.store.session().cloned(),
            current_question_index: self.store.current_question_index(),
            timer: self.timer.snapshot(),
            warnings: self.warnings.clone(),
            resume_prompt: self.resume_prompt,
            error: self.last_error.clone(),
        };
        self.view_tx.send_replace(view);
    }
}
