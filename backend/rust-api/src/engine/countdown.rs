use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::{task::JoinHandle, time};

pub type ExpireCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub time_remaining: u64,
    pub is_running: bool,
    pub is_initialized: bool,
}

#[derive(Default)]
struct TimerState {
    snapshot: TimerSnapshot,
    /// Cleared once expiry fires or `stop()` runs; set again by `start()`.
    can_expire: bool,
    /// Bumped on every start/pause/resume/stop so a superseded ticker exits.
    generation: u64,
    ticker: Option<JoinHandle<()>>,
    on_expire: Option<ExpireCallback>,
}

impl TimerState {
    fn halt_ticker(&mut self) {
        self.generation += 1;
        if let Some(handle) = self.ticker.take() {
            handle.abort();
        }
    }
}

/// Local whole-second countdown driven by a tokio ticker task.
///
/// All methods must be called from within a tokio runtime.
pub struct CountdownTimer {
    state: Arc<Mutex<TimerState>>,
    tick_interval: Duration,
}

impl CountdownTimer {
    pub fn new() -> Self {
        Self::with_tick_interval(Duration::from_secs(1))
    }

    pub fn with_tick_interval(tick_interval: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(TimerState::default())),
            tick_interval,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TimerState> {
        lock_state(&self.state)
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        self.lock().snapshot
    }

    /// Replaces the expiry callback.
    pub fn on_expire<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.lock().on_expire = Some(Arc::new(callback));
    }

    /// Arms the countdown from `initial_seconds`. Starting from 0 shows an
    /// empty timer and never fires expiry.
    pub fn start(&self, initial_seconds: u64) {
        let mut state = self.lock();
        state.halt_ticker();
        state.snapshot = TimerSnapshot {
            time_remaining: initial_seconds,
            is_running: initial_seconds > 0,
            is_initialized: true,
        };
        state.can_expire = initial_seconds > 0;
        if initial_seconds > 0 {
            self.spawn_ticker(&mut state);
        }
        tracing::debug!("Countdown started: {}s", initial_seconds);
    }

    /// Shows `seconds` without ticking; `resume()` continues from there.
    pub fn load_paused(&self, seconds: u64) {
        let mut state = self.lock();
        state.halt_ticker();
        state.snapshot = TimerSnapshot {
            time_remaining: seconds,
            is_running: false,
            is_initialized: true,
        };
        state.can_expire = seconds > 0;
    }

    pub fn pause(&self) {
        let mut state = self.lock();
        if !state.snapshot.is_running {
            return;
        }
        state.halt_ticker();
        state.snapshot.is_running = false;
    }

    /// No-op when running, uninitialized or already at 0.
    pub fn resume(&self) {
        let mut state = self.lock();
        let snapshot = state.snapshot;
        if snapshot.is_running || !snapshot.is_initialized || snapshot.time_remaining == 0 {
            return;
        }
        state.halt_ticker();
        state.snapshot.is_running = true;
        self.spawn_ticker(&mut state);
    }

    /// Halts and zeroes the countdown without firing expiry.
    pub fn stop(&self) {
        let mut state = self.lock();
        state.halt_ticker();
        state.can_expire = false;
        state.snapshot.time_remaining = 0;
        state.snapshot.is_running = false;
    }

    /// Back to the uninitialized state.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.halt_ticker();
        state.can_expire = false;
        state.snapshot = TimerSnapshot::default();
    }

    fn spawn_ticker(&self, state: &mut TimerState) {
        let shared = self.state.clone();
        let generation = state.generation;
        let tick_interval = self.tick_interval;

        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(time::Instant::now() + tick_interval, tick_interval);
            loop {
                interval.tick().await;

                let fire = {
                    let mut guard = lock_state(&shared);
                    if guard.generation != generation || !guard.snapshot.is_running {
                        break;
                    }
                    guard.snapshot.time_remaining = guard.snapshot.time_remaining.saturating_sub(1);
                    if guard.snapshot.time_remaining > 0 {
                        continue;
                    }

                    guard.snapshot.is_running = false;
                    guard.ticker = None;
                    if guard.can_expire {
                        guard.can_expire = false;
                        guard.on_expire.clone()
                    } else {
                        None
                    }
                };

                if let Some(callback) = fire {
                    tracing::info!("Countdown reached zero");
                    callback();
                }
                break;
            }
        });

        state.ticker = Some(handle);
    }
}

impl Default for CountdownTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CountdownTimer {
    fn drop(&mut self) {
        self.lock().halt_ticker();
    }
}

fn lock_state(state: &Mutex<TimerState>) -> MutexGuard<'_, TimerState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
