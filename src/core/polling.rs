use crate::core::roster::RosterView;
use crate::core::session_guard::SessionGuard;
use crate::utils::error::AuthError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Stopped,
    Running,
    Paused,
}

/// Raised by the poller for the owner of the session to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollerSignal {
    ForcedLogout(AuthError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The view is hidden; nothing was fetched.
    Skipped,
    Refreshed,
    SessionLost,
    /// The poller was stopped or paused while the tick was running.
    Cancelled,
}

struct TimerTask {
    stop_tx: Option<oneshot::Sender<()>>,
    _task: JoinHandle<()>,
}

struct Control {
    state: PollerState,
    timer: Option<TimerTask>,
}

struct PollerInner {
    guard: Arc<SessionGuard>,
    roster: Arc<RosterView>,
    interval: Duration,
    visible: AtomicBool,
    /// Bumped whenever the timer is torn down; ticks from older generations
    /// must not act.
    generation: AtomicU64,
    control: Mutex<Control>,
    signals: mpsc::UnboundedSender<PollerSignal>,
}

impl PollerInner {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn cancel_timer(&self, control: &mut Control) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(mut timer) = control.timer.take() {
            if let Some(stop_tx) = timer.stop_tx.take() {
                let _ = stop_tx.send(());
            }
        }
    }

    /// `first_tick` is when the timer fires first; later ticks follow every interval.
    fn spawn_timer(self: &Arc<Self>, control: &mut Control, first_tick: Instant) {
        let generation = self.generation.load(Ordering::SeqCst);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let inner = Arc::clone(self);
        let period = self.interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(first_tick, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        match inner.tick(generation).await {
                            TickOutcome::Cancelled | TickOutcome::SessionLost => break,
                            TickOutcome::Skipped | TickOutcome::Refreshed => {}
                        }
                    }
                }
            }
            tracing::debug!("Poller timer #{} finished", generation);
        });

        control.timer = Some(TimerTask {
            stop_tx: Some(stop_tx),
            _task: task,
        });
    }

    async fn tick(&self, generation: u64) -> TickOutcome {
        if !self.is_current(generation) {
            return TickOutcome::Cancelled;
        }
        if !self.visible.load(Ordering::SeqCst) {
            tracing::debug!("View hidden, skipping poll");
            return TickOutcome::Skipped;
        }

        let refreshed = self.guard.refresh().await;
        if !self.is_current(generation) {
            return TickOutcome::Cancelled;
        }

        let session = match refreshed {
            Ok(session) => session,
            Err(e) => {
                tracing::error!("🚪 Session lost during background refresh: {}", e);
                {
                    let mut control = self.control();
                    control.state = PollerState::Stopped;
                    self.cancel_timer(&mut control);
                }
                let _ = self.signals.send(PollerSignal::ForcedLogout(e));
                return TickOutcome::SessionLost;
            }
        };

        if let Err(e) = self.roster.reload(&session).await {
            tracing::warn!("Background roster refresh failed: {}", e);
        }
        TickOutcome::Refreshed
    }
}

/// Keeps the session alive and the roster fresh while the view is visible.
pub struct PollingScheduler {
    inner: Arc<PollerInner>,
}

impl PollingScheduler {
    pub fn new(
        guard: Arc<SessionGuard>,
        roster: Arc<RosterView>,
        interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<PollerSignal>) {
        let (signals, receiver) = mpsc::unbounded_channel();
        let inner = Arc::new(PollerInner {
            guard,
            roster,
            interval,
            visible: AtomicBool::new(true),
            generation: AtomicU64::new(0),
            control: Mutex::new(Control {
                state: PollerState::Stopped,
                timer: None,
            }),
            signals,
        });
        (Self { inner }, receiver)
    }

    pub fn state(&self) -> PollerState {
        self.inner.control().state
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut control = self.inner.control();
        if control.state != PollerState::Stopped {
            return;
        }
        control.state = PollerState::Running;
        if self.inner.visible.load(Ordering::SeqCst) {
            let first_tick = Instant::now() + self.inner.interval;
            self.inner.spawn_timer(&mut control, first_tick);
            tracing::info!("⏱️ Polling every {:?}", self.inner.interval);
        } else {
            control.state = PollerState::Paused;
        }
    }

    pub fn stop(&self) {
        let mut control = self.inner.control();
        if control.state == PollerState::Stopped {
            return;
        }
        control.state = PollerState::Stopped;
        self.inner.cancel_timer(&mut control);
        tracing::info!("⏹️ Polling stopped");
    }

    pub fn pause(&self) {
        let mut control = self.inner.control();
        if control.state != PollerState::Running {
            return;
        }
        control.state = PollerState::Paused;
        self.inner.cancel_timer(&mut control);
        tracing::debug!("Polling paused");
    }

    /// Restarts the timer with an immediate first tick, so a view that comes
    /// back refreshes right away instead of waiting a full interval.
    pub fn resume(&self) {
        let mut control = self.inner.control();
        if control.state != PollerState::Paused {
            return;
        }
        control.state = PollerState::Running;
        self.inner.spawn_timer(&mut control, Instant::now());
        tracing::debug!("Polling resumed");
    }

    pub fn set_visibility(&self, visible: bool) {
        self.inner.visible.store(visible, Ordering::SeqCst);
        if visible {
            self.resume();
        } else {
            self.pause();
        }
    }

    /// Runs one tick immediately, outside the timer.
    pub async fn poll_once(&self) -> TickOutcome {
        let generation = self.inner.generation.load(Ordering::SeqCst);
        self.inner.tick(generation).await
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        let mut control = self.inner.control();
        self.inner.cancel_timer(&mut control);
    }
}
