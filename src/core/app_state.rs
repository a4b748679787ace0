use crate::core::basket::{Basket, BasketEngine, StageOutcome};
use crate::core::polling::{PollerSignal, PollingScheduler};
use crate::core::roster::{ProjectedSlots, RosterSnapshot, RosterView};
use crate::core::session_guard::{RefreshPolicy, SessionGuard};
use crate::core::submitter::{SubmitReport, TransactionSubmitter, DEFAULT_SAFETY_TIMEOUT};
use crate::domain::model::{ProfileId, Session, SlotId};
use crate::domain::ports::{ConfirmationHandler, DataService, IdentityProvider, PreferenceStore};
use crate::utils::error::{AuthError, Result, StageError, SubmitError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

/// Timing knobs of the engine, usually built from the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub refresh_policy: RefreshPolicy,
    pub poll_interval: Duration,
    pub safety_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            refresh_policy: RefreshPolicy::default(),
            poll_interval: Duration::from_secs(60),
            safety_timeout: DEFAULT_SAFETY_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupReport {
    /// No stored session: the user has to sign in.
    SignedOut,
    /// The stored session could not be refreshed and was dropped.
    SessionRejected(AuthError),
    Ready {
        slots: usize,
        profiles: usize,
        /// Open the basket straight away: nothing committed yet and the
        /// account never completed a submission.
        wizard_auto_open: bool,
    },
}

/// Owns every component for one signed-in user. Only the roster view
/// writes the snapshot and only the basket engine writes the basket.
pub struct AppState<P: PreferenceStore> {
    service: Arc<dyn DataService>,
    guard: Arc<SessionGuard>,
    roster: Arc<RosterView>,
    basket: Mutex<BasketEngine>,
    submitter: TransactionSubmitter<P>,
    poller: PollingScheduler,
    poll_signals: Mutex<Option<mpsc::UnboundedReceiver<PollerSignal>>>,
}

impl<P: PreferenceStore> AppState<P> {
    pub fn new(
        service: Arc<dyn DataService>,
        identity: Arc<dyn IdentityProvider>,
        store: P,
        confirmer: Arc<dyn ConfirmationHandler>,
        settings: EngineSettings,
    ) -> Self {
        let guard = Arc::new(SessionGuard::new(identity, settings.refresh_policy));
        let roster = Arc::new(RosterView::new(Arc::clone(&service)));
        let submitter = TransactionSubmitter::new(
            Arc::clone(&service),
            Arc::clone(&roster),
            store,
            settings.safety_timeout,
        );
        let (poller, signals) =
            PollingScheduler::new(Arc::clone(&guard), Arc::clone(&roster), settings.poll_interval);

        Self {
            service,
            guard,
            roster,
            basket: Mutex::new(BasketEngine::new(confirmer)),
            submitter,
            poller,
            poll_signals: Mutex::new(Some(signals)),
        }
    }

    pub fn session_guard(&self) -> &Arc<SessionGuard> {
        &self.guard
    }

    pub fn roster(&self) -> &Arc<RosterView> {
        &self.roster
    }

    pub fn poller(&self) -> &PollingScheduler {
        &self.poller
    }

    /// Strict startup: a stored session is only trusted after a successful
    /// refresh. Must run inside a tokio runtime since it starts the poller.
    pub async fn init(&self, session: Option<Session>) -> Result<StartupReport> {
        let Some(session) = session else {
            tracing::info!("No stored session, sign-in required");
            return Ok(StartupReport::SignedOut);
        };

        self.guard.sign_in(session);
        let session = match self.guard.refresh().await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!("🚪 Stored session rejected at startup: {}", e);
                self.logout().await;
                return Ok(StartupReport::SessionRejected(e));
            }
        };

        self.roster.reload(&session).await?;
        self.roster.load_public_attendees(&session).await;

        let (slots, profiles, has_live) = self.roster.read(|snapshot| {
            (
                snapshot.slots().len(),
                snapshot.profiles().len(),
                snapshot.has_live_registrations(),
            )
        });
        let wizard_auto_open =
            !has_live && !self.submitter.has_completed(&session.account.id).await;

        self.poller.start();
        tracing::info!(
            "🚀 Ready: {} slots, {} profiles (auto-open basket: {})",
            slots,
            profiles,
            wizard_auto_open
        );
        Ok(StartupReport::Ready {
            slots,
            profiles,
            wizard_auto_open,
        })
    }

    /// Tears everything down without asking. Safe to call more than once.
    pub async fn logout(&self) {
        self.poller.stop();
        self.engine().reset();
        self.roster.clear();
        self.guard.sign_out().await;
        tracing::info!("👋 Logged out");
    }

    pub fn stage_add(
        &self,
        slot_id: &SlotId,
        profile_id: &ProfileId,
    ) -> std::result::Result<StageOutcome, StageError> {
        let snapshot = self.roster.snapshot();
        self.engine().stage_add(&snapshot, slot_id, profile_id)
    }

    pub fn stage_remove(
        &self,
        slot_id: &SlotId,
        profile_id: &ProfileId,
    ) -> std::result::Result<StageOutcome, StageError> {
        let snapshot = self.roster.snapshot();
        self.engine().stage_remove(&snapshot, slot_id, profile_id)
    }

    pub fn would_conflict(&self, slot_id: &SlotId, profile_id: &ProfileId) -> bool {
        let snapshot = self.roster.snapshot();
        self.engine().would_conflict(&snapshot, slot_id, profile_id)
    }

    pub fn reset_basket(&self) {
        self.engine().reset();
    }

    /// Returns whether the basket was closed; a non-empty basket asks first.
    pub fn close_basket(&self) -> bool {
        self.engine().close()
    }

    pub fn basket(&self) -> Basket {
        self.engine().basket().clone()
    }

    pub fn snapshot(&self) -> RosterSnapshot {
        self.roster.snapshot()
    }

    pub fn projected_slots(&self) -> ProjectedSlots {
        let engine = self.engine();
        self.roster.apply_basket_overlay(engine.basket())
    }

    /// A lost session always wins over the basket: it triggers a logout.
    pub async fn submit(&self) -> std::result::Result<SubmitReport, SubmitError> {
        let result = self.submitter.submit(&self.basket, &self.guard).await;
        if let Err(SubmitError::SessionExpired(e)) = &result {
            tracing::warn!("Session expired during submit ({}), logging out", e);
            self.logout().await;
        }
        result
    }

    /// Opaque balance of the signed-in account. Failures read as zero.
    pub async fn balance(&self) -> f64 {
        let Some(session) = self.guard.current() else {
            return 0.0;
        };
        match self.service.get_balance(&session, &session.account.id).await {
            Ok(balance) => balance,
            Err(e) => {
                tracing::warn!("Balance unavailable: {}", e);
                0.0
            }
        }
    }

    /// Hands out the poller's signal channel. Only the first caller gets it.
    pub fn take_poll_signals(&self) -> Option<mpsc::UnboundedReceiver<PollerSignal>> {
        self.poll_signals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub async fn handle_poll_signal(&self, signal: PollerSignal) {
        match signal {
            PollerSignal::ForcedLogout(e) => {
                tracing::warn!("🚪 Forced logout: {}", e);
                self.logout().await;
            }
        }
    }

    fn engine(&self) -> MutexGuard<'_, BasketEngine> {
        self.basket.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
