use crate::core::basket::BasketEngine;
use crate::core::roster::RosterView;
use crate::core::session_guard::SessionGuard;
use crate::domain::model::{AccountId, BatchAction, RegistrationOp, Session};
use crate::domain::ports::{DataService, PreferenceStore};
use crate::utils::error::SubmitError;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

pub const DEFAULT_SAFETY_TIMEOUT: Duration = Duration::from_secs(60);

/// Key of the marker recorded once an account has gone through the basket.
pub fn completion_marker_key(account: &AccountId) -> String {
    format!("wizard_completed_{}", account)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitReport {
    /// Operations in the order they were transmitted.
    pub operations: Vec<RegistrationOp>,
}

impl SubmitReport {
    pub fn added(&self) -> usize {
        self.count(BatchAction::Add)
    }

    pub fn removed(&self) -> usize {
        self.count(BatchAction::Remove)
    }

    fn count(&self, action: BatchAction) -> usize {
        self.operations.iter().filter(|op| op.action == action).count()
    }
}

/// Turns a basket into one atomic remote batch.
pub struct TransactionSubmitter<P: PreferenceStore> {
    service: Arc<dyn DataService>,
    roster: Arc<RosterView>,
    store: P,
    safety_timeout: Duration,
}

impl<P: PreferenceStore> TransactionSubmitter<P> {
    pub fn new(
        service: Arc<dyn DataService>,
        roster: Arc<RosterView>,
        store: P,
        safety_timeout: Duration,
    ) -> Self {
        Self {
            service,
            roster,
            store,
            safety_timeout,
        }
    }

    pub async fn has_completed(&self, account: &AccountId) -> bool {
        match self.store.read_marker(&completion_marker_key(account)).await {
            Ok(done) => done,
            Err(e) => {
                tracing::warn!("Could not read completion marker: {}", e);
                false
            }
        }
    }

    pub async fn submit(
        &self,
        engine: &Mutex<BasketEngine>,
        guard: &SessionGuard,
    ) -> Result<SubmitReport, SubmitError> {
        let mut operations = {
            let engine = engine.lock().unwrap_or_else(PoisonError::into_inner);
            engine.basket().operations()
        };

        if operations.is_empty() {
            tracing::info!("Nothing staged, marking basket as completed");
            if let Some(session) = guard.current() {
                self.mark_completed(&session.account.id).await;
            }
            return Ok(SubmitReport::default());
        }

        let session = guard.refresh().await.map_err(|e| {
            tracing::error!("❌ Cannot submit without a valid session: {}", e);
            SubmitError::SessionExpired(e)
        })?;

        // Fixed slot order keeps concurrent batches from deadlocking server-side;
        // within a slot, removals go out before adds.
        operations.sort();
        tracing::info!("📤 Submitting {} registration change(s)", operations.len());

        let outcome = tokio::time::timeout(
            self.safety_timeout,
            self.service.apply_registration_batch(&session, &operations),
        )
        .await;

        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(remote)) => Some(SubmitError::from_remote(&remote)),
            Err(_) => Some(SubmitError::Unknown {
                message: format!(
                    "no answer within {}s",
                    self.safety_timeout.as_secs()
                ),
            }),
        };

        if let Some(error) = error {
            tracing::error!("❌ Batch rejected: {}", error);
            if error.requires_reload() {
                self.reload(&session).await;
            }
            return Err(error);
        }

        engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .discard_submitted(&operations);
        self.reload(&session).await;
        self.mark_completed(&session.account.id).await;

        let report = SubmitReport { operations };
        tracing::info!(
            "✅ Batch committed: {} added, {} removed",
            report.added(),
            report.removed()
        );
        Ok(report)
    }

    async fn reload(&self, session: &Session) {
        if let Err(e) = self.roster.reload(session).await {
            tracing::warn!("Roster reload after submit failed: {}", e);
        }
    }

    async fn mark_completed(&self, account: &AccountId) {
        if let Err(e) = self.store.write_marker(&completion_marker_key(account)).await {
            tracing::warn!("Could not record completion marker: {}", e);
        }
    }
}
