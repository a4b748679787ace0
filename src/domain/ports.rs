use crate::domain::model::{
    AccountId, Profile, PublicAttendee, Registration, RegistrationOp, Session, Slot,
};
use crate::utils::error::{AuthError, RemoteError, Result};
use async_trait::async_trait;

/// Remote data service holding the roster, registrations and profiles.
#[async_trait]
pub trait DataService: Send + Sync {
    async fn fetch_slots(&self, session: &Session) -> std::result::Result<Vec<Slot>, RemoteError>;

    /// Committed registrations of every profile owned by the session's account.
    async fn fetch_my_registrations(
        &self,
        session: &Session,
    ) -> std::result::Result<Vec<Registration>, RemoteError>;

    async fn fetch_profiles(&self, session: &Session)
        -> std::result::Result<Vec<Profile>, RemoteError>;

    async fn fetch_public_attendees(
        &self,
        session: &Session,
    ) -> std::result::Result<Vec<PublicAttendee>, RemoteError>;

    /// Applies every operation or none of them.
    async fn apply_registration_batch(
        &self,
        session: &Session,
        ops: &[RegistrationOp],
    ) -> std::result::Result<(), RemoteError>;

    async fn get_balance(
        &self,
        session: &Session,
        owner: &AccountId,
    ) -> std::result::Result<f64, RemoteError>;
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Exchanges the session's refresh token for a renewed session.
    async fn refresh_credential(&self, session: &Session)
        -> std::result::Result<Session, AuthError>;

    async fn sign_out(&self, session: &Session) -> std::result::Result<(), AuthError>;
}

/// Small key/flag persistence used for per-account markers.
pub trait PreferenceStore: Send + Sync {
    fn read_marker(&self, key: &str) -> impl std::future::Future<Output = Result<bool>> + Send;
    fn write_marker(&self, key: &str) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// A question the engine needs the user to answer before going on.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmPrompt {
    ScheduleConflict {
        slot_title: String,
        profile_name: String,
        conflicting_titles: Vec<String>,
    },
    PriorityNeeds {
        slot_title: String,
        underfilled_titles: Vec<String>,
    },
    DiscardBasket {
        pending_changes: usize,
    },
}

impl ConfirmPrompt {
    pub fn message(&self) -> String {
        match self {
            ConfirmPrompt::ScheduleConflict {
                slot_title,
                profile_name,
                conflicting_titles,
            } => format!(
                "{} is already booked on {} at the same time as {}. Keep this choice?",
                profile_name,
                conflicting_titles.join(", "),
                slot_title
            ),
            ConfirmPrompt::PriorityNeeds {
                slot_title,
                underfilled_titles,
            } => format!(
                "{} already has its minimum headcount while {} still need people on the same time slot. Keep this choice?",
                slot_title,
                underfilled_titles.join(", ")
            ),
            ConfirmPrompt::DiscardBasket { pending_changes } => format!(
                "{} pending change(s) will be lost. Continue?",
                pending_changes
            ),
        }
    }
}

pub trait ConfirmationHandler: Send + Sync {
    fn confirm(&self, prompt: &ConfirmPrompt) -> bool;
}

/// Answers every prompt the same way. Used by the CLI `--yes` flag and tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedAnswer(pub bool);

impl ConfirmationHandler for FixedAnswer {
    fn confirm(&self, prompt: &ConfirmPrompt) -> bool {
        tracing::debug!("Auto-answering {:?} with {}", prompt, self.0);
        self.0
    }
}
