use crate::domain::model::{ProfileId, SlotId, SlotKey};
use thiserror::Error;

/// Local rejection of a basket edit. Never reaches the network.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    #[error("Slot '{title}' is full ({filled}/{max})")]
    SlotFull {
        slot_id: SlotId,
        title: String,
        filled: u32,
        max: u32,
    },

    #[error("Schedule conflict for '{profile_name}' on '{title}' (overlaps: {})", conflicting_titles.join(", "))]
    Conflict {
        key: SlotKey,
        title: String,
        profile_name: String,
        conflicting_titles: Vec<String>,
    },

    #[error("Unknown slot: {0}")]
    UnknownSlot(SlotId),

    #[error("Unknown profile: {0}")]
    UnknownProfile(ProfileId),

    #[error("No committed registration for {0}")]
    NotRegistered(SlotKey),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("No session available")]
    NoSession,

    #[error("Credential refresh rejected: {message}")]
    Rejected { message: String },

    #[error("Credential refresh timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Identity provider unreachable: {message}")]
    Transport { message: String },

    #[error("Session was closed while the refresh was in flight")]
    SessionClosed,
}

/// Failure reported by the remote data service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Remote call failed{}: {message}", status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default())]
pub struct RemoteError {
    pub status: Option<u16>,
    pub code: Option<String>,
    pub message: String,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// No response was received at all (connect error, timeout).
    pub fn is_transport(&self) -> bool {
        self.status.is_none() && self.code.is_none()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("Session expired: {0}")]
    SessionExpired(AuthError),

    #[error("A slot filled up since it was staged: {message}")]
    SlotNowFull { message: String },

    #[error("Schedule conflict detected by the server: {message}")]
    ScheduleConflict { message: String },

    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("Submission failed: {message}")]
    Unknown { message: String },
}

impl SubmitError {
    /// Maps a remote failure onto the user-facing categories.
    pub fn from_remote(error: &RemoteError) -> Self {
        let message = error.message.clone();
        let lowered = message.to_lowercase();
        let code = error.code.as_deref().unwrap_or_default();

        if error.is_transport() {
            return SubmitError::Unknown { message };
        }
        if matches!(error.status, Some(401) | Some(403))
            || code == "42501"
            || lowered.contains("permission")
        {
            return SubmitError::PermissionDenied { message };
        }
        if lowered.contains("complet")
            || lowered.contains("is full")
            || lowered.contains("capacity")
        {
            return SubmitError::SlotNowFull { message };
        }
        if lowered.contains("conflit horaire")
            || lowered.contains("conflict")
            || lowered.contains("overlap")
        {
            return SubmitError::ScheduleConflict { message };
        }
        SubmitError::Unknown { message }
    }

    /// Errors after which the local projection is known to be stale.
    pub fn requires_reload(&self) -> bool {
        matches!(
            self,
            SubmitError::SlotNowFull { .. } | SubmitError::ScheduleConflict { .. }
        )
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            SubmitError::SessionExpired(_) => "Your session expired. Please sign in again.",
            SubmitError::SlotNowFull { .. } => "Some posts are now full.",
            SubmitError::ScheduleConflict { .. } => "A schedule conflict was detected.",
            SubmitError::PermissionDenied { .. } => "You cannot modify these registrations.",
            SubmitError::Unknown { .. } => "The server took too long to answer. Please retry.",
        }
    }
}

#[derive(Error, Debug)]
pub enum SignupError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration field: {field}")]
    MissingConfigError { field: String },

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Submit(#[from] SubmitError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Validation,
    Conflict,
    Session,
    Remote,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl SignupError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SignupError::ConfigError { .. }
            | SignupError::InvalidConfigValueError { .. }
            | SignupError::MissingConfigError { .. }
            | SignupError::ConfigValidationError { .. } => ErrorCategory::Configuration,
            SignupError::Stage(StageError::Conflict { .. }) => ErrorCategory::Conflict,
            SignupError::Stage(_) => ErrorCategory::Validation,
            SignupError::Auth(_) | SignupError::Submit(SubmitError::SessionExpired(_)) => {
                ErrorCategory::Session
            }
            SignupError::Submit(SubmitError::ScheduleConflict { .. }) => ErrorCategory::Conflict,
            SignupError::HttpError(_) | SignupError::Remote(_) | SignupError::Submit(_) => {
                ErrorCategory::Remote
            }
            SignupError::IoError(_) | SignupError::SerializationError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Validation | ErrorCategory::Conflict => ErrorSeverity::Low,
            ErrorCategory::Remote => ErrorSeverity::Medium,
            ErrorCategory::Configuration | ErrorCategory::Session => ErrorSeverity::High,
            ErrorCategory::System => ErrorSeverity::Critical,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Configuration => "Check the configuration file and environment variables",
            ErrorCategory::Validation => "Pick another post or remove a pending choice first",
            ErrorCategory::Conflict => "Adjust the schedule so bookings of one person do not overlap",
            ErrorCategory::Session => "Sign in again to obtain a fresh session",
            ErrorCategory::Remote => "Reload the roster and retry",
            ErrorCategory::System => "Check disk permissions and available space",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            SignupError::Submit(error) => error.user_message().to_string(),
            SignupError::Stage(error) => error.to_string(),
            SignupError::Auth(_) => "Your session is no longer valid.".to_string(),
            other => format!("{}", other),
        }
    }
}

pub type Result<T> = std::result::Result<T, SignupError>;
