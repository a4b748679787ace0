pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

pub use adapters::{HttpBackend, LocalStore};
#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use config::SignupConfig;

pub use core::app_state::{AppState, EngineSettings, StartupReport};
pub use core::basket::{Basket, BasketEngine, StageOutcome};
pub use core::polling::{PollerSignal, PollerState, PollingScheduler, TickOutcome};
pub use core::roster::{GroupKind, ProjectedSlots, RosterSnapshot, RosterView, SlotFilter};
pub use core::session_guard::{RefreshPolicy, SessionEvent, SessionGuard};
pub use core::submitter::{SubmitReport, TransactionSubmitter};
pub use utils::error::{Result, SignupError};
