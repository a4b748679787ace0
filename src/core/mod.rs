pub mod app_state;
pub mod basket;
pub mod conflict;
pub mod polling;
pub mod roster;
pub mod session_guard;
pub mod submitter;

#[cfg(test)]
pub(crate) mod test_support;

pub use crate::domain::model::{Profile, Registration, RegistrationOp, Session, Slot, SlotKey};
pub use crate::domain::ports::{
    ConfirmationHandler, DataService, IdentityProvider, PreferenceStore,
};
pub use crate::utils::error::Result;
