#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use signup_basket::domain::model::{
    Account, AccountId, BatchAction, Profile, ProfileId, PublicAttendee, Registration,
    RegistrationOp, Session, Slot, SlotId,
};
use signup_basket::domain::ports::{
    ConfirmPrompt, ConfirmationHandler, DataService, IdentityProvider, PreferenceStore,
};
use signup_basket::utils::error::{AuthError, RemoteError};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 14, hour, 0, 0).unwrap()
}

pub fn slot(id: &str, start: u32, end: u32, min: u32, max: u32, filled: u32) -> Slot {
    Slot {
        id: SlotId::from(id),
        title: format!("Poste {}", id),
        period: "Samedi".to_string(),
        period_order: 2,
        start: at(start),
        end: at(end),
        min_required: min,
        max_allowed: max,
        filled,
        supervisor: None,
    }
}

pub fn profile(id: &str, first_name: &str) -> Profile {
    Profile {
        id: ProfileId::from(id),
        first_name: first_name.to_string(),
        last_name: "Durand".to_string(),
        phone: None,
        tshirt_size: None,
        meal_friday: false,
        meal_saturday: false,
    }
}

pub fn session() -> Session {
    Session {
        access_token: "access-0".to_string(),
        refresh_token: "refresh-0".to_string(),
        expires_at: Utc::now() + ChronoDuration::hours(1),
        account: Account {
            id: AccountId::from("family-1"),
            email: Some("family@example.org".to_string()),
        },
    }
}

/// Remote side kept in memory for the end-to-end flows: batches are applied
/// atomically, in order, with the server's capacity check. The crate's own
/// `core::test_support` mock is `cfg(test)` only and not visible here.
#[derive(Default)]
pub struct InMemoryBackend {
    slots: Mutex<Vec<Slot>>,
    registrations: Mutex<Vec<Registration>>,
    profiles: Mutex<Vec<Profile>>,
    batches: Mutex<Vec<Vec<RegistrationOp>>>,
    refresh_calls: AtomicUsize,
    reject_refresh: AtomicBool,
}

impl InMemoryBackend {
    pub fn new(slots: Vec<Slot>, registrations: Vec<(&str, &str)>, profiles: Vec<Profile>) -> Arc<Self> {
        let backend = Self::default();
        *backend.slots.lock().unwrap() = slots;
        *backend.registrations.lock().unwrap() = registrations
            .into_iter()
            .map(|(slot, profile)| Registration {
                slot_id: SlotId::from(slot),
                profile_id: ProfileId::from(profile),
            })
            .collect();
        *backend.profiles.lock().unwrap() = profiles;
        Arc::new(backend)
    }

    pub fn batches(&self) -> Vec<Vec<RegistrationOp>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn reject_refresh(&self) {
        self.reject_refresh.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl DataService for InMemoryBackend {
    async fn fetch_slots(&self, _session: &Session) -> Result<Vec<Slot>, RemoteError> {
        Ok(self.slots.lock().unwrap().clone())
    }

    async fn fetch_my_registrations(&self, _session: &Session) -> Result<Vec<Registration>, RemoteError> {
        Ok(self.registrations.lock().unwrap().clone())
    }

    async fn fetch_profiles(&self, _session: &Session) -> Result<Vec<Profile>, RemoteError> {
        Ok(self.profiles.lock().unwrap().clone())
    }

    async fn fetch_public_attendees(
        &self,
        _session: &Session,
    ) -> Result<Vec<PublicAttendee>, RemoteError> {
        let profiles = self.profiles.lock().unwrap().clone();
        Ok(self
            .registrations
            .lock()
            .unwrap()
            .iter()
            .filter_map(|r| {
                profiles.iter().find(|p| p.id == r.profile_id).map(|p| PublicAttendee {
                    slot_id: r.slot_id.clone(),
                    name: format!("{} {}.", p.first_name, &p.last_name[..1]),
                })
            })
            .collect())
    }

    async fn apply_registration_batch(
        &self,
        _session: &Session,
        ops: &[RegistrationOp],
    ) -> Result<(), RemoteError> {
        self.batches.lock().unwrap().push(ops.to_vec());
        // 依序套用在副本上，任何一筆失敗整批回滾
        let mut slots = self.slots.lock().unwrap().clone();
        let mut registrations = self.registrations.lock().unwrap().clone();
        for op in ops {
            let Some(slot) = slots.iter_mut().find(|s| s.id == op.slot_id) else {
                return Err(RemoteError::new("poste inconnu").with_status(400));
            };
            match op.action {
                BatchAction::Add => {
                    if slot.filled >= slot.max_allowed {
                        return Err(RemoteError::new(format!("Le poste {} est complet", slot.title))
                            .with_status(400));
                    }
                    slot.filled += 1;
                    registrations.push(Registration {
                        slot_id: op.slot_id.clone(),
                        profile_id: op.profile_id.clone(),
                    });
                }
                BatchAction::Remove => {
                    slot.filled = slot.filled.saturating_sub(1);
                    registrations
                        .retain(|r| !(r.slot_id == op.slot_id && r.profile_id == op.profile_id));
                }
            }
        }
        *self.slots.lock().unwrap() = slots;
        *self.registrations.lock().unwrap() = registrations;
        Ok(())
    }

    async fn get_balance(&self, _session: &Session, _owner: &AccountId) -> Result<f64, RemoteError> {
        Ok(0.0)
    }
}

#[async_trait]
impl IdentityProvider for InMemoryBackend {
    async fn refresh_credential(&self, session: &Session) -> Result<Session, AuthError> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.reject_refresh.load(Ordering::SeqCst) {
            return Err(AuthError::Rejected {
                message: "Invalid Refresh Token".to_string(),
            });
        }
        let mut renewed = session.clone();
        renewed.access_token = format!("access-{}", n);
        renewed.refresh_token = format!("refresh-{}", n);
        Ok(renewed)
    }

    async fn sign_out(&self, _session: &Session) -> Result<(), AuthError> {
        Ok(())
    }
}

/// Answers prompts with a fixed value and records what was asked.
pub struct RecordingConfirm {
    answer: bool,
    prompts: Mutex<Vec<ConfirmPrompt>>,
}

impl RecordingConfirm {
    pub fn new(answer: bool) -> Arc<Self> {
        Arc::new(Self {
            answer,
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn prompts(&self) -> Vec<ConfirmPrompt> {
        self.prompts.lock().unwrap().clone()
    }
}

impl ConfirmationHandler for RecordingConfirm {
    fn confirm(&self, prompt: &ConfirmPrompt) -> bool {
        self.prompts.lock().unwrap().push(prompt.clone());
        self.answer
    }
}

#[derive(Default, Clone)]
pub struct MemoryStore {
    markers: Arc<Mutex<HashSet<String>>>,
}

impl PreferenceStore for MemoryStore {
    async fn read_marker(&self, key: &str) -> signup_basket::Result<bool> {
        Ok(self.markers.lock().unwrap().contains(key))
    }

    async fn write_marker(&self, key: &str) -> signup_basket::Result<()> {
        self.markers.lock().unwrap().insert(key.to_string());
        Ok(())
    }
}
