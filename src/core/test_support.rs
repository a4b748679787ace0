use crate::domain::model::{
    Account, AccountId, BatchAction, Profile, ProfileId, PublicAttendee, Registration,
    RegistrationOp, Session, Slot, SlotId,
};
use crate::domain::ports::{DataService, IdentityProvider, PreferenceStore};
use crate::utils::error::{AuthError, RemoteError, Result as SignupResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

pub fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 14, hour, 0, 0).unwrap()
}

pub fn slot(id: &str, start: u32, end: u32, min: u32, max: u32, filled: u32) -> Slot {
    Slot {
        id: SlotId::from(id),
        title: format!("Post {}", id),
        period: "Saturday".to_string(),
        period_order: 1,
        start: at(start),
        end: at(end),
        min_required: min,
        max_allowed: max,
        filled,
        supervisor: None,
    }
}

pub fn profile(id: &str, name: &str) -> Profile {
    Profile {
        id: ProfileId::from(id),
        first_name: name.to_string(),
        last_name: "Martin".to_string(),
        phone: None,
        tshirt_size: Some("M".to_string()),
        meal_friday: false,
        meal_saturday: true,
    }
}

pub fn registration(slot_id: &str, profile_id: &str) -> Registration {
    Registration {
        slot_id: SlotId::from(slot_id),
        profile_id: ProfileId::from(profile_id),
    }
}

pub fn session_for(account: &str, generation: usize) -> Session {
    Session {
        access_token: format!("access-{}", generation),
        refresh_token: format!("refresh-{}", generation),
        expires_at: Utc::now() + ChronoDuration::hours(1),
        account: Account {
            id: AccountId::from(account),
            email: Some(format!("{}@example.org", account)),
        },
    }
}

#[derive(Default)]
struct MockState {
    slots: Vec<Slot>,
    registrations: Vec<Registration>,
    profiles: Vec<Profile>,
    attendees_fail: bool,
    batches: Vec<Vec<RegistrationOp>>,
    batch_error: Option<RemoteError>,
    refresh_calls: usize,
    refresh_outcomes: VecDeque<Result<(), AuthError>>,
    refresh_delay: Option<Duration>,
    sign_out_calls: usize,
    slot_fetches: usize,
    fetch_gate: Option<Arc<Notify>>,
}

/// In-memory data service and identity provider that behaves like the
/// remote side: batches are applied atomically to its own roster.
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn session(&self) -> Session {
        session_for("acc-1", 0)
    }

    pub fn set_slots(&self, slots: Vec<Slot>) {
        self.with_state(|s| s.slots = slots);
    }

    pub fn set_registrations(&self, registrations: Vec<Registration>) {
        self.with_state(|s| s.registrations = registrations);
    }

    pub fn set_profiles(&self, profiles: Vec<Profile>) {
        self.with_state(|s| s.profiles = profiles);
    }

    pub fn fail_attendees(&self) {
        self.with_state(|s| s.attendees_fail = true);
    }

    pub fn fail_batches_with(&self, error: RemoteError) {
        self.with_state(|s| s.batch_error = Some(error));
    }

    pub fn queue_refresh_outcomes(&self, outcomes: Vec<Result<(), AuthError>>) {
        self.with_state(|s| s.refresh_outcomes.extend(outcomes));
    }

    pub fn delay_refresh(&self, delay: Duration) {
        self.with_state(|s| s.refresh_delay = Some(delay));
    }

    /// Blocks data fetches until the returned gate is notified.
    pub fn hold_fetches(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.with_state(|s| s.fetch_gate = Some(Arc::clone(&gate)));
        gate
    }

    pub fn batches(&self) -> Vec<Vec<RegistrationOp>> {
        self.with_state(|s| s.batches.clone())
    }

    pub fn refresh_calls(&self) -> usize {
        self.with_state(|s| s.refresh_calls)
    }

    pub fn sign_out_calls(&self) -> usize {
        self.with_state(|s| s.sign_out_calls)
    }

    pub fn slot_fetches(&self) -> usize {
        self.with_state(|s| s.slot_fetches)
    }

    async fn wait_gate(&self) {
        let gate = self.with_state(|s| s.fetch_gate.clone());
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }
}

#[async_trait]
impl DataService for MockBackend {
    async fn fetch_slots(&self, _session: &Session) -> Result<Vec<Slot>, RemoteError> {
        self.wait_gate().await;
        Ok(self.with_state(|s| {
            s.slot_fetches += 1;
            s.slots.clone()
        }))
    }

    async fn fetch_my_registrations(
        &self,
        _session: &Session,
    ) -> Result<Vec<Registration>, RemoteError> {
        self.wait_gate().await;
        Ok(self.with_state(|s| s.registrations.clone()))
    }

    async fn fetch_profiles(&self, _session: &Session) -> Result<Vec<Profile>, RemoteError> {
        self.wait_gate().await;
        Ok(self.with_state(|s| s.profiles.clone()))
    }

    async fn fetch_public_attendees(
        &self,
        _session: &Session,
    ) -> Result<Vec<PublicAttendee>, RemoteError> {
        if self.with_state(|s| s.attendees_fail) {
            return Err(RemoteError::new("rpc unavailable").with_status(503));
        }
        Ok(Vec::new())
    }

    async fn apply_registration_batch(
        &self,
        _session: &Session,
        ops: &[RegistrationOp],
    ) -> Result<(), RemoteError> {
        self.with_state(|s| {
            s.batches.push(ops.to_vec());
            if let Some(error) = s.batch_error.clone() {
                return Err(error);
            }
            // Applied in order on a copy; any capacity breach rejects the whole batch.
            let mut slots = s.slots.clone();
            let mut registrations = s.registrations.clone();
            for op in ops {
                let slot = slots.iter_mut().find(|slot| slot.id == op.slot_id);
                match op.action {
                    BatchAction::Add => {
                        if let Some(slot) = slot {
                            if slot.filled >= slot.max_allowed {
                                return Err(RemoteError::new(format!(
                                    "Le poste {} est complet",
                                    slot.title
                                ))
                                .with_status(400));
                            }
                            slot.filled += 1;
                        }
                        registrations.push(Registration {
                            slot_id: op.slot_id.clone(),
                            profile_id: op.profile_id.clone(),
                        });
                    }
                    BatchAction::Remove => {
                        if let Some(slot) = slot {
                            slot.filled = slot.filled.saturating_sub(1);
                        }
                        registrations.retain(|r| {
                            !(r.slot_id == op.slot_id && r.profile_id == op.profile_id)
                        });
                    }
                }
            }
            s.slots = slots;
            s.registrations = registrations;
            Ok(())
        })
    }

    async fn get_balance(&self, _session: &Session, _owner: &AccountId) -> Result<f64, RemoteError> {
        Ok(12.5)
    }
}

#[async_trait]
impl IdentityProvider for MockBackend {
    async fn refresh_credential(&self, session: &Session) -> Result<Session, AuthError> {
        let (generation, delay, outcome) = self.with_state(|s| {
            s.refresh_calls += 1;
            (
                s.refresh_calls,
                s.refresh_delay,
                s.refresh_outcomes.pop_front().unwrap_or(Ok(())),
            )
        });
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        outcome.map(|()| session_for(session.account.id.as_str(), generation))
    }

    async fn sign_out(&self, _session: &Session) -> Result<(), AuthError> {
        self.with_state(|s| s.sign_out_calls += 1);
        Ok(())
    }
}

/// Marker store kept in memory.
#[derive(Default, Clone)]
pub struct MemoryStore {
    markers: Arc<Mutex<HashSet<String>>>,
}

impl MemoryStore {
    pub fn contains(&self, key: &str) -> bool {
        self.markers.lock().unwrap().contains(key)
    }
}

impl PreferenceStore for MemoryStore {
    async fn read_marker(&self, key: &str) -> SignupResult<bool> {
        Ok(self.contains(key))
    }

    async fn write_marker(&self, key: &str) -> SignupResult<()> {
        self.markers.lock().unwrap().insert(key.to_string());
        Ok(())
    }
}
