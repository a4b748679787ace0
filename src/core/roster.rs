use crate::core::basket::Basket;
use crate::domain::model::{
    Profile, ProfileId, PublicAttendee, Registration, Session, Slot, SlotId, SlotKey,
};
use crate::domain::ports::DataService;
use crate::utils::error::RemoteError;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Last known roster, with `filled` counters already reconciled.
#[derive(Debug, Clone, Default)]
pub struct RosterSnapshot {
    server_slots: Vec<Slot>,
    slots: Vec<Slot>,
    registrations: Vec<Registration>,
    profiles: Vec<Profile>,
    attendees: Vec<PublicAttendee>,
    refreshed_at: Option<DateTime<Utc>>,
}

impl RosterSnapshot {
    pub fn new(slots: Vec<Slot>, registrations: Vec<Registration>, profiles: Vec<Profile>) -> Self {
        let mut snapshot = Self {
            server_slots: slots,
            registrations,
            profiles,
            ..Self::default()
        };
        snapshot.reconcile();
        snapshot
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn slot(&self, id: &SlotId) -> Option<&Slot> {
        self.slots.iter().find(|slot| &slot.id == id)
    }

    pub fn registrations(&self) -> &[Registration] {
        &self.registrations
    }

    pub fn profiles(&self) -> &[Profile] {
        &self.profiles
    }

    pub fn profile(&self, id: &ProfileId) -> Option<&Profile> {
        self.profiles.iter().find(|profile| &profile.id == id)
    }

    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }

    pub fn attendees_for(&self, slot_id: &SlotId) -> Vec<&str> {
        self.attendees
            .iter()
            .filter(|attendee| &attendee.slot_id == slot_id)
            .map(|attendee| attendee.name.as_str())
            .collect()
    }

    pub fn is_registered(&self, key: &SlotKey) -> bool {
        self.registrations
            .iter()
            .any(|r| r.slot_id == key.slot_id && r.profile_id == key.profile_id)
    }

    /// True when at least one committed registration points at a profile
    /// that still exists. Registrations left behind by a deleted profile do
    /// not count.
    pub fn has_live_registrations(&self) -> bool {
        self.registrations
            .iter()
            .any(|r| self.profiles.iter().any(|p| p.id == r.profile_id))
    }

    /// Distinct period labels, ordered by their ordering key.
    pub fn periods(&self) -> Vec<String> {
        let mut seen: Vec<(i32, String)> = Vec::new();
        for slot in &self.slots {
            if !seen.iter().any(|(_, name)| name == &slot.period) {
                seen.push((slot.period_order, slot.period.clone()));
            }
        }
        seen.sort_by_key(|(order, _)| *order);
        seen.into_iter().map(|(_, name)| name).collect()
    }

    /// Recomputes `filled` from the raw server counters.
    pub fn reconcile(&mut self) {
        self.slots = reconcile_slots(&self.server_slots, &self.registrations);
    }

    /// Optimistic view of the roster with the basket applied. The snapshot
    /// itself is left untouched.
    pub fn apply_basket_overlay(&self, basket: &Basket) -> ProjectedSlots {
        let removed: HashSet<SlotKey> = basket.removals().map(|r| r.key.clone()).collect();
        let mut mine: HashSet<&SlotId> = self
            .registrations
            .iter()
            .filter(|r| !removed.contains(&r.key()))
            .map(|r| &r.slot_id)
            .collect();
        mine.extend(basket.selections().map(|s| &s.key.slot_id));

        let slots = self
            .slots
            .iter()
            .map(|slot| {
                let delta = basket.delta_for(&slot.id);
                let mut projected = slot.clone();
                projected.filled = (i64::from(slot.filled) + delta).max(0) as u32;
                ProjectedSlot {
                    committed_filled: slot.filled,
                    staged_delta: delta,
                    mine: mine.contains(&slot.id),
                    slot: projected,
                }
            })
            .collect();

        ProjectedSlots { slots }
    }
}

/// Repairs read-replica lag: a slot never shows fewer people than the
/// registrations this account already knows are committed.
pub fn reconcile_slots(server_slots: &[Slot], registrations: &[Registration]) -> Vec<Slot> {
    let mut known: HashMap<&SlotId, HashSet<&ProfileId>> = HashMap::new();
    for registration in registrations {
        known
            .entry(&registration.slot_id)
            .or_default()
            .insert(&registration.profile_id);
    }

    server_slots
        .iter()
        .map(|slot| {
            let mut slot = slot.clone();
            let mine = known.get(&slot.id).map(|set| set.len()).unwrap_or(0) as u32;
            slot.filled = slot.filled.max(mine);
            slot
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedSlot {
    /// Slot with `filled` replaced by the projected count.
    pub slot: Slot,
    pub committed_filled: u32,
    pub staged_delta: i64,
    /// One of my profiles holds (or will hold) this slot.
    pub mine: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    /// Below the minimum headcount.
    Critical,
    Open,
    Full,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlotGroup {
    pub kind: GroupKind,
    pub slots: Vec<ProjectedSlot>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotFilter {
    /// Hide full slots none of my profiles is on.
    pub only_available: bool,
    pub only_mine: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectedSlots {
    slots: Vec<ProjectedSlot>,
}

impl ProjectedSlots {
    pub fn iter(&self) -> impl Iterator<Item = &ProjectedSlot> {
        self.slots.iter()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, id: &SlotId) -> Option<&ProjectedSlot> {
        self.slots.iter().find(|p| &p.slot.id == id)
    }

    pub fn filled(&self, id: &SlotId) -> Option<u32> {
        self.get(id).map(|p| p.slot.filled)
    }

    pub fn filtered(&self, filter: SlotFilter) -> Vec<&ProjectedSlot> {
        self.slots
            .iter()
            .filter(|p| !(filter.only_available && p.slot.is_full() && !p.mine))
            .filter(|p| !filter.only_mine || p.mine)
            .collect()
    }

    /// Slots of one period split into critical / open / full, each sorted by
    /// start time. Empty groups are omitted.
    pub fn groups_for_period(&self, period: &str) -> Vec<SlotGroup> {
        let mut groups: Vec<SlotGroup> = [GroupKind::Critical, GroupKind::Open, GroupKind::Full]
            .into_iter()
            .map(|kind| SlotGroup {
                kind,
                slots: Vec::new(),
            })
            .collect();

        for projected in self.slots.iter().filter(|p| p.slot.period == period) {
            let index = if projected.slot.is_below_minimum() {
                0
            } else if projected.slot.is_full() {
                2
            } else {
                1
            };
            groups[index].slots.push(projected.clone());
        }

        for group in &mut groups {
            group.slots.sort_by_key(|p| p.slot.start);
        }
        groups.retain(|group| !group.slots.is_empty());
        groups
    }
}

/// Owner of the roster snapshot. Loads never hold the lock across a network
/// call, and results fetched before a [`RosterView::clear`] are dropped.
pub struct RosterView {
    service: Arc<dyn DataService>,
    state: RwLock<RosterSnapshot>,
    epoch: AtomicU64,
}

impl RosterView {
    pub fn new(service: Arc<dyn DataService>) -> Self {
        Self {
            service,
            state: RwLock::new(RosterSnapshot::default()),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn read<R>(&self, f: impl FnOnce(&RosterSnapshot) -> R) -> R {
        let guard = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub fn snapshot(&self) -> RosterSnapshot {
        self.read(Clone::clone)
    }

    pub fn apply_basket_overlay(&self, basket: &Basket) -> ProjectedSlots {
        self.read(|snapshot| snapshot.apply_basket_overlay(basket))
    }

    pub fn reconcile(&self) {
        self.write_if_current(self.epoch.load(Ordering::SeqCst), RosterSnapshot::reconcile);
    }

    pub async fn load_slots(&self, session: &Session) -> Result<usize, RemoteError> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let mut slots = self.service.fetch_slots(session).await?;
        sort_slots(&mut slots);
        let count = slots.len();
        let applied = self.write_if_current(epoch, move |snapshot| {
            snapshot.server_slots = slots;
            snapshot.refreshed_at = Some(Utc::now());
            snapshot.reconcile();
        });
        tracing::debug!("Loaded {} slots (applied: {})", count, applied);
        Ok(if applied { count } else { 0 })
    }

    pub async fn load_my_registrations(&self, session: &Session) -> Result<usize, RemoteError> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let registrations = self.service.fetch_my_registrations(session).await?;
        let count = registrations.len();
        let applied = self.write_if_current(epoch, move |snapshot| {
            snapshot.registrations = registrations;
            snapshot.reconcile();
        });
        tracing::debug!("Loaded {} registrations (applied: {})", count, applied);
        Ok(if applied { count } else { 0 })
    }

    pub async fn load_profiles(&self, session: &Session) -> Result<usize, RemoteError> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let profiles = self.service.fetch_profiles(session).await?;
        let count = profiles.len();
        let applied = self.write_if_current(epoch, move |snapshot| snapshot.profiles = profiles);
        Ok(if applied { count } else { 0 })
    }

    /// Names on the public roster are decoration: failures are logged and
    /// the previous list is kept.
    pub async fn load_public_attendees(&self, session: &Session) -> usize {
        let epoch = self.epoch.load(Ordering::SeqCst);
        match self.service.fetch_public_attendees(session).await {
            Ok(attendees) => {
                let count = attendees.len();
                self.write_if_current(epoch, move |snapshot| snapshot.attendees = attendees);
                count
            }
            Err(e) => {
                tracing::warn!("Could not load public attendees: {}", e);
                0
            }
        }
    }

    /// Fetches slots, registrations and profiles concurrently and swaps them
    /// in as one consistent snapshot.
    pub async fn reload(&self, session: &Session) -> Result<(), RemoteError> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let (mut slots, registrations, profiles) = tokio::try_join!(
            self.service.fetch_slots(session),
            self.service.fetch_my_registrations(session),
            self.service.fetch_profiles(session),
        )?;
        sort_slots(&mut slots);

        let summary = (slots.len(), registrations.len(), profiles.len());
        let applied = self.write_if_current(epoch, move |snapshot| {
            snapshot.server_slots = slots;
            snapshot.registrations = registrations;
            snapshot.profiles = profiles;
            snapshot.refreshed_at = Some(Utc::now());
            snapshot.reconcile();
        });

        if applied {
            tracing::info!(
                "🔄 Roster refreshed: {} slots, {} registrations, {} profiles",
                summary.0,
                summary.1,
                summary.2
            );
        } else {
            tracing::debug!("Discarding roster fetched before teardown");
        }
        Ok(())
    }

    /// Drops everything and invalidates loads that are still in flight.
    pub fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        *guard = RosterSnapshot::default();
    }

    fn write_if_current(&self, epoch: u64, f: impl FnOnce(&mut RosterSnapshot)) -> bool {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return false;
        }
        f(&mut guard);
        true
    }
}

fn sort_slots(slots: &mut [Slot]) {
    slots.sort_by(|a, b| {
        (a.period_order, a.start, &a.title).cmp(&(b.period_order, b.start, &b.title))
    });
}
