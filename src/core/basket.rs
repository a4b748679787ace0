use crate::core::conflict::{conflicting_bookings, Booking};
use crate::core::roster::RosterSnapshot;
use crate::domain::model::{ProfileId, RegistrationOp, Slot, SlotId, SlotKey, TimeWindow};
use crate::domain::ports::{ConfirmPrompt, ConfirmationHandler};
use crate::utils::error::StageError;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Staged intent to create a registration, with display data captured when
/// it was staged.
#[derive(Debug, Clone, PartialEq)]
pub struct BasketSelection {
    pub key: SlotKey,
    pub slot_title: String,
    pub window: TimeWindow,
    pub profile_name: String,
}

/// Staged intent to delete a committed registration.
#[derive(Debug, Clone, PartialEq)]
pub struct BasketRemoval {
    pub key: SlotKey,
    pub slot_title: String,
    pub window: TimeWindow,
    pub profile_name: String,
}

/// Pending additions and removals. A key lives in at most one of the two maps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Basket {
    selections: BTreeMap<SlotKey, BasketSelection>,
    removals: BTreeMap<SlotKey, BasketRemoval>,
}

impl Basket {
    pub fn is_empty(&self) -> bool {
        self.selections.is_empty() && self.removals.is_empty()
    }

    pub fn len(&self) -> usize {
        self.selections.len() + self.removals.len()
    }

    pub fn selections(&self) -> impl Iterator<Item = &BasketSelection> {
        self.selections.values()
    }

    pub fn removals(&self) -> impl Iterator<Item = &BasketRemoval> {
        self.removals.values()
    }

    pub fn has_selection(&self, key: &SlotKey) -> bool {
        self.selections.contains_key(key)
    }

    pub fn has_removal(&self, key: &SlotKey) -> bool {
        self.removals.contains_key(key)
    }

    /// Net headcount change this basket applies to a slot.
    pub fn delta_for(&self, slot_id: &SlotId) -> i64 {
        let added = self.selections.keys().filter(|k| &k.slot_id == slot_id).count() as i64;
        let removed = self.removals.keys().filter(|k| &k.slot_id == slot_id).count() as i64;
        added - removed
    }

    /// One `remove` per removal and one `add` per selection, unordered.
    pub fn operations(&self) -> Vec<RegistrationOp> {
        self.removals
            .keys()
            .map(RegistrationOp::remove)
            .chain(self.selections.keys().map(RegistrationOp::add))
            .collect()
    }

    fn clear(&mut self) {
        self.selections.clear();
        self.removals.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// A new selection was added.
    Staged,
    /// A pending removal was cancelled; the committed registration stays.
    RemovalUndone,
    /// A pending selection was dropped; nothing had been committed.
    Unstaged,
    /// A committed registration is now marked for removal.
    RemovalStaged,
    /// Nothing to do: already staged or already committed.
    Unchanged,
    /// The user declined a confirmation; nothing changed.
    Declined,
}

/// Owns the basket. Every edit is synchronous and validated against the
/// roster snapshot passed in, so the projection is consistent after each call.
pub struct BasketEngine {
    basket: Basket,
    confirmer: Arc<dyn ConfirmationHandler>,
}

impl BasketEngine {
    pub fn new(confirmer: Arc<dyn ConfirmationHandler>) -> Self {
        Self {
            basket: Basket::default(),
            confirmer,
        }
    }

    pub fn basket(&self) -> &Basket {
        &self.basket
    }

    pub fn is_empty(&self) -> bool {
        self.basket.is_empty()
    }

    pub fn stage_add(
        &mut self,
        roster: &RosterSnapshot,
        slot_id: &SlotId,
        profile_id: &ProfileId,
    ) -> Result<StageOutcome, StageError> {
        let key = SlotKey::new(slot_id.clone(), profile_id.clone());
        if self.basket.has_selection(&key) {
            return Ok(StageOutcome::Unchanged);
        }

        let slot = roster
            .slot(slot_id)
            .ok_or_else(|| StageError::UnknownSlot(slot_id.clone()))?;
        let profile_name = roster
            .profile(profile_id)
            .map(|p| p.display_name().to_string())
            .ok_or_else(|| StageError::UnknownProfile(profile_id.clone()))?;

        if self.basket.has_removal(&key) {
            // Restoring a committed seat: capacity was never released to anyone else.
            self.confirm_no_conflict(roster, slot, &key, &profile_name)?;
            self.basket.removals.remove(&key);
            tracing::debug!("Undid staged removal {}", key);
            return Ok(StageOutcome::RemovalUndone);
        }

        if roster.is_registered(&key) {
            return Ok(StageOutcome::Unchanged);
        }

        let filled = self.projected_filled(slot);
        if filled >= slot.max_allowed {
            return Err(StageError::SlotFull {
                slot_id: slot.id.clone(),
                title: slot.title.clone(),
                filled,
                max: slot.max_allowed,
            });
        }

        self.confirm_no_conflict(roster, slot, &key, &profile_name)?;

        if filled >= slot.min_required {
            let underfilled = self.underfilled_siblings(roster, slot);
            if !underfilled.is_empty() {
                let prompt = ConfirmPrompt::PriorityNeeds {
                    slot_title: slot.title.clone(),
                    underfilled_titles: underfilled,
                };
                if !self.confirmer.confirm(&prompt) {
                    tracing::debug!("Priority warning declined for {}", key);
                    return Ok(StageOutcome::Declined);
                }
            }
        }

        self.basket.selections.insert(
            key.clone(),
            BasketSelection {
                key: key.clone(),
                slot_title: slot.title.clone(),
                window: slot.window(),
                profile_name,
            },
        );
        tracing::debug!("Staged {} ({} -> {})", key, filled, filled + 1);
        Ok(StageOutcome::Staged)
    }

    pub fn stage_remove(
        &mut self,
        roster: &RosterSnapshot,
        slot_id: &SlotId,
        profile_id: &ProfileId,
    ) -> Result<StageOutcome, StageError> {
        let key = SlotKey::new(slot_id.clone(), profile_id.clone());
        if self.basket.selections.remove(&key).is_some() {
            tracing::debug!("Dropped staged selection {}", key);
            return Ok(StageOutcome::Unstaged);
        }
        if self.basket.has_removal(&key) {
            return Ok(StageOutcome::Unchanged);
        }
        if !roster.is_registered(&key) {
            return Err(StageError::NotRegistered(key));
        }

        let slot = roster
            .slot(slot_id)
            .ok_or_else(|| StageError::UnknownSlot(slot_id.clone()))?;
        let profile_name = roster
            .profile(profile_id)
            .map(|p| p.display_name().to_string())
            .unwrap_or_else(|| profile_id.to_string());

        self.basket.removals.insert(
            key.clone(),
            BasketRemoval {
                key: key.clone(),
                slot_title: slot.title.clone(),
                window: slot.window(),
                profile_name,
            },
        );
        tracing::debug!("Staged removal {}", key);
        Ok(StageOutcome::RemovalStaged)
    }

    /// Discards every staged change. The projection reverts exactly because
    /// it is always derived from the basket.
    pub fn reset(&mut self) {
        if !self.basket.is_empty() {
            tracing::debug!("Discarding {} staged change(s)", self.basket.len());
        }
        self.basket.clear();
    }

    /// Asks before throwing away a non-empty basket. Returns whether the
    /// basket may be closed.
    pub fn close(&mut self) -> bool {
        if self.basket.is_empty() {
            return true;
        }
        let prompt = ConfirmPrompt::DiscardBasket {
            pending_changes: self.basket.len(),
        };
        if !self.confirmer.confirm(&prompt) {
            return false;
        }
        self.reset();
        true
    }

    /// Read-only hint: would staging this pair overlap another booking of the profile?
    pub fn would_conflict(
        &self,
        roster: &RosterSnapshot,
        slot_id: &SlotId,
        profile_id: &ProfileId,
    ) -> bool {
        roster
            .slot(slot_id)
            .map(|slot| {
                let bookings = self.bookings_for(roster, profile_id);
                !conflicting_bookings(slot_id, &slot.window(), profile_id, &bookings).is_empty()
            })
            .unwrap_or(false)
    }

    /// Removes the entries of a batch that was committed.
    pub(crate) fn discard_submitted(&mut self, ops: &[RegistrationOp]) {
        let keys: HashSet<SlotKey> = ops.iter().map(RegistrationOp::key).collect();
        self.basket.selections.retain(|key, _| !keys.contains(key));
        self.basket.removals.retain(|key, _| !keys.contains(key));
    }

    fn projected_filled(&self, slot: &Slot) -> u32 {
        (i64::from(slot.filled) + self.basket.delta_for(&slot.id)).max(0) as u32
    }

    /// Committed bookings not staged for removal, plus staged selections.
    fn bookings_for(&self, roster: &RosterSnapshot, profile_id: &ProfileId) -> Vec<Booking> {
        let committed = roster
            .registrations()
            .iter()
            .filter(|r| &r.profile_id == profile_id)
            .filter(|r| !self.basket.has_removal(&r.key()))
            .filter_map(|r| {
                roster.slot(&r.slot_id).map(|slot| Booking {
                    slot_id: slot.id.clone(),
                    profile_id: r.profile_id.clone(),
                    window: slot.window(),
                })
            });
        let staged = self
            .basket
            .selections()
            .filter(|s| &s.key.profile_id == profile_id)
            .map(|s| Booking {
                slot_id: s.key.slot_id.clone(),
                profile_id: s.key.profile_id.clone(),
                window: s.window,
            });
        committed.chain(staged).collect()
    }

    fn confirm_no_conflict(
        &self,
        roster: &RosterSnapshot,
        slot: &Slot,
        key: &SlotKey,
        profile_name: &str,
    ) -> Result<(), StageError> {
        let bookings = self.bookings_for(roster, &key.profile_id);
        let hits = conflicting_bookings(&slot.id, &slot.window(), &key.profile_id, &bookings);
        if hits.is_empty() {
            return Ok(());
        }

        let conflicting_titles: Vec<String> = hits
            .iter()
            .map(|b| {
                roster
                    .slot(&b.slot_id)
                    .map(|s| s.title.clone())
                    .unwrap_or_else(|| b.slot_id.to_string())
            })
            .collect();
        let prompt = ConfirmPrompt::ScheduleConflict {
            slot_title: slot.title.clone(),
            profile_name: profile_name.to_string(),
            conflicting_titles: conflicting_titles.clone(),
        };
        if self.confirmer.confirm(&prompt) {
            tracing::info!("⚠️ Schedule conflict accepted for {}", key);
            return Ok(());
        }

        Err(StageError::Conflict {
            key: key.clone(),
            title: slot.title.clone(),
            profile_name: profile_name.to_string(),
            conflicting_titles,
        })
    }

    /// Slots on exactly the same window that are still below their minimum.
    fn underfilled_siblings(&self, roster: &RosterSnapshot, slot: &Slot) -> Vec<String> {
        roster
            .slots()
            .iter()
            .filter(|other| other.id != slot.id)
            .filter(|other| other.window() == slot.window())
            .filter(|other| self.projected_filled(other) < other.min_required)
            .map(|other| other.title.clone())
            .collect()
    }
}
