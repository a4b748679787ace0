use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(SlotId);
string_id!(ProfileId);
string_id!(AccountId);

/// Composite identity of a (slot, profile) pairing.
///
/// Ordering is by slot first, then profile, which is the order batches are
/// transmitted in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey {
    pub slot_id: SlotId,
    pub profile_id: ProfileId,
}

impl SlotKey {
    pub fn new(slot_id: SlotId, profile_id: ProfileId) -> Self {
        Self {
            slot_id,
            profile_id,
        }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.slot_id, self.profile_id)
    }
}

/// Half-open booking window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Strict overlap: windows that only touch at an endpoint do not overlap.
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && self.end > other.start
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    #[serde(rename = "prenom")]
    pub first_name: String,
    #[serde(rename = "nom", default)]
    pub last_name: String,
    #[serde(rename = "telephone", default)]
    pub phone: Option<String>,
    #[serde(rename = "taille_tshirt", default)]
    pub tshirt_size: Option<String>,
    #[serde(rename = "repas_vendredi", default)]
    pub meal_friday: bool,
    #[serde(rename = "repas_samedi", default)]
    pub meal_saturday: bool,
}

impl Profile {
    pub fn display_name(&self) -> &str {
        &self.first_name
    }
}

/// A capacity-bounded, time-boxed post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    #[serde(rename = "poste_id")]
    pub id: SlotId,
    #[serde(rename = "titre")]
    pub title: String,
    #[serde(rename = "periode")]
    pub period: String,
    #[serde(rename = "periode_ordre", default)]
    pub period_order: i32,
    #[serde(rename = "periode_debut")]
    pub start: DateTime<Utc>,
    #[serde(rename = "periode_fin")]
    pub end: DateTime<Utc>,
    #[serde(rename = "nb_min", default)]
    pub min_required: u32,
    #[serde(rename = "nb_max", default)]
    pub max_allowed: u32,
    #[serde(rename = "inscrits_actuels", default)]
    pub filled: u32,
    #[serde(rename = "referent_id", default)]
    pub supervisor: Option<ProfileId>,
}

impl Slot {
    pub fn window(&self) -> TimeWindow {
        TimeWindow::new(self.start, self.end)
    }

    pub fn is_full(&self) -> bool {
        self.filled >= self.max_allowed
    }

    pub fn is_below_minimum(&self) -> bool {
        self.filled < self.min_required
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Registration {
    #[serde(rename = "poste_id")]
    pub slot_id: SlotId,
    #[serde(rename = "benevole_id")]
    pub profile_id: ProfileId,
}

impl Registration {
    pub fn key(&self) -> SlotKey {
        SlotKey::new(self.slot_id.clone(), self.profile_id.clone())
    }
}

/// Name shown on the public roster for a slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicAttendee {
    #[serde(rename = "poste_id")]
    pub slot_id: SlotId,
    #[serde(rename = "formatted_name")]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub account: Account,
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

// Tokens stay out of logs.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("account", &self.account)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchAction {
    Remove,
    Add,
}

/// One entry of an atomic registration batch.
///
/// Field order matters: the derived ordering sorts by slot, then action
/// (removals first, so a seat is freed before it is taken again), then profile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegistrationOp {
    #[serde(rename = "poste_id")]
    pub slot_id: SlotId,
    pub action: BatchAction,
    #[serde(rename = "benevole_id")]
    pub profile_id: ProfileId,
}

impl RegistrationOp {
    pub fn add(key: &SlotKey) -> Self {
        Self {
            slot_id: key.slot_id.clone(),
            profile_id: key.profile_id.clone(),
            action: BatchAction::Add,
        }
    }

    pub fn remove(key: &SlotKey) -> Self {
        Self {
            slot_id: key.slot_id.clone(),
            profile_id: key.profile_id.clone(),
            action: BatchAction::Remove,
        }
    }

    pub fn key(&self) -> SlotKey {
        SlotKey::new(self.slot_id.clone(), self.profile_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 14, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_touching_windows_do_not_overlap() {
        let morning = TimeWindow::new(at(9), at(11));
        let noon = TimeWindow::new(at(11), at(13));
        assert!(!morning.overlaps(&noon));
        assert!(!noon.overlaps(&morning));
    }

    #[test]
    fn test_slot_deserializes_from_planning_row() {
        let row = serde_json::json!({
            "poste_id": "p-1",
            "titre": "Buvette",
            "periode": "Samedi matin",
            "periode_ordre": 2,
            "periode_debut": "2025-06-14T09:00:00Z",
            "periode_fin": "2025-06-14T11:00:00Z",
            "nb_min": 2,
            "nb_max": 4,
            "inscrits_actuels": 1
        });

        let slot: Slot = serde_json::from_value(row).unwrap();
        assert_eq!(slot.id, SlotId::from("p-1"));
        assert_eq!(slot.window(), TimeWindow::new(at(9), at(11)));
        assert!(slot.is_below_minimum());
        assert!(!slot.is_full());
        assert_eq!(slot.supervisor, None);
    }

    #[test]
    fn test_registration_op_serializes_lowercase_action() {
        let op = RegistrationOp::remove(&SlotKey::new("s".into(), "p".into()));
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"poste_id": "s", "benevole_id": "p", "action": "remove"})
        );
    }

    #[test]
    fn test_session_debug_hides_tokens() {
        let session = Session {
            access_token: "secret-access".to_string(),
            refresh_token: "secret-refresh".to_string(),
            expires_at: at(12),
            account: Account {
                id: AccountId::from("acc"),
                email: None,
            },
        };
        let rendered = format!("{:?}", session);
        assert!(!rendered.contains("secret"));
        assert!(session.is_expired_at(at(12)));
        assert!(!session.is_expired_at(at(11)));
    }
}
