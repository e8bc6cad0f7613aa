// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared by the scheduler, the relay pipeline, and their collaborators.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Stable identifier of a forwarding pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PairId(pub i64);

impl fmt::Display for PairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Platform-assigned message identifier. Opaque outside the adapter that issued it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<i64> for MessageId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

/// Reference to a chat on one platform (chat id, channel handle, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatRef(pub String);

impl fmt::Display for ChatRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChatRef {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Identifies the kind of plugin adapter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    Platform,
    Storage,
}

// --- Sessions ---

/// Health state of a session as driven by periodic probing.
///
/// `Unauthorized` and `Removed` are terminal: no probe result moves a
/// session out of them. Only an explicit re-authentication leaves
/// `Unauthorized`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Unverified,
    Healthy,
    Degraded,
    Unauthorized,
    Removed,
}

impl HealthState {
    /// Whether probing can no longer change this state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Unauthorized | Self::Removed)
    }

    /// Whether a pair may stay assigned to a session in this state.
    pub fn may_own_pairs(self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }
}

/// Persisted description of one authenticated source-platform identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub name: String,
    pub capacity: u32,
    pub priority: i32,
    pub health: HealthState,
    pub registered_at: DateTime<Utc>,
    pub last_probed_at: Option<DateTime<Utc>>,
}

// --- Pairs ---

/// Scheduling status of a forwarding pair.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PairStatus {
    /// Created but never scheduled.
    Unassigned,
    /// Owned by a session.
    Active,
    /// No eligible session was found. Disabled until an operator intervenes.
    Orphaned,
}

/// One source chat -> relay chat -> destination chat route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardingPair {
    pub id: PairId,
    pub name: String,
    pub source_chat: ChatRef,
    pub relay_chat: ChatRef,
    pub destination_chat: ChatRef,
    pub session: Option<String>,
    pub enabled: bool,
    pub status: PairStatus,
    pub last_activity: Option<DateTime<Utc>>,
    pub message_count: i64,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to create a forwarding pair.
#[derive(Debug, Clone)]
pub struct NewPair {
    pub name: String,
    pub source_chat: ChatRef,
    pub relay_chat: ChatRef,
    pub destination_chat: ChatRef,
}

/// One pair to move, with the owner the caller observed when planning the move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairMove {
    pub pair_id: PairId,
    pub expected_session: Option<String>,
}

/// An atomic ownership change applied by [`crate::CredentialStore::set_pair_session`].
///
/// Every move is checked against its expected owner and, when `capacity`
/// is set, the target's assigned count after the change is checked against
/// it. Either every move is applied or none is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionChange {
    pub moves: Vec<PairMove>,
    /// New owner. `None` orphans the pairs.
    pub target: Option<String>,
    pub capacity: Option<u32>,
}

/// Result of a compare-and-swap ownership change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOutcome {
    Applied,
    /// A pair's current owner no longer matches what the caller expected.
    Conflict { pair_id: PairId },
    /// Applying the change would push the target over its capacity.
    CapacityExceeded { assigned: u32, capacity: u32 },
}

// --- Correlation ---

/// One leg of delivery.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Hop {
    /// Source chat -> relay chat.
    Relay,
    /// Relay chat -> destination chat.
    Destination,
}

/// Delivery state of a logical message derived from its correlation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum MessageState {
    Delivered,
    PartiallyDelivered,
    Deleted,
}

/// Links one logical message across the relay and destination hops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationRecord {
    pub pair_id: PairId,
    pub source_message_id: MessageId,
    pub relay_message_id: Option<MessageId>,
    pub destination_message_id: Option<MessageId>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl CorrelationRecord {
    /// Record for a message whose relay hop just succeeded.
    pub fn relayed(pair_id: PairId, source: MessageId, relay: MessageId) -> Self {
        Self {
            pair_id,
            source_message_id: source,
            relay_message_id: Some(relay),
            destination_message_id: None,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    pub fn hop_id(&self, hop: Hop) -> Option<&MessageId> {
        match hop {
            Hop::Relay => self.relay_message_id.as_ref(),
            Hop::Destination => self.destination_message_id.as_ref(),
        }
    }

    pub fn state(&self) -> MessageState {
        if self.deleted_at.is_some() {
            return MessageState::Deleted;
        }
        match (&self.relay_message_id, &self.destination_message_id) {
            (Some(_), Some(_)) => MessageState::Delivered,
            (None, None) => MessageState::Deleted,
            _ => MessageState::PartiallyDelivered,
        }
    }
}

/// Result of inserting a correlation record.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted,
    /// A record for the same (pair, source message) was already stored.
    Existing(CorrelationRecord),
}

// --- Collaborator payloads ---

/// Inbound message content as observed on the source chat.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Content {
    pub text: String,
    /// Source message id this message replies to, if any.
    pub reply_to: Option<MessageId>,
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            reply_to: None,
        }
    }
}

/// A platform-ready message for one hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub text: String,
    /// Message id on the target platform this message replies to.
    pub reply_to: Option<MessageId>,
}

/// Verdict of the filter engine for one message on one pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterDecision {
    Allow,
    Block { reason: String },
    Replace(Content),
    /// Deliver, but prefix the content with a warning line.
    Warn(String),
}

/// Outcome of a single health probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ok,
    /// The platform rejected the session's credentials for good.
    PermanentFailure { reason: String },
    /// The probe failed but may succeed later.
    Error { reason: String },
}

/// Acknowledgement of an edit or delete call against a platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HopAck {
    Done,
    /// The target message no longer exists. Treated as a successful no-op.
    Gone,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn health_state_terminality() {
        assert!(HealthState::Unauthorized.is_terminal());
        assert!(HealthState::Removed.is_terminal());
        assert!(!HealthState::Degraded.is_terminal());
        assert!(HealthState::Degraded.may_own_pairs());
        assert!(!HealthState::Unverified.may_own_pairs());
    }

    #[test]
    fn health_state_string_form_is_snake_case() {
        assert_eq!(HealthState::Unverified.to_string(), "unverified");
        assert_eq!(
            HealthState::from_str("unauthorized").unwrap(),
            HealthState::Unauthorized
        );
        assert_eq!(PairStatus::Orphaned.to_string(), "orphaned");
    }

    #[test]
    fn correlation_state_follows_hop_ids() {
        let mut record = CorrelationRecord::relayed(PairId(7), "100".into(), "55".into());
        assert_eq!(record.state(), MessageState::PartiallyDelivered);
        assert_eq!(record.hop_id(Hop::Relay), Some(&MessageId::from("55")));

        record.destination_message_id = Some("9".into());
        assert_eq!(record.state(), MessageState::Delivered);

        record.relay_message_id = None;
        record.destination_message_id = None;
        assert_eq!(record.state(), MessageState::Deleted);
    }

    #[test]
    fn message_id_from_integer() {
        assert_eq!(MessageId::from(100).as_str(), "100");
    }

    #[test]
    fn session_record_json_uses_snake_case_health() {
        let record = SessionRecord {
            name: "main".into(),
            capacity: 30,
            priority: 1,
            health: HealthState::Unauthorized,
            registered_at: Utc::now(),
            last_probed_at: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["health"], "unauthorized");
        assert_eq!(json["last_probed_at"], serde_json::Value::Null);
    }

    proptest::proptest! {
        #[test]
        fn deleted_records_stay_deleted(relay: bool, destination: bool) {
            let mut record = CorrelationRecord::relayed(PairId(1), "1".into(), "2".into());
            record.relay_message_id = relay.then(|| MessageId::from("2"));
            record.destination_message_id = destination.then(|| MessageId::from("3"));
            record.deleted_at = Some(Utc::now());
            proptest::prop_assert_eq!(record.state(), MessageState::Deleted);
        }
    }
}
