//! Outbound reply rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::conversation::ConversationId;
use crate::job::JobId;

/// Unique identifier for an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutboundId(pub Uuid);

impl OutboundId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OutboundId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OutboundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delivery status of an outbound row. Delivery itself happens elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutboundStatus {
    #[default]
    Pending,
    Sending,
    Sent,
    Failed,
}

impl OutboundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboundStatus::Pending => "pending",
            OutboundStatus::Sending => "sending",
            OutboundStatus::Sent => "sent",
            OutboundStatus::Failed => "failed",
        }
    }

    /// Rows that count as part of the visible conversation.
    pub fn is_delivered_ish(&self) -> bool {
        matches!(self, OutboundStatus::Sending | OutboundStatus::Sent)
    }
}

impl fmt::Display for OutboundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A reply segment to be inserted.
///
/// `(inbound_message_id, sequence_number)` is the idempotency key: a second
/// insert with the same pair is ignored by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOutboundMessage {
    pub conversation_id: ConversationId,
    /// Job the reply is attributed to
    pub inbound_message_id: JobId,
    pub provider: String,
    pub to_address: String,
    pub from_address: String,
    pub body: String,
    pub provider_inbound_sid: Option<String>,
    pub sequence_number: i32,
}

/// A persisted outbound row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub id: OutboundId,
    pub conversation_id: ConversationId,
    pub inbound_message_id: JobId,
    pub provider: String,
    pub to_address: String,
    pub from_address: String,
    pub body: String,
    pub status: OutboundStatus,
    pub provider_inbound_sid: Option<String>,
    pub sequence_number: i32,
    pub created_at: DateTime<Utc>,
}

impl OutboundMessage {
    /// Materialize a pending row from an insert request.
    pub fn from_new(id: OutboundId, new: &NewOutboundMessage, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            conversation_id: new.conversation_id,
            inbound_message_id: new.inbound_message_id,
            provider: new.provider.clone(),
            to_address: new.to_address.clone(),
            from_address: new.from_address.clone(),
            body: new.body.clone(),
            status: OutboundStatus::Pending,
            provider_inbound_sid: new.provider_inbound_sid.clone(),
            sequence_number: new.sequence_number,
            created_at,
        }
    }
}
