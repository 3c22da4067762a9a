//! Message entity stored in the message store.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use rkyv::{Archive, Deserialize, Serialize};

use crate::error::Error;

/// Size of a message identifier in bytes.
pub const MESSAGE_ID_SIZE: usize = 16;

/// Stable message identifier, used as the sled key and as the dispatcher's
/// tracking key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Archive, Serialize, Deserialize)]
pub struct MessageId(pub [u8; MESSAGE_ID_SIZE]);

impl MessageId {
    /// Generate a new unique identifier.
    pub fn generate() -> Self {
        // Disambiguates ids generated within the same nanosecond
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        let counter = COUNTER.fetch_add(1, Ordering::Relaxed);

        let mut id = [0u8; MESSAGE_ID_SIZE];
        id[..8].copy_from_slice(&now.to_be_bytes());
        id[8..].copy_from_slice(&counter.to_be_bytes());
        Self(id)
    }

    /// The raw identifier bytes.
    pub fn as_bytes(&self) -> &[u8; MESSAGE_ID_SIZE] {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", hex::encode(self.0))
    }
}

/// Delivery state of an outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
pub enum DeliveryState {
    /// Created locally, not yet acknowledged by the backend.
    Pending,
    /// Accepted by the backend.
    Sent,
    /// Confirmed received by the other side.
    Delivered,
    /// Sending gave up.
    FailedToSend,
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::FailedToSend => "failed_to_send",
        };
        f.write_str(name)
    }
}

/// A text message in a conversation.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct Message {
    /// Message identifier.
    pub id: MessageId,
    /// Conversation the message belongs to.
    pub conversation: [u8; 16],
    /// Message body.
    pub text: String,
    /// Delivery state.
    pub delivery: DeliveryState,
    /// Last modification in microseconds since Unix epoch.
    pub updated_at: u64,
}

impl Message {
    /// Create a new pending message with a fresh identifier.
    pub fn new(conversation: [u8; 16], text: impl Into<String>) -> Self {
        Self {
            id: MessageId::generate(),
            conversation,
            text: text.into(),
            delivery: DeliveryState::Pending,
            updated_at: current_timestamp(),
        }
    }

    /// Set the delivery state and bump the modification time.
    pub fn set_delivery(&mut self, delivery: DeliveryState) {
        self.delivery = delivery;
        self.touch();
    }

    /// Bump the modification time.
    pub fn touch(&mut self) {
        self.updated_at = current_timestamp();
    }

    /// Serialize the message to bytes using rkyv.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize a message from bytes using rkyv.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        // Small sled values are stored inline and may be unaligned
        let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);

        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}

/// Get current timestamp in microseconds since Unix epoch.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}
