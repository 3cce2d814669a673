//! Bus payloads and subject naming.
//!
//! Three subjects exist per address `A`: `ping.A` (presence probes
//! arriving for A), `online.A` (presence replies arriving for A) and
//! `chat.A` (chat messages arriving for A). A peer subscribes only to
//! its own subjects and publishes only to the remote peer's.
//!
//! All payloads are JSON with fixed field names; both peers in a
//! conversation must use the same encoding.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::Address;

/// Subject a peer listens on for presence probes.
pub fn ping_subject(addr: &Address) -> String {
    format!("ping.{addr}")
}

/// Subject a peer listens on for presence replies.
pub fn online_subject(addr: &Address) -> String {
    format!("online.{addr}")
}

/// Subject a peer listens on for chat messages.
pub fn chat_subject(addr: &Address) -> String {
    format!("chat.{addr}")
}

/// Presence probe sent by a dialer to a remote peer's ping subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresencePing {
    pub author_address: Address,
}

/// Presence reply, sent to the probing peer's online subject.
///
/// `is_online: false` is also published at chat teardown to tell the
/// remote side to leave its dial loop or close its chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceNotice {
    pub author_address: Address,
    pub is_online: bool,
}

/// One chat line.
///
/// `time` is set by the sender at emit time, Unix milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub time: u64,
    pub text: String,
}

impl ChatMessage {
    /// A message stamped with the current time.
    pub fn now(text: impl Into<String>) -> Self {
        Self {
            time: now_ms(),
            text: text.into(),
        }
    }
}

impl PresencePing {
    /// Serialize to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

impl PresenceNotice {
    /// Serialize to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

impl ChatMessage {
    /// Serialize to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

/// Current time in milliseconds since UNIX epoch.
#[inline]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ADDRESS_DIGEST_LEN;

    fn addr(seed: u8) -> Address {
        Address::from_digest(&[seed; ADDRESS_DIGEST_LEN])
    }

    #[test]
    fn subjects_are_keyed_by_address() {
        let a = addr(1);
        assert_eq!(ping_subject(&a), format!("ping.{a}"));
        assert_eq!(online_subject(&a), format!("online.{a}"));
        assert_eq!(chat_subject(&a), format!("chat.{a}"));
    }

    #[test]
    fn ping_round_trip() {
        let ping = PresencePing {
            author_address: addr(2),
        };
        let bytes = ping.to_bytes().unwrap();
        let back = PresencePing::from_bytes(&bytes).unwrap();
        assert_eq!(back.author_address, ping.author_address);
    }

    #[test]
    fn notice_field_names_are_fixed() {
        let notice = PresenceNotice {
            author_address: addr(3),
            is_online: true,
        };
        let json: serde_json::Value =
            serde_json::from_slice(&notice.to_bytes().unwrap()).unwrap();
        assert_eq!(json["author_address"], addr(3).as_str());
        assert_eq!(json["is_online"], true);
    }

    #[test]
    fn chat_message_preserves_time_and_text() {
        let msg = ChatMessage {
            time: 1_700_000_000_123,
            text: "hi".into(),
        };
        let back = ChatMessage::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn malformed_payload_is_an_error() {
        assert!(PresencePing::from_bytes(b"{").is_err());
        assert!(ChatMessage::from_bytes(b"\"not an object\"").is_err());
    }
}
