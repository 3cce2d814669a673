//! Control protocol between the CLI and the daemon.
//!
//! Spoken over the daemon's Unix socket as newline-delimited JSON: one
//! request object per line, answered by one response object per line.
//! After an accepted [`ControlRequest::Send`] the same connection
//! switches to chat traffic, one [`wire::ChatMessage`](crate::wire::ChatMessage)
//! per line in each direction, until the client closes its write half.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Address;

/// Default base directory for profile and socket: `~/.murmur`.
pub fn default_base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".murmur")
}

/// Control socket path under a base directory.
pub fn socket_path(base: &Path) -> PathBuf {
    base.join("socket").join("murmurd.sock")
}

/// A request from the CLI to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ControlRequest {
    /// Connect to the bus and start answering presence probes.
    Online {
        nats_url: String,
        sender_address: Address,
    },
    /// Tear down the chat (if any) and the session.
    Offline,
    /// Dial a peer and attach a chat to the session.
    CreateChat { recipient_address: Address },
    /// Close the current chat.
    DeleteChat { recipient_address: Address },
    /// Attach this connection as the chat's frontend stream.
    Send,
}

/// The daemon's reply to a [`ControlRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ControlResponse {
    Ok,
    Error { code: ErrorCode, message: String },
}

/// Stable error codes surfaced over the control protocol.
///
/// Internal logs carry the cause chain; the frontend only sees these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ProfileMissing,
    ProfileCorrupt,
    Transport,
    AlreadyOnline,
    ChatExists,
    NoChat,
    InvalidState,
    RecipientOffline,
    Frontend,
    Internal,
}

/// Encode `msg` as one protocol line, including the trailing newline.
pub fn to_line<T: Serialize>(msg: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(msg)?;
    line.push('\n');
    Ok(line)
}

/// Decode one protocol line (with or without its newline).
pub fn from_line<'a, T: Deserialize<'a>>(line: &'a str) -> Result<T, serde_json::Error> {
    serde_json::from_str(line.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ADDRESS_DIGEST_LEN;

    fn addr() -> Address {
        Address::from_digest(&[9; ADDRESS_DIGEST_LEN])
    }

    #[test]
    fn request_lines_round_trip() {
        let reqs = [
            ControlRequest::Online {
                nats_url: "nats://localhost:4222".into(),
                sender_address: addr(),
            },
            ControlRequest::Offline,
            ControlRequest::CreateChat {
                recipient_address: addr(),
            },
            ControlRequest::DeleteChat {
                recipient_address: addr(),
            },
            ControlRequest::Send,
        ];
        for req in reqs {
            let line = to_line(&req).unwrap();
            assert!(line.ends_with('\n'));
            assert_eq!(line.matches('\n').count(), 1);
            let back: ControlRequest = from_line(&line).unwrap();
            assert_eq!(
                serde_json::to_value(&back).unwrap(),
                serde_json::to_value(&req).unwrap()
            );
        }
    }

    #[test]
    fn op_tag_is_snake_case() {
        let line = to_line(&ControlRequest::CreateChat {
            recipient_address: addr(),
        })
        .unwrap();
        assert!(line.contains("\"op\":\"create_chat\""));
    }

    #[test]
    fn error_response_carries_code_and_message() {
        let line = to_line(&ControlResponse::Error {
            code: ErrorCode::RecipientOffline,
            message: "no reply before deadline".into(),
        })
        .unwrap();
        let back: ControlResponse = from_line(&line).unwrap();
        match back {
            ControlResponse::Error { code, message } => {
                assert_eq!(code, ErrorCode::RecipientOffline);
                assert_eq!(message, "no reply before deadline");
            }
            other => panic!("expected error response, got {other:?}"),
        }
    }
}
