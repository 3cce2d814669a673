//! murmur core types.
//!
//! Everything the daemon and the CLI share: peer addresses, on-disk
//! profiles, the bus payloads (ping / presence / chat), and the control
//! protocol spoken over the local socket.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use murmur_core::Profile;
//!
//! # fn example() -> Result<(), murmur_core::ProfileError> {
//! let profile = Profile::load("/home/me/.murmur".as_ref())?;
//! println!("my address: {}", profile.address());
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod control;
mod error;
mod profile;
pub mod wire;

pub use error::ProfileError;
pub use profile::Profile;

use std::fmt;
use std::str::FromStr;

/// Number of bytes in the digest an address encodes (MD5 output).
pub const ADDRESS_DIGEST_LEN: usize = 16;

/// A peer's identity on the bus.
///
/// Base58 over a 16-byte digest of the peer's public key; see
/// [`address`](crate::address) for the derivation. Displayed and parsed
/// as the bare Base58 string.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    /// The Base58 text of this address.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Build an address directly from a 16-byte digest.
    ///
    /// Normal callers go through [`address::derive`](crate::address::derive);
    /// this exists for tests and tooling that need arbitrary addresses.
    pub fn from_digest(digest: &[u8; ADDRESS_DIGEST_LEN]) -> Self {
        Self(bs58::encode(digest).into_string())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.0)
    }
}

/// The string is not a well-formed address.
#[derive(Debug, thiserror::Error)]
#[error("invalid address: {0:?}")]
pub struct InvalidAddress(pub String);

impl FromStr for Address {
    type Err = InvalidAddress;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digest = bs58::decode(s)
            .into_vec()
            .map_err(|_| InvalidAddress(s.to_string()))?;
        if digest.len() != ADDRESS_DIGEST_LEN {
            return Err(InvalidAddress(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl serde::Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for Address {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_round_trips_through_str() {
        let addr = Address::from_digest(&[7u8; ADDRESS_DIGEST_LEN]);
        let parsed: Address = addr.as_str().parse().unwrap();
        assert_eq!(parsed, addr);
    }

    #[test]
    fn address_rejects_garbage() {
        assert!("".parse::<Address>().is_err());
        // 0, O, I, l are not in the Base58 alphabet
        assert!("0OIl".parse::<Address>().is_err());
        // valid Base58 but the wrong digest width
        assert!("abc".parse::<Address>().is_err());
    }

    #[test]
    fn address_serde_is_a_bare_string() {
        let addr = Address::from_digest(&[1u8; ADDRESS_DIGEST_LEN]);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{addr}\""));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }
}
