//! Address derivation.
//!
//! An address is derived from an RSA public key in four fixed steps:
//! PKCS#1 DER, PEM armor under a `PUBLIC KEY` label, SHA-256, then MD5 of
//! that digest, and finally Base58 of the 16 MD5 bytes. The chain must
//! stay byte-identical across implementations so that two peers derive
//! the same address from the same key.

use md5::compute as md5_compute;
use pem::{EncodeConfig, LineEnding, Pem};
use rsa::pkcs1::EncodeRsaPublicKey;
use rsa::RsaPublicKey;
use sha2::{Digest, Sha256};

use crate::error::ProfileError;
use crate::Address;

/// PEM tag the armored public key is wrapped in before hashing.
///
/// The label is `PUBLIC KEY` even though the body is PKCS#1 DER; changing
/// it would change every derived address.
const PUBLIC_KEY_TAG: &str = "PUBLIC KEY";

/// Derive the bus address for `public_key`.
pub fn derive(public_key: &RsaPublicKey) -> Result<Address, ProfileError> {
    let armored = armor_public_key(public_key)?;
    let sha = Sha256::digest(armored.as_bytes());
    let digest = md5_compute(sha);
    Ok(Address::from_digest(&digest.0))
}

/// The PEM armor of `public_key` that the derivation hashes.
///
/// 64-column Base64 with LF line endings and a trailing newline.
pub fn armor_public_key(public_key: &RsaPublicKey) -> Result<String, ProfileError> {
    let der = public_key
        .to_pkcs1_der()
        .map_err(|e| ProfileError::Corrupt {
            reason: format!("cannot encode public key: {e}"),
        })?;
    let block = Pem::new(PUBLIC_KEY_TAG, der.as_bytes());
    Ok(pem::encode_config(
        &block,
        EncodeConfig::new().set_line_ending(LineEnding::LF),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::BigUint;

    // Tiny fixed key. Useless for cryptography, fine for exercising the
    // derivation chain without a multi-second keygen.
    fn test_key() -> RsaPublicKey {
        RsaPublicKey::new(BigUint::from(3233u32), BigUint::from(17u32)).unwrap()
    }

    #[test]
    fn derivation_is_deterministic() {
        let key = test_key();
        let a = derive(&key).unwrap();
        let b = derive(&key).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_keys_get_different_addresses() {
        let a = derive(&test_key()).unwrap();
        let other = RsaPublicKey::new(BigUint::from(3599u32), BigUint::from(17u32)).unwrap();
        let b = derive(&other).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn armor_shape_matches_the_wire_convention() {
        let armored = armor_public_key(&test_key()).unwrap();
        assert!(armored.starts_with("-----BEGIN PUBLIC KEY-----\n"));
        assert!(armored.ends_with("-----END PUBLIC KEY-----\n"));
        assert!(!armored.contains('\r'));
        for line in armored.lines() {
            assert!(line.len() <= 64);
        }
    }

    #[test]
    fn derived_address_parses_back() {
        let addr = derive(&test_key()).unwrap();
        let parsed: Address = addr.as_str().parse().unwrap();
        assert_eq!(parsed, addr);
    }
}
