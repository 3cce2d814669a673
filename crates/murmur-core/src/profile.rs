//! On-disk profile: a long-lived RSA key pair and the address derived
//! from it.
//!
//! A profile directory holds `private.pem` (PKCS#1, `RSA PRIVATE KEY`)
//! and an advisory `public.pem`. Only the private key is read back; the
//! public half is re-derived from it.

use std::fs;
use std::path::{Path, PathBuf};

use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::pkcs8::LineEnding;
use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::address;
use crate::error::ProfileError;
use crate::Address;

/// File name of the private key inside a profile directory.
pub const PRIVATE_KEY_FILE: &str = "private.pem";
/// File name of the advisory public key inside a profile directory.
pub const PUBLIC_KEY_FILE: &str = "public.pem";
/// Key size used by [`Profile::generate`].
pub const GENERATED_KEY_BITS: usize = 2048;

/// A loaded identity: key pair plus derived address.
///
/// Immutable once constructed; lives for the process lifetime.
pub struct Profile {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
    address: Address,
}

impl Profile {
    /// Build a profile from an already-parsed private key.
    pub fn from_private_key(private_key: RsaPrivateKey) -> Result<Self, ProfileError> {
        let public_key = private_key.to_public_key();
        let address = address::derive(&public_key)?;
        Ok(Self {
            private_key,
            public_key,
            address,
        })
    }

    /// Load the profile stored in `dir`.
    ///
    /// Fails with [`ProfileError::Missing`] when the directory or
    /// `private.pem` is absent, [`ProfileError::Corrupt`] when the key
    /// does not parse. Never writes.
    pub fn load(dir: &Path) -> Result<Self, ProfileError> {
        if !dir.is_dir() {
            return Err(ProfileError::Missing {
                path: dir.to_path_buf(),
            });
        }
        let key_path = dir.join(PRIVATE_KEY_FILE);
        let pem = match fs::read_to_string(&key_path) {
            Ok(pem) => pem,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProfileError::Missing { path: key_path })
            }
            Err(e) => {
                return Err(ProfileError::Io {
                    path: key_path,
                    source: e,
                })
            }
        };
        let private_key =
            RsaPrivateKey::from_pkcs1_pem(&pem).map_err(|e| ProfileError::Corrupt {
                reason: format!("cannot parse {}: {e}", key_path.display()),
            })?;
        Self::from_private_key(private_key)
    }

    /// Generate a fresh key pair into `dir`, creating it (mode 0700) if
    /// needed.
    ///
    /// Refuses to overwrite an existing `private.pem` or `public.pem`.
    pub fn generate(dir: &Path) -> Result<Self, ProfileError> {
        if !dir.exists() {
            create_private_dir(dir)?;
        }
        let private_path = dir.join(PRIVATE_KEY_FILE);
        let public_path = dir.join(PUBLIC_KEY_FILE);
        for path in [&private_path, &public_path] {
            if path.exists() {
                return Err(ProfileError::Exists { path: path.clone() });
            }
        }

        let mut rng = rand::thread_rng();
        let private_key =
            RsaPrivateKey::new(&mut rng, GENERATED_KEY_BITS).map_err(ProfileError::Keygen)?;
        let profile = Self::from_private_key(private_key)?;

        let private_pem = profile
            .private_key
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| ProfileError::Corrupt {
                reason: format!("cannot encode private key: {e}"),
            })?;
        write_new(&private_path, private_pem.as_bytes())?;
        restrict_mode(&private_path)?;

        let public_pem = address::armor_public_key(&profile.public_key)?;
        write_new(&public_path, public_pem.as_bytes())?;

        Ok(profile)
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }
}

fn create_private_dir(dir: &Path) -> Result<(), ProfileError> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir).map_err(|e| ProfileError::Io {
        path: dir.to_path_buf(),
        source: e,
    })
}

fn write_new(path: &PathBuf, contents: &[u8]) -> Result<(), ProfileError> {
    fs::write(path, contents).map_err(|e| ProfileError::Io {
        path: path.clone(),
        source: e,
    })
}

impl std::fmt::Debug for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.debug_struct("Profile")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

fn restrict_mode(path: &Path) -> Result<(), ProfileError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| {
            ProfileError::Io {
                path: path.to_path_buf(),
                source: e,
            }
        })?;
    }
    Ok(())
}
