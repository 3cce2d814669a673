use std::path::PathBuf;

/// Errors loading or creating an on-disk profile.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("profile not found at {path}")]
    Missing { path: PathBuf },

    #[error("profile unreadable: {reason}")]
    Corrupt { reason: String },

    #[error("refusing to overwrite {path}")]
    Exists { path: PathBuf },

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("key generation failed: {0}")]
    Keygen(#[source] rsa::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_missing() {
        let err = ProfileError::Missing {
            path: "/tmp/nope".into(),
        };
        assert_eq!(err.to_string(), "profile not found at /tmp/nope");
    }

    #[test]
    fn display_corrupt() {
        let err = ProfileError::Corrupt {
            reason: "bad PEM".into(),
        };
        assert_eq!(err.to_string(), "profile unreadable: bad PEM");
    }
}
