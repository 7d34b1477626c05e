//! Key material extraction
//!
//! `xray x25519` prints the generated pair as free text. The scan looks for
//! the two marker lines in any order and takes the trimmed remainder of
//! each. Key format is not validated here; the keygen tool owns that, and
//! format drift in its output surfaces as the emptiness check failing.

use thiserror::Error;

const PRIVATE_MARKER: &str = "Private key:";
const PUBLIC_MARKER: &str = "Public key:";

/// Keygen output did not contain both key markers.
#[derive(Debug, Error)]
#[error("Failed to generate keys")]
pub struct KeyExtractionError;

/// An X25519 pair generated on the remote host.
///
/// The private key never leaves the host except embedded in the config
/// document written there; only the public key comes back for link
/// generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub private_key: String,
    pub public_key: String,
}

impl KeyPair {
    /// Scan keygen output for the key pair.
    pub fn extract(raw: &str) -> Result<Self, KeyExtractionError> {
        let mut private_key = String::new();
        let mut public_key = String::new();

        for line in raw.lines() {
            if let Some(rest) = substring_after(line, PRIVATE_MARKER) {
                private_key = rest.trim().to_string();
            }
            if let Some(rest) = substring_after(line, PUBLIC_MARKER) {
                public_key = rest.trim().to_string();
            }
        }

        if private_key.is_empty() || public_key.is_empty() {
            return Err(KeyExtractionError);
        }

        Ok(Self {
            private_key,
            public_key,
        })
    }
}

fn substring_after<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    line.find(marker).map(|idx| &line[idx + marker.len()..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_keys_in_printed_order() {
        let raw = "Private key: cP2ai8sJ4lQnqX0YVp3xGg\nPublic key: mK9bTf1yHw5eR7dNZs6uLa\n";
        let pair = KeyPair::extract(raw).unwrap();
        assert_eq!(pair.private_key, "cP2ai8sJ4lQnqX0YVp3xGg");
        assert_eq!(pair.public_key, "mK9bTf1yHw5eR7dNZs6uLa");
    }

    #[test]
    fn extracts_keys_in_reversed_order() {
        let raw = "Public key: mK9bTf1yHw5eR7dNZs6uLa\nPrivate key: cP2ai8sJ4lQnqX0YVp3xGg\n";
        let pair = KeyPair::extract(raw).unwrap();
        assert_eq!(pair.private_key, "cP2ai8sJ4lQnqX0YVp3xGg");
        assert_eq!(pair.public_key, "mK9bTf1yHw5eR7dNZs6uLa");
    }

    #[test]
    fn tolerates_surrounding_noise_and_whitespace() {
        let raw = "some banner\nPrivate key:    abc   \nnoise\nPublic key:\tdef\ntrailer";
        let pair = KeyPair::extract(raw).unwrap();
        assert_eq!(pair.private_key, "abc");
        assert_eq!(pair.public_key, "def");
    }

    #[test]
    fn fails_when_private_marker_missing() {
        let raw = "Public key: mK9bTf1yHw5eR7dNZs6uLa\n";
        assert!(KeyPair::extract(raw).is_err());
    }

    #[test]
    fn fails_when_public_marker_missing() {
        let raw = "Private key: cP2ai8sJ4lQnqX0YVp3xGg\n";
        assert!(KeyPair::extract(raw).is_err());
    }

    #[test]
    fn fails_on_unrecognizable_output() {
        assert!(KeyPair::extract("command not found\n").is_err());
        assert!(KeyPair::extract("").is_err());
    }

    #[test]
    fn error_message_is_stable() {
        let err = KeyPair::extract("").unwrap_err();
        assert_eq!(err.to_string(), "Failed to generate keys");
    }
}
