//! Content digests.
//!
//! A digest is the content address of a container blob or manifest,
//! in the `sha256:<hex>` form used by the OCI Distribution Spec.

use std::fmt;
use std::str::FromStr;

use serde::{de, ser, Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::error::{DepotError, DepotResult};

/// A content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Digest {
    /// An SHA-256 digest.
    Sha256([u8; 32]),
}

impl Digest {
    /// Convenience function to digest a slice.
    pub fn sha256_from_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self::Sha256(hasher.finalize().into())
    }

    /// Parses a typed representation of a digest.
    pub fn from_typed(s: &str) -> DepotResult<Self> {
        let colon = s.find(':').ok_or(DepotError::InvalidDigest {
            digest: s.to_owned(),
            reason: "missing colon separator",
        })?;

        let (algorithm, rest) = s.split_at(colon);
        let hash = &rest[1..];

        match algorithm {
            "sha256" => {
                if hash.len() != 64 {
                    return Err(DepotError::InvalidDigest {
                        digest: s.to_owned(),
                        reason: "SHA-256 digests must be 64 hex characters",
                    });
                }

                let v = hex::decode(hash).map_err(|_| DepotError::InvalidDigest {
                    digest: s.to_owned(),
                    reason: "invalid hexadecimal",
                })?;

                Ok(Self::Sha256(v.try_into().unwrap()))
            }
            _ => Err(DepotError::InvalidDigest {
                digest: s.to_owned(),
                reason: "unsupported digest algorithm",
            }),
        }
    }

    /// Returns the hexadecimal representation without the algorithm prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.data())
    }

    fn data(&self) -> &[u8] {
        match self {
            Self::Sha256(d) => d,
        }
    }

    fn algorithm(&self) -> &'static str {
        match self {
            Self::Sha256(_) => "sha256",
        }
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm(), self.to_hex())
    }
}

impl FromStr for Digest {
    type Err = DepotError;

    fn from_str(s: &str) -> DepotResult<Self> {
        Self::from_typed(s)
    }
}

impl<'de> Deserialize<'de> for Digest {
    /// Deserializes a typed digest string.
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        use de::Error;

        String::deserialize(deserializer)
            .and_then(|s| Self::from_typed(&s).map_err(|e| Error::custom(e.to_string())))
    }
}

impl Serialize for Digest {
    /// Serializes a digest into a typed digest string.
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: ser::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let digest = Digest::sha256_from_bytes(b"hello world");
        let typed = digest.to_string();

        assert_eq!(
            "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9",
            typed
        );
        assert_eq!(digest, Digest::from_typed(&typed).unwrap());
    }

    #[test]
    fn test_invalid() {
        assert!(Digest::from_typed("b94d27b9").is_err());
        assert!(Digest::from_typed("md5:d41d8cd98f00b204e9800998ecf8427e").is_err());
        assert!(Digest::from_typed("sha256:zzzz").is_err());
        assert!(Digest::from_typed("sha256:b94d").is_err());
    }
}
