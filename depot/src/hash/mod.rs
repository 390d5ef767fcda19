//! Hashing utilities.

pub mod resumable;

#[cfg(test)]
mod tests;

use digest::Digest as _;
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use uuid::Uuid;

use crate::digest::Digest;

/// All digests of one payload, computed in a single pass.
///
/// This is the canonical checksum record attached to an asset. The
/// SHA-256 value doubles as the container-format content address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumSet {
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
    pub sha512: String,
}

impl ChecksumSet {
    /// Returns the SHA-256 value as a typed digest.
    pub fn to_digest(&self) -> Digest {
        let mut data = [0u8; 32];
        hex::decode_to_slice(&self.sha256, &mut data).expect("Checksum set holds a valid SHA-256");
        Digest::Sha256(data)
    }
}

/// Fans written bytes out into MD5, SHA-1, SHA-256 and SHA-512.
#[derive(Default)]
pub struct MultiHasher {
    md5: Md5,
    sha1: Sha1,
    sha256: Sha256,
    sha512: Sha512,
    bytes_written: u64,
}

impl MultiHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.md5.update(bytes);
        self.sha1.update(bytes);
        self.sha256.update(bytes);
        self.sha512.update(bytes);
        self.bytes_written += bytes.len() as u64;
    }

    /// Returns the number of bytes hashed so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Finalizes all four digests into one record.
    pub fn sum(self) -> ChecksumSet {
        ChecksumSet {
            md5: hex::encode(self.md5.finalize()),
            sha1: hex::encode(self.sha1.finalize()),
            sha256: hex::encode(self.sha256.finalize()),
            sha512: hex::encode(self.sha512.finalize()),
        }
    }
}

/// Generates a random 32-hex opaque blob ref.
///
/// The ref is derived from a random UUID, not from content.
pub fn random_ref() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Derives the stable blob ref of a resumable upload session.
///
/// The ref is a UUIDv5 of `(session_uuid, repo_full_name)`, so a
/// session's partial file keeps its path across process restarts.
pub fn session_ref(session_id: &Uuid, repo_full_name: &str) -> String {
    Uuid::new_v5(session_id, repo_full_name.as_bytes())
        .simple()
        .to_string()
}
