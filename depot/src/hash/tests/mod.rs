use super::*;

use crate::hash::resumable::ResumableSha256;

#[test]
fn test_multi_hasher() {
    let mut hasher = MultiHasher::new();
    hasher.update(b"hello ");
    hasher.update(b"world");

    assert_eq!(11, hasher.bytes_written());

    let sum = hasher.sum();
    assert_eq!("5eb63bbbe01eeed093cb22bb8f5acdc3", sum.md5);
    assert_eq!("2aae6c35c94fcfb415dbe95f408b9ce91ee846ed", sum.sha1);
    assert_eq!(
        "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9",
        sum.sha256
    );
    assert_eq!(
        "309ecc489c12d6eb4cc40f50c902f2b4d0ed77ee511a7c7a9bcd3ca86d4cd86f989dd35bc5ff499670da34255b45b0cfd830e81f605dcf7dc5542e93ae9cd76f",
        sum.sha512
    );

    assert_eq!(
        "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9",
        sum.to_digest().to_string()
    );
}

#[test]
fn test_checksum_set_serde() {
    let mut hasher = MultiHasher::new();
    hasher.update(b"hello world");
    let sum = hasher.sum();

    let json = serde_json::to_string(&sum).unwrap();
    assert!(json.contains("\"md5\":\"5eb63bbbe01eeed093cb22bb8f5acdc3\""));

    let back: ChecksumSet = serde_json::from_str(&json).unwrap();
    assert_eq!(sum, back);
}

#[test]
fn test_random_ref() {
    let a = random_ref();
    let b = random_ref();

    assert_eq!(32, a.len());
    assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    assert_ne!(a, b);
}

#[test]
fn test_session_ref_stable() {
    let session = Uuid::new_v4();

    let a = session_ref(&session, "s1/alpine");
    let b = session_ref(&session, "s1/alpine");
    let c = session_ref(&session, "s1/ubuntu");

    assert_eq!(32, a.len());
    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn test_resumable_matches_sha2() {
    use sha2::{Digest as _, Sha256};

    for size in [0usize, 1, 55, 56, 63, 64, 65, 1000, 4096] {
        let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();

        let mut ours = ResumableSha256::new();
        ours.update(&data);

        let expected = hex::encode(Sha256::digest(&data));
        assert_eq!(expected, ours.finalize().to_hex(), "size {}", size);
    }
}

#[test]
fn test_resumable_snapshot_roundtrip() {
    use sha2::{Digest as _, Sha256};

    let data: Vec<u8> = (0..10_000).map(|i| (i % 253) as u8).collect();

    // Snapshot at awkward boundaries and keep going with a fresh hasher.
    for split in [0usize, 1, 63, 64, 100, 5000, 9999] {
        let mut first = ResumableSha256::new();
        first.update(&data[..split]);
        assert_eq!(split as u64, first.bytes_written());

        let snapshot = first.snapshot();

        let mut second = ResumableSha256::from_snapshot(&snapshot).unwrap();
        second.update(&data[split..]);

        let expected = hex::encode(Sha256::digest(&data));
        assert_eq!(expected, second.finalize().to_hex(), "split {}", split);
    }
}

#[test]
fn test_resumable_bad_snapshot() {
    assert!(ResumableSha256::from_snapshot("not base64!").is_err());
    assert!(ResumableSha256::from_snapshot("AAAA").is_err());

    // Tail length inconsistent with the byte count.
    let mut hasher = ResumableSha256::new();
    hasher.update(b"abc");
    let snapshot = hasher.snapshot();
    let mut bytes = base64::Engine::decode(
        &base64::engine::general_purpose::STANDARD,
        snapshot.as_bytes(),
    )
    .unwrap();
    bytes.pop();
    let tampered = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes);
    assert!(ResumableSha256::from_snapshot(&tampered).is_err());
}
