use super::*;

use chrono::TimeZone;

use depot::name::SpaceName;

macro_rules! space {
    ($n:expr) => {
        SpaceName::new($n.to_string()).unwrap()
    };
}

fn test_key() -> HS256Key {
    HS256Key::from_bytes(b"01234567890123456789012345678901")
}

fn far_future() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0).unwrap()
}

#[test]
fn test_basic() {
    let key = test_key();

    let mut token = Token::new("meow".to_string(), &far_future());
    {
        let perm = token.get_or_insert_permission_mut("space-rw".parse().unwrap());
        perm.pull = true;
        perm.push = true;
    }
    {
        let perm = token.get_or_insert_permission_mut("space-ro".parse().unwrap());
        perm.pull = true;
    }
    {
        let perm = token.get_or_insert_permission_mut("team-*".parse().unwrap());
        perm.pull = true;
        perm.push = true;
        perm.delete = true;
    }

    let encoded = token.encode(&key).unwrap();
    let decoded = Token::from_jwt(&encoded, &key).unwrap();

    assert_eq!(Some("meow"), decoded.sub());

    let perm_rw = decoded.get_permission_for_space(&space! { "space-rw" });

    assert!(perm_rw.pull);
    assert!(perm_rw.push);
    assert!(!perm_rw.delete);

    assert!(perm_rw.require_pull().is_ok());
    assert!(perm_rw.require_push().is_ok());
    assert!(perm_rw.require_delete().is_err());

    let perm_ro = decoded.get_permission_for_space(&space! { "space-ro" });

    assert!(perm_ro.require_pull().is_ok());
    assert!(perm_ro.require_push().is_err());
    assert!(perm_ro.require_delete().is_err());

    let perm_team = decoded.get_permission_for_space(&space! { "team-xyz" });

    assert!(perm_team.require_pull().is_ok());
    assert!(perm_team.require_push().is_ok());
    assert!(perm_team.require_delete().is_ok());

    assert!(!decoded
        .get_permission_for_space(&space! { "forbidden" })
        .can_discover());
}

#[test]
fn test_claim_shape() {
    let mut token = Token::new("meow".to_string(), &far_future());
    {
        let perm = token.get_or_insert_permission_mut("s1".parse().unwrap());
        perm.pull = true;
        perm.push = true;
    }

    // Permissions are encoded as 0/1 under the namespaced claim
    let claims = serde_json::to_value(token.opaque_claims()).unwrap();
    assert_eq!(
        serde_json::json!({ "r": 1, "w": 1 }),
        claims[CLAIM_NAMESPACE]["spaces"]["s1"]
    );
}

#[test]
fn test_tampered_token() {
    let key = test_key();

    let token = Token::new("meow".to_string(), &far_future());
    let encoded = token.encode(&key).unwrap();

    let mut tampered = encoded.into_bytes();
    let last = tampered.len() - 1;
    tampered[last] ^= 1;
    let tampered = String::from_utf8(tampered).unwrap();

    assert!(Token::from_jwt(&tampered, &key).is_err());

    let other_key = HS256Key::from_bytes(b"another-secret-another-secret!!!");
    let encoded = token.encode(&key).unwrap();
    assert!(Token::from_jwt(&encoded, &other_key).is_err());
}

#[test]
fn test_with_expiration() {
    let key = test_key();

    let mut token = Token::new("meow".to_string(), &far_future());
    token
        .get_or_insert_permission_mut("s1".parse().unwrap())
        .push = true;

    let exp = Utc.with_ymd_and_hms(2099, 1, 1, 0, 0, 0).unwrap();
    let reissued = token.with_expiration(&exp);

    let decoded = Token::from_jwt(&reissued.encode(&key).unwrap(), &key).unwrap();
    assert_eq!(Some("meow"), decoded.sub());
    assert!(decoded
        .get_permission_for_space(&space! { "s1" })
        .require_push()
        .is_ok());
}
