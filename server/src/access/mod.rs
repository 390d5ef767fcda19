//! Access control.
//!
//! The server validates JWTs against the configured HMAC key and
//! scopes every push/delete to the target space. The claims
//! themselves live in `depot-token`; this module holds the HTTP
//! integration and the container token endpoint's issuance.

pub mod http;

use chrono::{Duration, Utc};

use crate::config::ServerKeys;
use crate::error::{ServerError, ServerResult};

pub use depot_token::{SpacePermission, Token};

/// Validity of tokens minted by the container token endpoint.
const ISSUED_TOKEN_TTL_MINUTES: i64 = 30;

/// Checks pull access to a space.
///
/// Pulls are currently unrestricted; the permission bit exists in
/// the token claims and is kept at the call sites so enforcement is
/// a one-line change.
pub fn require_pull(_permission: &SpacePermission) -> ServerResult<()> {
    Ok(())
}

/// Mints a short-lived token carrying the same claims as the
/// presented one.
///
/// This is the `docker login` flow: the client authenticates with
/// Basic credentials (whose password carries a token) and receives a
/// 30-minute token for subsequent registry requests.
pub fn issue_short_lived_token(token: &Token, keys: &ServerKeys) -> ServerResult<String> {
    let exp = Utc::now() + Duration::minutes(ISSUED_TOKEN_TTL_MINUTES);

    token
        .with_expiration(&exp)
        .encode(&keys.jwt)
        .map_err(ServerError::from)
}
