//! Access control.
//!
//! Access control in Depot is simple and stateless - The server validates
//! the JWT against the configured key and allows access based on the
//! `https://jwt.depot.dev/v1` claim.
//!
//! ## Opaqueness
//!
//! The token format is unstable and claims beyond the standard ones defined
//! in RFC 7519 should never be interpreted by the client. The token might not
//! even be a valid JWT, in which case the client must not throw an error.
//!
//! ## Space discovery
//!
//! If the JWT grants any permission at all to the requested space,
//! then the bearer is able to discover the presence of artifacts in it,
//! meaning that NotFound or Forbidden can be returned depending on the
//! scenario. Otherwise, the user will get a generic 401 response
//! (Unauthorized) regardless of the request.
//!
//! ## Supplying the token
//!
//! The JWT can be supplied to the server in one of two ways:
//!
//! - As a normal Bearer token.
//! - As the password in Basic Auth (used by `docker login`, `helm` and
//!   plain curl). The username is ignored.
//!
//! ## Example token
//!
//! ```json
//! {
//!   "sub": "meow",
//!   "exp": 4102324986,
//!   "https://jwt.depot.dev/v1": {
//!     "spaces": {
//!       "space-rw": {
//!         "w": 1,
//!         "r": 1
//!       },
//!       "space-ro": {
//!         "r": 1
//!       },
//!       "team-*": {
//!         "w": 1,
//!         "r": 1,
//!         "d": 1
//!       }
//!     }
//!   }
//! }
//! ```

#![deny(
    asm_sub_register,
    deprecated,
    missing_abi,
    unsafe_code,
    unused_macros,
    unused_must_use,
    unused_unsafe
)]
#![deny(clippy::from_over_into, clippy::needless_question_mark)]
#![cfg_attr(
    not(debug_assertions),
    deny(unused_imports, unused_mut, unused_variables)
)]

pub mod util;

#[cfg(test)]
mod tests;

use std::error::Error as StdError;

use chrono::{DateTime, Utc};
use displaydoc::Display;
use indexmap::IndexMap;
pub use jwt_simple::{
    algorithms::{HS256Key, MACLike},
    claims::{Claims, JWTClaims},
    prelude::{UnixTimeStamp, VerificationOptions},
};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, BoolFromInt};

use depot::name::{SpaceName, SpaceNamePattern};

/// Custom claim namespace for the DepotAccess information.
///
/// Custom claim namespaces are required by platforms like Auth0, and
/// custom claims without one will be silently dropped.
///
/// <https://auth0.com/docs/security/tokens/json-web-tokens/create-namespaced-custom-claims>
///
/// Also change the `#[serde(rename)]` below if you change this.
pub const CLAIM_NAMESPACE: &str = "https://jwt.depot.dev/v1";

macro_rules! require_permission_function {
    ($name:ident, $descr:literal, $member:ident) => {
        pub fn $name(&self) -> Result<()> {
            if !self.$member {
                tracing::debug!("Client has no {} permission", $descr);
                if self.can_discover() {
                    Err(Error::PermissionDenied)
                } else {
                    Err(Error::NoDiscoveryPermission)
                }
            } else {
                Ok(())
            }
        }
    };
}

/// A validated JSON Web Token.
#[derive(Debug)]
pub struct Token(JWTClaims<TokenClaims>);

/// Claims of a JSON Web Token.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenClaims {
    /// Depot namespace.
    #[serde(rename = "https://jwt.depot.dev/v1")]
    depot_ns: DepotAccess,
}

/// Permissions granted to a client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DepotAccess {
    /// Space permissions.
    ///
    /// Keys here may include wildcards.
    spaces: IndexMap<SpaceNamePattern, SpacePermission>,
}

/// Permission to a single space.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SpacePermission {
    /// Can pull artifacts from the space.
    #[serde(default = "SpacePermission::permission_default")]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    #[serde(rename = "r")]
    #[serde_as(as = "BoolFromInt")]
    pub pull: bool,

    /// Can push artifacts to the space.
    #[serde(default = "SpacePermission::permission_default")]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    #[serde(rename = "w")]
    #[serde_as(as = "BoolFromInt")]
    pub push: bool,

    /// Can delete artifacts from the space.
    #[serde(default = "SpacePermission::permission_default")]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    #[serde(rename = "d")]
    #[serde_as(as = "BoolFromInt")]
    pub delete: bool,
}

pub type Result<T> = std::result::Result<T, Error>;

/// An access error.
#[derive(Debug, Display)]
#[ignore_extra_doc_attributes]
pub enum Error {
    /// User has no permission to this space.
    NoDiscoveryPermission,

    /// User does not have permission to complete this action.
    ///
    /// This implies that there is some permission granted to the
    /// user, so the user is authorized to discover the space.
    PermissionDenied,

    /// JWT error: {0}
    TokenError(jwt_simple::Error),

    /// Base64 decode error: {0}
    Base64Error(base64::DecodeError),
}

impl Token {
    /// Verifies and decodes a token.
    pub fn from_jwt(token: &str, key: &HS256Key) -> Result<Self> {
        let opts = VerificationOptions {
            accept_future: false,
            ..Default::default()
        };

        key.verify_token(token, Some(opts))
            .map_err(Error::TokenError)
            .map(Token)
    }

    /// Creates a new token with an expiration timestamp.
    pub fn new(sub: String, exp: &DateTime<Utc>) -> Self {
        let claims = TokenClaims {
            depot_ns: Default::default(),
        };

        Self(JWTClaims {
            issued_at: None,
            expires_at: Some(UnixTimeStamp::from_secs(
                exp.timestamp().try_into().unwrap(),
            )),
            invalid_before: None,
            issuer: None,
            subject: Some(sub),
            audiences: None,
            jwt_id: None,
            nonce: None,
            custom: claims,
        })
    }

    /// Returns a copy of this token expiring at a new timestamp.
    ///
    /// The container token endpoint uses this to mint short-lived
    /// tokens out of a longer-lived session.
    pub fn with_expiration(&self, exp: &DateTime<Utc>) -> Self {
        let mut claims = self.0.clone();
        claims.expires_at = Some(UnixTimeStamp::from_secs(
            exp.timestamp().try_into().unwrap(),
        ));

        Self(claims)
    }

    /// Encodes the token.
    pub fn encode(&self, key: &HS256Key) -> Result<String> {
        key.authenticate(self.0.clone()).map_err(Error::TokenError)
    }

    /// Returns the subject of the token.
    pub fn sub(&self) -> Option<&str> {
        self.0.subject.as_deref()
    }

    /// Returns the claims as a serializable value.
    pub fn opaque_claims(&self) -> &impl Serialize {
        &self.0
    }

    /// Returns a mutable reference to a permission entry.
    pub fn get_or_insert_permission_mut(
        &mut self,
        pattern: SpaceNamePattern,
    ) -> &mut SpacePermission {
        use indexmap::map::Entry;

        let access = self.depot_access_mut();
        match access.spaces.entry(pattern) {
            Entry::Occupied(v) => v.into_mut(),
            Entry::Vacant(v) => v.insert(SpacePermission::default()),
        }
    }

    /// Returns explicit permission granted for a space.
    pub fn get_permission_for_space(&self, space: &SpaceName) -> SpacePermission {
        let access = self.depot_access();

        let pattern_key = space.to_pattern();
        if let Some(direct_match) = access.spaces.get(&pattern_key) {
            return direct_match.clone();
        }

        for (pattern, permission) in access.spaces.iter() {
            if pattern.matches(space) {
                return permission.clone();
            }
        }

        SpacePermission::default()
    }

    fn depot_access(&self) -> &DepotAccess {
        &self.0.custom.depot_ns
    }

    fn depot_access_mut(&mut self) -> &mut DepotAccess {
        &mut self.0.custom.depot_ns
    }
}

impl SpacePermission {
    /// Returns whether the user is allowed to discover this space.
    pub fn can_discover(&self) -> bool {
        self.push || self.pull || self.delete
    }

    require_permission_function!(require_pull, "pull", pull);
    require_permission_function!(require_push, "push", push);
    require_permission_function!(require_delete, "delete", delete);

    fn permission_default() -> bool {
        false
    }
}

impl StdError for Error {}
