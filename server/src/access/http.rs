//! HTTP middlewares for access control.

use axum::{extract::Request, middleware::Next, response::Response};
use tokio::sync::OnceCell;

use crate::access::{SpacePermission, Token};
use crate::{RequestState, State};
use depot::name::SpaceName;
use depot_token::util::parse_authorization_header;

/// Auth state.
#[derive(Debug)]
pub struct AuthState {
    /// The JWT token.
    pub token: OnceCell<Token>,
}

impl AuthState {
    /// Returns an auth state with no authenticated user and no permissions.
    pub fn new() -> Self {
        Self {
            token: OnceCell::new(),
        }
    }

    /// Returns the username if it exists.
    ///
    /// Currently it's the `sub` claim of the JWT.
    pub fn username(&self) -> Option<&str> {
        self.token.get().and_then(|token| token.sub())
    }

    /// Returns whether a valid token was presented.
    pub fn is_authenticated(&self) -> bool {
        self.token.get().is_some()
    }

    /// Returns permission granted for a space.
    pub fn get_permission_for_space(&self, space: &SpaceName) -> SpacePermission {
        if let Some(token) = self.token.get() {
            token.get_permission_for_space(space)
        } else {
            SpacePermission::default()
        }
    }
}

/// Performs auth.
pub async fn apply_auth(req: Request, next: Next) -> Response {
    let token: Option<Token> = req
        .headers()
        .get("Authorization")
        .and_then(|bytes| bytes.to_str().ok())
        .and_then(parse_authorization_header)
        .and_then(|jwt| {
            let state = req.extensions().get::<State>().unwrap();
            let res_token = Token::from_jwt(&jwt, &state.config.token_hs256_secret.jwt);
            if let Err(e) = &res_token {
                tracing::debug!("Ignoring bad JWT token: {}", e);
            }
            res_token.ok()
        });

    if let Some(token) = token {
        let req_state = req.extensions().get::<RequestState>().unwrap();
        req_state.auth.token.set(token).unwrap();
        tracing::trace!("Added valid token");
    }

    next.run(req).await
}
