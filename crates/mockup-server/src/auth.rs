//! Caller identity.
//!
//! Sign-in happens in front of this service; the auth proxy forwards the
//! authenticated user's id in the `x-user-id` header. The first request of
//! an unknown id provisions a free-tier profile.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use mockup_shared::constants::USER_ID_HEADER;
use mockup_store::Profile;
use uuid::Uuid;

use crate::api::AppState;
use crate::error::ServerError;

/// The authenticated caller's profile.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Profile);

impl AuthUser {
    pub fn id(&self) -> Uuid {
        self.0.id
    }
}

fn user_id(parts: &Parts) -> Option<Uuid> {
    let raw = parts.headers.get(USER_ID_HEADER)?.to_str().ok()?;
    Uuid::parse_str(raw.trim()).ok()
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let id = user_id(parts).ok_or(ServerError::Unauthorized)?;
        let profile = state
            .db
            .lock()
            .await
            .ensure_profile(id, state.config.starting_credits)?;
        Ok(AuthUser(profile))
    }
}
