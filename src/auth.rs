//! Principal extraction and capability checks.
//!
//! The authentication collaborator hands the core a verified principal
//! `{id, role}`; here that means verifying the `Authorization: Bearer`
//! JWT and stashing the principal in request extensions. Authorization is
//! a single capability-check function rather than a family of per-role
//! middleware factories.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::AppError;
use crate::review::state::UserId;
use crate::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Moderator,
    User,
}

/// A verified caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: UserId,
    pub role: Role,
}

/// What an endpoint requires of its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Submit contributions and read one's own records.
    SubmitContributions,
    /// Move contributions through the review lifecycle and read any
    /// record.
    ReviewContributions,
}

/// The single authorization gate: does `principal` hold `capability`?
pub fn authorize(principal: &Principal, capability: Capability) -> Result<(), AppError> {
    let allowed = match capability {
        Capability::SubmitContributions => true,
        Capability::ReviewContributions => {
            matches!(principal.role, Role::Admin | Role::Moderator)
        }
    };
    if allowed {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "role {:?} cannot review contributions",
            principal.role
        )))
    }
}

/// JWT claims the service understands.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Principal identifier.
    pub sub: String,
    pub role: Role,
    /// Expiry, seconds since the epoch.
    pub exp: usize,
}

/// Verifies HS256 bearer tokens against the shared secret.
#[derive(Clone)]
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Verify a bearer token and produce the principal it names.
    pub fn verify(&self, token: &str) -> Result<Principal, jsonwebtoken::errors::Error> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)?;
        Ok(Principal {
            id: UserId(data.claims.sub),
            role: data.claims.role,
        })
    }
}

/// Middleware for authenticated routes: verify the bearer token, run the
/// rate guard keyed by the principal, then expose the principal to
/// handlers via request extensions.
///
/// Missing or invalid credentials are a plain 401 before the typed error
/// taxonomy applies; admission denials map to 429 with Retry-After.
pub async fn require_principal(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, Response> {
    let token = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| StatusCode::UNAUTHORIZED.into_response())?;

    let principal = state.token_verifier.verify(token).map_err(|e| {
        warn!("rejected bearer token: {}", e);
        StatusCode::UNAUTHORIZED.into_response()
    })?;

    if let Err(e) = state.rate_guard.admit(&principal.id.0).await {
        return Err(e.into_response());
    }

    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}
