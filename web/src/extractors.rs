//! Custom Axum extractors.
//!
//! - `BearerToken`: the raw credential from `Authorization: Bearer …`
//! - `Caller`: the participant the credential belongs to
//!
//! # Examples
//!
//! ```ignore
//! async fn handler(caller: Caller, Path(id): Path<BookingId>) -> WebResult<Json<Booking>> {
//!     tracing::info!(participant = %caller.participant, role = %caller.role, "Loading booking");
//!     // ...
//! }
//! ```

use crate::config::TokenGrant;
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
};
use bookwell_booking::{ParticipantId, Role};
use std::collections::HashMap;

/// Bearer credential from the `Authorization` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerToken(pub String);

impl BearerToken {
    fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
        let (scheme, token) = value.split_once(' ')?;
        let token = token.trim();
        if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
            return None;
        }
        Some(Self(token.to_string()))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers)
            .ok_or_else(|| AppError::credential("Missing bearer credential"))
    }
}

/// An authenticated participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub participant: ParticipantId,
    /// Marketplace side the credential was issued for
    pub role: Role,
}

/// Accepted credentials.
#[derive(Debug, Default)]
pub struct TokenDirectory {
    callers: HashMap<String, Caller>,
}

impl TokenDirectory {
    /// Directory holding `grants`; a repeated token keeps its last grant.
    #[must_use]
    pub fn new(grants: impl IntoIterator<Item = TokenGrant>) -> Self {
        let callers = grants
            .into_iter()
            .map(|grant| {
                (
                    grant.token,
                    Caller {
                        participant: grant.participant,
                        role: grant.role,
                    },
                )
            })
            .collect();
        Self { callers }
    }

    /// Who `token` belongs to
    #[must_use]
    pub fn resolve(&self, token: &str) -> Option<Caller> {
        self.callers.get(token).copied()
    }

    /// Number of accepted credentials
    #[must_use]
    pub fn len(&self) -> usize {
        self.callers.len()
    }

    /// No credential is accepted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.callers.is_empty()
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let BearerToken(token) = BearerToken::from_request_parts(parts, state).await?;
        state.tokens.resolve(&token).ok_or_else(|| {
            tracing::debug!("Unknown bearer credential");
            AppError::credential("Credential expired or unknown")
        })
    }
}
