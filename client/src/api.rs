//! HTTP client for the booking calls.
//!
//! Request and response bodies are defined here once and shared with the
//! server.

use crate::error::ApiError;
use bookwell_booking::{
    Booking, BookingId, BookingMessage, BookingRating, BookingStats, BookingStatus, Location,
    ParticipantId, Schedule, ServiceId,
};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Reason sent by [`BookingApi::cancel`]
pub const CANCEL_REASON: &str = "Cancelled by user";

/// Body of `POST /api/bookings`. The requester is the caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateBookingRequest {
    pub fulfiller_id: ParticipantId,
    pub service_id: ServiceId,
    pub schedule: Schedule,
    pub location: Location,
    pub quoted_cents: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<String>,
}

/// Answer of `GET /api/bookings/:id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BookingView {
    pub booking: Booking,
    /// Statuses the caller may move the booking to
    pub allowed_transitions: Vec<BookingStatus>,
}

/// Answer of `GET /api/bookings`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BookingList {
    pub message: String,
    /// Newest first
    pub bookings: Vec<Booking>,
}

/// Answer of `GET /api/bookings/stats`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatsResponse {
    pub message: String,
    pub stats: BookingStats,
}

/// Body of `PUT /api/bookings/:id/status`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: BookingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Answer of `PUT /api/bookings/:id/status`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdateResponse {
    pub message: String,
    pub booking: Booking,
}

/// Body of `POST /api/bookings/:id/message`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRequest {
    pub message: String,
}

/// Answer of `POST /api/bookings/:id/message`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
    pub message_data: BookingMessage,
}

/// Body of `POST /api/bookings/:id/rating`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingRequest {
    pub rating: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Answer of `POST /api/bookings/:id/rating`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RatingResponse {
    pub message: String,
    pub rating: BookingRating,
}

/// Error body the server sends with every non-2xx answer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Typed client for the booking endpoints.
///
/// Every call carries the bearer credential; a 401 answer surfaces as
/// [`ApiError::CredentialExpired`] so the caller can hand it to
/// [`Session::observe`](crate::Session::observe).
#[derive(Clone)]
pub struct BookingApi {
    http: reqwest::Client,
    base_url: String,
    credential: String,
}

impl std::fmt::Debug for BookingApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookingApi")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl BookingApi {
    /// Client for the server at `base_url` (e.g. `http://127.0.0.1:8080`)
    #[must_use]
    pub fn new(base_url: impl Into<String>, credential: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, credential)
    }

    /// Same, reusing an existing connection pool
    #[must_use]
    pub fn with_client(
        http: reqwest::Client,
        base_url: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credential: credential.into(),
        }
    }

    async fn call<B, T>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{path}", self.base_url);
        tracing::debug!(%method, %url, "Booking API call");

        let mut request = self
            .http
            .request(method, url)
            .bearer_auth(&self.credential);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        decode(status, &bytes)
    }

    /// Create a pending booking.
    ///
    /// # Errors
    ///
    /// See [`ApiError`].
    pub async fn create(&self, request: &CreateBookingRequest) -> Result<Booking, ApiError> {
        self.call(Method::POST, "/api/bookings", Some(request)).await
    }

    /// The booking plus the transitions available to the caller.
    ///
    /// # Errors
    ///
    /// See [`ApiError`].
    pub async fn get(&self, id: BookingId) -> Result<BookingView, ApiError> {
        self.call::<(), _>(Method::GET, &format!("/api/bookings/{id}"), None)
            .await
    }

    /// Every booking the caller is a party to, newest first.
    ///
    /// # Errors
    ///
    /// See [`ApiError`].
    pub async fn list(&self) -> Result<Vec<Booking>, ApiError> {
        let response: BookingList = self
            .call::<(), _>(Method::GET, "/api/bookings", None)
            .await?;
        Ok(response.bookings)
    }

    /// Per-status counts of the caller's bookings.
    ///
    /// # Errors
    ///
    /// See [`ApiError`].
    pub async fn stats(&self) -> Result<BookingStats, ApiError> {
        let response: StatsResponse = self
            .call::<(), _>(Method::GET, "/api/bookings/stats", None)
            .await?;
        Ok(response.stats)
    }

    /// Request a status change.
    ///
    /// # Errors
    ///
    /// [`ApiError::Rejected`] with `INVALID_TRANSITION` or `UNAUTHORIZED`
    /// when the change is not allowed; otherwise see [`ApiError`].
    pub async fn update_status(
        &self,
        id: BookingId,
        status: BookingStatus,
        reason: Option<&str>,
    ) -> Result<StatusUpdateResponse, ApiError> {
        let body = StatusUpdateRequest {
            status,
            reason: reason.map(str::to_string),
        };
        self.call(Method::PUT, &format!("/api/bookings/{id}/status"), Some(&body))
            .await
    }

    /// Cancel with the stock reason.
    ///
    /// # Errors
    ///
    /// As [`update_status`](Self::update_status).
    pub async fn cancel(&self, id: BookingId) -> Result<StatusUpdateResponse, ApiError> {
        self.update_status(id, BookingStatus::Cancelled, Some(CANCEL_REASON))
            .await
    }

    /// Post to the booking's thread.
    ///
    /// # Errors
    ///
    /// See [`ApiError`].
    pub async fn add_message(&self, id: BookingId, text: &str) -> Result<BookingMessage, ApiError> {
        let body = MessageRequest {
            message: text.to_string(),
        };
        let response: MessageResponse = self
            .call(Method::POST, &format!("/api/bookings/{id}/message"), Some(&body))
            .await?;
        Ok(response.message_data)
    }

    /// Rate a completed booking.
    ///
    /// # Errors
    ///
    /// [`ApiError::Rejected`] with `NOT_COMPLETED`, `DUPLICATE_RATING` or
    /// `INVALID_RATING_VALUE`; otherwise see [`ApiError`].
    pub async fn add_rating(
        &self,
        id: BookingId,
        rating: i32,
        comment: Option<&str>,
    ) -> Result<BookingRating, ApiError> {
        let body = RatingRequest {
            rating,
            comment: comment.map(str::to_string),
        };
        let response: RatingResponse = self
            .call(Method::POST, &format!("/api/bookings/{id}/rating"), Some(&body))
            .await?;
        Ok(response.rating)
    }
}

/// Map a raw answer to the call's result.
fn decode<T: DeserializeOwned>(status: StatusCode, body: &[u8]) -> Result<T, ApiError> {
    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiError::CredentialExpired);
    }
    if !status.is_success() {
        return Err(match serde_json::from_slice::<ErrorBody>(body) {
            Ok(ErrorBody { code, message }) => ApiError::Rejected {
                status: status.as_u16(),
                code,
                message,
            },
            Err(_) => ApiError::Rejected {
                status: status.as_u16(),
                code: "UNKNOWN".into(),
                message: String::from_utf8_lossy(body).into_owned(),
            },
        });
    }
    serde_json::from_slice(body).map_err(|e| ApiError::Decode(e.to_string()))
}
