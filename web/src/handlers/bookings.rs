//! Booking endpoints.
//!
//! ```text
//! GET  /api/bookings                bookings the caller is a party to
//! POST /api/bookings                create (requester credentials only)
//! GET  /api/bookings/stats          per-status counts of those bookings
//! GET  /api/bookings/:id            booking + transitions open to the caller
//! PUT  /api/bookings/:id/status     {status, reason?}
//! POST /api/bookings/:id/message    {message}
//! POST /api/bookings/:id/rating     {rating, comment?}
//! ```
//!
//! Every call on a single booking requires the caller to be one of the booking's
//! two parties; the role used for the lifecycle rules is the one the caller
//! holds on that booking.

use crate::error::AppError;
use crate::extractors::Caller;
use crate::middleware::CorrelationId;
use crate::state::AppState;
use crate::WebResult;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use bookwell_booking::lifecycle::available_transitions;
use bookwell_booking::{Booking, BookingId, NewBooking, Role};
use bookwell_client::api::{
    BookingList, BookingView, CreateBookingRequest, MessageRequest, MessageResponse,
    RatingRequest, RatingResponse, StatsResponse, StatusUpdateRequest, StatusUpdateResponse,
};

/// Role `caller` holds on `booking`, or 403.
fn party_role(booking: &Booking, caller: Caller) -> WebResult<Role> {
    booking.role_of(caller.participant).ok_or_else(|| {
        tracing::debug!(
            booking_id = %booking.id,
            participant = %caller.participant,
            "Caller is not a party of the booking"
        );
        AppError::forbidden("You are not a party of this booking")
    })
}

/// Load `id` and check the caller takes part in it.
async fn load_for(state: &AppState, id: BookingId, caller: Caller) -> WebResult<(Booking, Role)> {
    let booking = state.engine.load(id).await?;
    let role = party_role(&booking, caller)?;
    Ok((booking, role))
}

/// Bookings the caller is a party to, newest first.
///
/// # Errors
///
/// 500 when the store fails.
pub async fn list(State(state): State<AppState>, caller: Caller) -> WebResult<Json<BookingList>> {
    let bookings = state.engine.list_for(caller.participant).await?;
    tracing::debug!(participant = %caller.participant, count = bookings.len(), "Listed bookings");
    Ok(Json(BookingList {
        message: "Bookings retrieved successfully".to_string(),
        bookings,
    }))
}

/// Totals, per-status counts and the latest bookings of the caller.
///
/// # Errors
///
/// 500 when the store fails.
pub async fn stats(State(state): State<AppState>, caller: Caller) -> WebResult<Json<StatsResponse>> {
    let stats = state.engine.stats_for(caller.participant).await?;
    Ok(Json(StatsResponse {
        message: "Booking stats retrieved successfully".to_string(),
        stats,
    }))
}

/// Create a pending booking with the caller as requester.
///
/// # Errors
///
/// 403 for fulfiller credentials, 400 `INVALID_BOOKING` for a bad draft.
pub async fn create(
    State(state): State<AppState>,
    caller: Caller,
    correlation_id: CorrelationId,
    Json(request): Json<CreateBookingRequest>,
) -> WebResult<(StatusCode, Json<Booking>)> {
    if caller.role != Role::Requester {
        return Err(AppError::forbidden("Only requesters can create bookings"));
    }
    tracing::info!(correlation_id = %correlation_id.0, requester = %caller.participant, "Creating booking");

    let booking = state
        .engine
        .create(NewBooking {
            requester: caller.participant,
            fulfiller: request.fulfiller_id,
            service: request.service_id,
            schedule: request.schedule,
            location: request.location,
            quoted_cents: request.quoted_cents,
            requirements: request.requirements,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(booking)))
}

/// The booking and the statuses the caller may move it to.
///
/// # Errors
///
/// 404 for an unknown booking, 403 for non-parties.
pub async fn get(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<BookingId>,
) -> WebResult<Json<BookingView>> {
    let (booking, role) = load_for(&state, id, caller).await?;
    let allowed_transitions = available_transitions(booking.status, role);
    Ok(Json(BookingView {
        booking,
        allowed_transitions,
    }))
}

/// Request a status change.
///
/// # Errors
///
/// 400 `INVALID_TRANSITION` for an edge outside the lifecycle, 403
/// `UNAUTHORIZED` when the caller's role may not take it.
pub async fn update_status(
    State(state): State<AppState>,
    caller: Caller,
    correlation_id: CorrelationId,
    Path(id): Path<BookingId>,
    Json(request): Json<StatusUpdateRequest>,
) -> WebResult<Json<StatusUpdateResponse>> {
    let (_, role) = load_for(&state, id, caller).await?;
    tracing::info!(
        correlation_id = %correlation_id.0,
        booking_id = %id,
        %role,
        target = %request.status,
        "Status change requested"
    );

    let (booking, change) = state
        .engine
        .request_transition(id, role, request.status, request.reason)
        .await?;

    Ok(Json(StatusUpdateResponse {
        message: format!("Booking {}", change.to),
        booking,
    }))
}

/// Post to the booking's thread.
///
/// # Errors
///
/// 400 `EMPTY_MESSAGE` for blank text.
pub async fn add_message(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<BookingId>,
    Json(request): Json<MessageRequest>,
) -> WebResult<Json<MessageResponse>> {
    load_for(&state, id, caller).await?;
    let message = state
        .thread
        .add_message(id, caller.participant, &request.message)
        .await?;

    Ok(Json(MessageResponse {
        message: "Message sent".to_string(),
        message_data: message,
    }))
}

/// Rate a completed booking.
///
/// # Errors
///
/// 400 with `NOT_COMPLETED`, `DUPLICATE_RATING` or `INVALID_RATING_VALUE`.
pub async fn add_rating(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<BookingId>,
    Json(request): Json<RatingRequest>,
) -> WebResult<Json<RatingResponse>> {
    load_for(&state, id, caller).await?;
    let rating = state
        .thread
        .add_rating(id, caller.participant, request.rating, request.comment)
        .await?;

    Ok(Json(RatingResponse {
        message: "Rating submitted".to_string(),
        rating,
    }))
}
