//! Business metrics for the booking server.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `bookwell_bookings_created_total` - Bookings requested
//! - `bookwell_transitions_total{to}` - Status changes by target status
//! - `bookwell_messages_total` - Thread messages posted
//! - `bookwell_ratings_total` - Ratings submitted
//! - `bookwell_events_published_total{kind}` - Domain events handed to the hub
//! - `bookwell_events_publish_failures_total{kind}` - Domain events the hub refused
//! - `bookwell_events_delivered_total{category}` - Socket deliveries
//! - `bookwell_http_errors_total{code}` - Error responses by code
//!
//! ## Gauges
//! - `bookwell_ws_connections` - Open WebSocket connections

use metrics::{describe_counter, describe_gauge};

/// Register descriptions for every business metric.
///
/// Call once at startup, after the exporter is installed.
pub fn register_business_metrics() {
    describe_counter!("bookwell_bookings_created_total", "Total number of bookings requested");
    describe_counter!(
        "bookwell_transitions_total",
        "Total number of booking status changes, by target status"
    );
    describe_counter!("bookwell_messages_total", "Total number of thread messages posted");
    describe_counter!("bookwell_ratings_total", "Total number of ratings submitted");

    describe_counter!(
        "bookwell_events_published_total",
        "Domain events handed to the room hub, by kind"
    );
    describe_counter!(
        "bookwell_events_publish_failures_total",
        "Domain events the room hub could not route, by kind"
    );
    describe_counter!(
        "bookwell_events_delivered_total",
        "Events written to WebSocket connections, by category"
    );
    describe_gauge!("bookwell_ws_connections", "Current number of open WebSocket connections");

    describe_counter!("bookwell_http_errors_total", "HTTP error responses, by error code");

    tracing::info!("Business metrics registered");
}
