//! Mapping of HTTP statuses and transport failures onto [`AppError`].

use crate::{error::AppError, http::TransportError};

/// Classify a non-success HTTP status.
pub fn from_status(status: u16) -> AppError {
    match status {
        429 => AppError::api("Too many requests. Please wait a moment and try again.", true),
        500..=599 => AppError::api(format!("Service unavailable ({status})"), true),
        404 => AppError::api("Service endpoint not found, this may be temporary", true),
        403 => AppError::api("Access forbidden", false),
        401 => AppError::api("Authentication required", false),
        400..=499 => AppError::user("Invalid request. Please check your input and try again."),
        _ => AppError::api(format!("Unexpected error ({status})"), true),
    }
}

/// Classify a typed transport failure.
pub fn from_transport(err: &TransportError) -> AppError {
    let classified = match err {
        TransportError::Timeout => AppError::network("Request timed out. Please try again."),
        TransportError::Connect(_) => {
            AppError::network("Network error. Please check your internet connection.")
        }
        TransportError::Dns(_) => {
            let message = "Could not resolve the service address. Please check your connection.";
            AppError::network(message)
        }
        TransportError::Opaque(message) => return from_message(message).with_cause(err.clone()),
    };
    classified.with_cause(err.clone())
}

/// Best-effort classification of an error known only by its message.
///
/// Rules are checked in order and the first match wins, so a message that
/// mentions both "network" and "cors" classifies as a network failure.
pub fn from_message(message: &str) -> AppError {
    let lower = message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["failed to fetch", "network error"]) {
        AppError::network("Network error. Please check your internet connection.")
    } else if has(&["timeout", "timed out", "aborted"]) {
        AppError::network("Request timed out. Please try again.")
    } else if has(&["cors", "cross-origin"]) {
        AppError::api("The service refused a cross-origin request", false)
    } else if has(&["dns", "name resolution"]) {
        AppError::network("Could not resolve the service address. Please check your connection.")
    } else {
        AppError::network("A network error occurred. Please try again.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn status_table() {
        let cases: &[(u16, ErrorKind, bool)] = &[
            (429, ErrorKind::Api, true),
            (500, ErrorKind::Api, true),
            (503, ErrorKind::Api, true),
            (404, ErrorKind::Api, true),
            (403, ErrorKind::Api, false),
            (401, ErrorKind::Api, false),
            (400, ErrorKind::User, false),
            (422, ErrorKind::User, false),
            (302, ErrorKind::Api, true),
        ];

        for &(status, kind, retryable) in cases {
            let err = from_status(status);
            assert_eq!(err.kind(), kind, "status {status}");
            assert_eq!(err.is_retryable(), retryable, "status {status}");
        }
    }

    #[test]
    fn server_error_message_carries_status() {
        assert!(from_status(502).message().contains("502"));
        assert!(from_status(302).message().contains("302"));
    }

    #[test]
    fn message_rules_first_match_wins() {
        let err = from_message("Network error while doing CORS preflight");
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(err.is_retryable());

        let err = from_message("Blocked by CORS policy");
        assert_eq!(err.kind(), ErrorKind::Api);
        assert!(!err.is_retryable());

        let err = from_message("DNS lookup failed");
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(err.message().contains("resolve"));

        let err = from_message("operation was ABORTED");
        assert!(err.message().contains("timed out"));

        let err = from_message("something odd");
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(err.is_retryable());
    }

    #[test]
    fn typed_transport_errors_skip_substring_matching() {
        let err = from_transport(&TransportError::Connect("cors mentioned here".into()));
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(err.cause().is_some());

        let err = from_transport(&TransportError::Timeout);
        assert!(err.message().contains("timed out"));

        // Cancellation has no typed variant; it reaches the timeout rule by message.
        let err = from_transport(&TransportError::Opaque("request was aborted".into()));
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(err.message().contains("timed out"));
        assert!(err.cause().is_some());

        let err = from_transport(&TransportError::Opaque("cross-origin denied".into()));
        assert_eq!(err.kind(), ErrorKind::Api);
        assert!(!err.is_retryable());
    }
}
