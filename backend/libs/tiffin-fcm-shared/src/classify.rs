//! Delivery-failure classification.
//!
//! Every per-token delivery error is sorted into one of three buckets which
//! drive what the dispatcher does next: permanently invalid tokens are
//! removed from storage, transient failures are retried within a bound, and
//! anything unrecognized is logged and left alone rather than risk a
//! duplicate delivery.

use crate::errors::FcmError;

/// Classification of a single failed delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// The provider will never again accept this token; remove it.
    PermanentInvalid,
    /// Provider-side or transport trouble; safe to retry.
    TransientRetryable,
    /// Unrecognized failure; do not retry automatically.
    Unknown,
}

/// FCM v1 error codes that mean the token is dead.
///
/// `INVALID_ARGUMENT` is deliberately absent: FCM also returns it for a
/// malformed payload, and pruning on it would delete every token in a batch
/// over a request-shaping bug. It only counts as permanent when the message
/// text says the token itself is at fault.
const PERMANENT_CODES: &[&str] = &["UNREGISTERED", "SENDER_ID_MISMATCH"];

/// FCM v1 error codes that mean the provider (not the token) had trouble.
const TRANSIENT_CODES: &[&str] = &["UNAVAILABLE", "INTERNAL", "QUOTA_EXCEEDED"];

/// Classify a delivery error into permanent / transient / unknown.
pub fn classify(error: &FcmError) -> DeliveryFailure {
    match error {
        // The request never reached a verdict on the token. Only an explicit
        // provider error may mark a token invalid.
        FcmError::Timeout | FcmError::Http(_) | FcmError::Token(_) => {
            DeliveryFailure::TransientRetryable
        }

        FcmError::Api {
            status,
            error_code,
            message,
        } => {
            if let Some(code) = error_code.as_deref() {
                if PERMANENT_CODES.contains(&code) {
                    return DeliveryFailure::PermanentInvalid;
                }
                if TRANSIENT_CODES.contains(&code) {
                    return DeliveryFailure::TransientRetryable;
                }
            }

            if looks_unregistered(message) {
                return DeliveryFailure::PermanentInvalid;
            }

            // A 400 whose message does not implicate the token stays
            // Unknown; it is more likely our request than their device.
            match status {
                404 => DeliveryFailure::PermanentInvalid,
                429 | 500..=599 => DeliveryFailure::TransientRetryable,
                _ => DeliveryFailure::Unknown,
            }
        }

        FcmError::Credentials(_) | FcmError::Response(_) => DeliveryFailure::Unknown,
    }
}

/// Text patterns the provider uses for dead tokens, across API generations.
fn looks_unregistered(error: &str) -> bool {
    let lower = error.to_lowercase();

    lower.contains("unregistered")
        || lower.contains("not registered")
        || lower.contains("notregistered")
        || (lower.contains("invalid") && (lower.contains("token") || lower.contains("registration")))
        || lower.contains("baddevicetoken")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_err(status: u16, code: Option<&str>, message: &str) -> FcmError {
        FcmError::Api {
            status,
            error_code: code.map(String::from),
            message: message.to_string(),
        }
    }

    #[test]
    fn unregistered_token_is_always_permanent() {
        let err = api_err(404, Some("UNREGISTERED"), "Requested entity was not found.");
        assert_eq!(classify(&err), DeliveryFailure::PermanentInvalid);

        // Legacy wording without a structured code.
        let err = api_err(200, None, "registration token not registered");
        assert_eq!(classify(&err), DeliveryFailure::PermanentInvalid);
    }

    #[test]
    fn server_unavailable_is_always_transient() {
        let err = api_err(503, Some("UNAVAILABLE"), "server unavailable");
        assert_eq!(classify(&err), DeliveryFailure::TransientRetryable);

        let err = FcmError::Http("server unavailable".to_string());
        assert_eq!(classify(&err), DeliveryFailure::TransientRetryable);
    }

    #[test]
    fn timeout_never_invalidates_a_token() {
        assert_eq!(
            classify(&FcmError::Timeout),
            DeliveryFailure::TransientRetryable
        );
    }

    #[test]
    fn quota_and_internal_are_transient() {
        assert_eq!(
            classify(&api_err(429, Some("QUOTA_EXCEEDED"), "quota exceeded")),
            DeliveryFailure::TransientRetryable
        );
        assert_eq!(
            classify(&api_err(500, Some("INTERNAL"), "internal error")),
            DeliveryFailure::TransientRetryable
        );
    }

    #[test]
    fn unrecognized_failures_are_unknown() {
        assert_eq!(
            classify(&api_err(403, Some("THIRD_PARTY_AUTH_ERROR"), "apns auth")),
            DeliveryFailure::Unknown
        );
        assert_eq!(
            classify(&FcmError::Response("mystery body".to_string())),
            DeliveryFailure::Unknown
        );
    }

    #[test]
    fn invalid_argument_is_permanent_only_when_the_token_is_at_fault() {
        let err = api_err(
            400,
            Some("INVALID_ARGUMENT"),
            "The registration token is not a valid FCM registration token",
        );
        assert_eq!(classify(&err), DeliveryFailure::PermanentInvalid);

        // The same code for a malformed payload must not prune tokens.
        let err = api_err(
            400,
            Some("INVALID_ARGUMENT"),
            "Invalid JSON payload received. Unknown name \"badge\" at 'message.android'",
        );
        assert_eq!(classify(&err), DeliveryFailure::Unknown);

        let err = api_err(400, None, "Request contains an invalid argument.");
        assert_eq!(classify(&err), DeliveryFailure::Unknown);
    }

    #[test]
    fn bare_status_codes_follow_http_semantics() {
        assert_eq!(
            classify(&api_err(404, None, "Requested entity was not found.")),
            DeliveryFailure::PermanentInvalid
        );
        assert_eq!(
            classify(&api_err(503, None, "try again later")),
            DeliveryFailure::TransientRetryable
        );
    }
}
