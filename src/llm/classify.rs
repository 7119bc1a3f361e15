//! Transient / permanent error classification
//!
//! A transient response is retried with backoff inside the adapter; a
//! permanent one surfaces to the caller immediately.

use super::types::LlmResponse;

/// Case-folded substrings that mark a failed response as transient
const TRANSIENT_MARKERS: &[&str] = &[
    "rate limit",
    "overloaded",
    "429",
    "529",
    "503",
    "502",
    "connection",
    "timed out",
    "request timeout",
    "econnreset",
    "socket hang up",
];

/// Classify a response as transient
///
/// A response is transient iff its error flag is set and one of the marker
/// substrings appears in the result text. Additionally, a zero-cost response
/// whose text contains both `exceeded` and `limit` is transient: the
/// provider never answered. That second rule is a workaround for
/// provider-specific behaviour; keep it narrow.
pub fn is_transient(response: &LlmResponse) -> bool {
    let folded = response.result.to_lowercase();

    if !response.success && TRANSIENT_MARKERS.iter().any(|m| folded.contains(m)) {
        return true;
    }

    response.cost == 0.0 && folded.contains("exceeded") && folded.contains("limit")
}

/// True when the failure looks like a timeout, which earns the longer
/// backoff before retrying
pub fn is_timeout_like(response: &LlmResponse) -> bool {
    let folded = response.result.to_lowercase();
    folded.contains("exceeded") || folded.contains("timed out") || folded.contains("request timeout")
}
