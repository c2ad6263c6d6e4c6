//! Classifies a provider failure as retryable or not, for `APIError`
//! emission (§4.3 step 5, §7's error taxonomy table).
//!
//! Grounded in the teacher's `openai_compat.rs` HTTP-status-to-`Error`
//! mapping: rate-limit/quota/billing/transient-network failures are
//! retryable, auth/invalid-key/malformed-request failures are not.

/// The outcome of classifying a provider-reported failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub error_type: &'static str,
    pub retryable: bool,
}

/// Classify a lower-cased error message (or HTTP reason phrase) into an
/// error type and retryability. Falls back to a non-retryable `"unknown"`
/// classification when nothing matches, which is the conservative choice
/// for ending the conversation rather than looping on an error we don't
/// understand.
pub fn classify(message: &str) -> Classification {
    let lower = message.to_lowercase();

    if lower.contains("rate limit") || lower.contains("429") || lower.contains("too many requests")
    {
        return Classification {
            error_type: "rate_limit",
            retryable: true,
        };
    }
    if lower.contains("quota") || lower.contains("billing") || lower.contains("insufficient_quota")
    {
        return Classification {
            error_type: "quota",
            retryable: true,
        };
    }
    if lower.contains("timeout")
        || lower.contains("connection reset")
        || lower.contains("503")
        || lower.contains("502")
        || lower.contains("temporarily unavailable")
    {
        return Classification {
            error_type: "transient_network",
            retryable: true,
        };
    }
    if lower.contains("unauthorized")
        || lower.contains("invalid api key")
        || lower.contains("401")
        || lower.contains("403")
    {
        return Classification {
            error_type: "auth",
            retryable: false,
        };
    }
    if lower.contains("invalid request") || lower.contains("400") || lower.contains("malformed") {
        return Classification {
            error_type: "invalid_request",
            retryable: false,
        };
    }

    Classification {
        error_type: "unknown",
        retryable: false,
    }
}
