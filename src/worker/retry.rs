//! Error classification for task retries.
//!
//! Every failed attempt is retried up to the configured limit regardless of
//! class; classification feeds logs and metrics so an operator can tell a
//! flaky API server from a chart that will never come up.

/// Classifies errors observed during provisioning and teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Temporary infrastructure failure (network, API 5xx, timeout)
    Transient,
    /// Unlikely to succeed on retry (auth, validation, chart failure)
    Permanent,
    /// Anything else
    Unknown,
}

/// Classify an error message for retry reporting
pub fn classify_error(error: &str) -> ErrorClass {
    let error_lower = error.to_lowercase();

    if error_lower.contains("timed out")
        || error_lower.contains("timeout")
        || error_lower.contains("connection")
        || error_lower.contains("network")
        || error_lower.contains("dns")
        || error_lower.contains("too many requests")
        || error_lower.contains("503")
        || error_lower.contains("502")
        || error_lower.contains("temporarily unavailable")
        || error_lower.contains("etcdserver")
    {
        return ErrorClass::Transient;
    }

    if error_lower.contains("unauthorized")
        || error_lower.contains("forbidden")
        || error_lower.contains("invalid")
        || error_lower.contains("job woocommerce-install failed")
    {
        return ErrorClass::Permanent;
    }

    ErrorClass::Unknown
}
