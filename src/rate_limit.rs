//! Fixed-window rate limiting backed by the rate_limits table.
//!
//! Windows are aligned to `floor(unix_seconds / window) * window`, so every
//! request in the same window hits the same counter row. The counter is
//! bumped with a single upsert, which keeps concurrent requests for the
//! same triple from over-admitting.

use chrono::{DateTime, Utc};
use eyre::{eyre, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db;

/// Outcome of a rate-limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Seconds until the caller should retry (window length when allowed,
    /// time to window end when denied, never below 1).
    pub retry_after: i64,
}

/// Start of the fixed window containing `epoch_seconds`.
pub fn window_start_epoch(epoch_seconds: i64, window_seconds: i64) -> i64 {
    epoch_seconds - epoch_seconds.rem_euclid(window_seconds)
}

/// Check and record one request against the `(user, endpoint)` window.
pub async fn check_rate_limit(
    pool: &PgPool,
    user_id: Uuid,
    endpoint: &str,
    limit: i32,
    window_seconds: i64,
) -> Result<RateDecision> {
    let now = Utc::now();
    let window_epoch = window_start_epoch(now.timestamp(), window_seconds);
    let window_start = DateTime::<Utc>::from_timestamp(window_epoch, 0)
        .ok_or_else(|| eyre!("window start out of range: {}", window_epoch))?;

    let count = db::bump_rate_counter(pool, user_id, endpoint, window_start).await?;

    if count > limit {
        let retry_after = window_epoch + window_seconds - now.timestamp();
        return Ok(RateDecision {
            allowed: false,
            retry_after: retry_after.max(1),
        });
    }

    Ok(RateDecision {
        allowed: true,
        retry_after: window_seconds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_start_alignment() {
        assert_eq!(window_start_epoch(0, 60), 0);
        assert_eq!(window_start_epoch(59, 60), 0);
        assert_eq!(window_start_epoch(60, 60), 60);
        assert_eq!(window_start_epoch(61, 60), 60);
        assert_eq!(window_start_epoch(1_700_000_123, 60), 1_700_000_100);
    }

    #[test]
    fn test_window_start_uneven_window() {
        assert_eq!(window_start_epoch(100, 7), 98);
        assert_eq!(window_start_epoch(98, 7), 98);
        assert_eq!(window_start_epoch(97, 7), 91);
    }
}
