//! Deadline arithmetic that cannot overflow.

use std::time::Duration;

use tokio::time::Instant;

/// Roughly 30 years; the point used in place of an unrepresentable deadline.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `start + timeout`, saturating to a far-future instant instead of panicking
/// when the sum does not fit in an [`Instant`].
pub fn deadline_after(start: Instant, timeout: Duration) -> Instant {
    start
        .checked_add(timeout)
        .or_else(|| start.checked_add(FAR_FUTURE))
        .unwrap_or(start)
}
