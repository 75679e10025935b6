//! Per-request context passed explicitly through every pipeline stage.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Opaque, unique identifier of one request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(Arc<str>);

impl RequestId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string().into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Request id, deadline and cancellation signal of a single request.
///
/// Created once when the request enters the pipeline and dropped when the
/// response is complete. Stages may tighten the deadline; the terminal
/// handler receives a clone and should stop work once
/// [`cancellation`](RequestContext::cancellation) fires.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: RequestId,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl RequestContext {
    /// Creates a context whose cancellation is tied to `cancel`.
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            request_id: RequestId::generate(),
            deadline: None,
            cancel,
        }
    }

    /// A context not attached to any server-wide shutdown signal.
    pub fn detached() -> Self {
        Self::new(CancellationToken::new())
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Sets the deadline, keeping an earlier one if already present.
    pub fn set_deadline(&mut self, deadline: Instant) {
        self.deadline = Some(match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        });
    }

    /// Time left until the deadline, `None` when no deadline is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn request_ids_are_unique() {
        let ids: HashSet<RequestId> = (0..100_000).map(|_| RequestId::generate()).collect();
        assert_eq!(ids.len(), 100_000);
    }

    #[test]
    fn request_id_displays_as_str() {
        let id = RequestId::generate();
        assert_eq!(id.to_string(), id.as_str());
        assert_eq!(id.as_str().len(), 36);
    }

    #[test]
    fn each_context_gets_its_own_id() {
        let a = RequestContext::detached();
        let b = RequestContext::detached();
        assert_ne!(a.request_id(), b.request_id());
    }

    #[tokio::test(start_paused = true)]
    async fn set_deadline_keeps_the_earlier_one() {
        let mut ctx = RequestContext::detached();
        let now = Instant::now();
        ctx.set_deadline(now + Duration::from_secs(5));
        ctx.set_deadline(now + Duration::from_secs(10));
        assert_eq!(ctx.deadline(), Some(now + Duration::from_secs(5)));

        ctx.set_deadline(now + Duration::from_secs(1));
        assert_eq!(ctx.deadline(), Some(now + Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_counts_down() {
        let mut ctx = RequestContext::detached();
        assert_eq!(ctx.remaining(), None);

        ctx.set_deadline(Instant::now() + Duration::from_secs(3));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(ctx.remaining(), Some(Duration::from_secs(2)));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn cancellation_follows_parent_token() {
        let parent = CancellationToken::new();
        let ctx = RequestContext::new(parent.child_token());
        assert!(!ctx.is_cancelled());
        parent.cancel();
        assert!(ctx.is_cancelled());
    }
}
