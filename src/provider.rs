use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::models::LessonSnapshot;

/// One authenticated visit to the booking portal.
///
/// A session is connected fresh for every poll cycle and closed when the
/// cycle ends, success or not; nothing is reused across cycles. The concrete
/// implementation (browser automation against the portal) lives with the
/// embedding host.
#[async_trait]
pub trait PortalSession: Send {
    /// Log in with the member credentials. `Ok(false)` means the portal
    /// rejected the credentials; an error means the attempt itself failed.
    async fn authenticate(&mut self, user_id: &str, secret: &str) -> Result<bool>;

    /// Fetch the ordered lesson list for one calendar date.
    async fn fetch_lessons(&mut self, date: NaiveDate) -> Result<Vec<LessonSnapshot>>;

    /// Release the underlying portal connection. Must not fail.
    async fn close(&mut self);
}

/// Hands out fresh portal sessions, one per poll cycle.
#[async_trait]
pub trait PortalConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn PortalSession>>;
}
