use async_trait::async_trait;

use crate::models::NotifyMethod;

pub mod messages;
mod service;

pub use service::NotificationService;

/// Delivery boundary for availability alerts.
///
/// Implementations report delivery success as `true`. A `none` method or a
/// missing address is a quiet no-op returning `false`, never an error.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        method: NotifyMethod,
        address: Option<&str>,
        subject: &str,
        body: &str,
    ) -> bool;
}
