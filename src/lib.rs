//! Availability monitor for a sports-facility booking portal.
//!
//! Polls the portal's day schedule on an interval, remembers each watched
//! lesson's last observed status, and pushes a notification when a full or
//! almost-full lesson opens up. Monitoring state survives restarts through a
//! small SQLite-backed store. An embedding host supplies the portal session
//! implementation and drives everything through [`MonitorController`].

pub mod models;
pub mod monitor;
pub mod notify;
pub mod provider;
pub mod settings;
pub mod store;
pub mod utils;

pub use models::{LessonSnapshot, LessonStatus, MonitorConfig, NotifyMethod, SessionRecord};
pub use monitor::{MonitorController, StartOutcome, StartRequest, StatusReport, StopOutcome};
pub use notify::{NotificationService, Notifier};
pub use provider::{PortalConnector, PortalSession};
pub use settings::{EmailRelay, NotifySettings};
pub use store::StateStore;
