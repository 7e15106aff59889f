use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, NaiveDate, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::{MonitorConfig, NotifyMethod, SessionRecord};
use crate::notify::Notifier;
use crate::provider::PortalConnector;
use crate::store::StateStore;

use super::loop_worker::monitor_loop;

/// Bound on how long stopping waits for the loop to observe cancellation.
const STOP_JOIN_TIMEOUT_SECS: u64 = 5;

fn default_interval() -> u32 {
    5
}

/// Incoming start parameters, as the API layer hands them over.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub user_id: String,
    pub secret: String,
    pub date: String,
    #[serde(default = "default_interval")]
    pub interval: u32,
    #[serde(default)]
    pub notify_method: NotifyMethod,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub line_token: Option<String>,
    #[serde(default)]
    pub selected_lessons: Vec<usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOutcome {
    pub active: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopOutcome {
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub active: bool,
    pub timestamp: DateTime<Utc>,
}

struct RunningMonitor {
    session_id: String,
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the monitoring session's lifecycle: at most one engine loop runs at
/// a time, and durable state always reflects the session that should survive
/// a restart.
#[derive(Clone)]
pub struct MonitorController {
    store: StateStore,
    connector: Arc<dyn PortalConnector>,
    notifier: Arc<dyn Notifier>,
    running: Arc<Mutex<Option<RunningMonitor>>>,
}

impl MonitorController {
    pub fn new(
        store: StateStore,
        connector: Arc<dyn PortalConnector>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            connector,
            notifier,
            running: Arc::new(Mutex::new(None)),
        }
    }

    /// Validate, supersede any running session, spawn the engine and persist
    /// the new session.
    pub async fn start(&self, request: StartRequest) -> Result<StartOutcome> {
        let config = validate_request(request)?;
        self.halt_running().await;

        let watched = config.watched_indices.len();
        let interval = config.interval_minutes;
        let record = SessionRecord {
            config,
            started_at: Utc::now(),
        };

        self.spawn_monitor(record.config.clone()).await;
        self.store
            .save(&record)
            .await
            .context("failed to persist monitoring state")?;

        Ok(StartOutcome {
            active: true,
            message: format!("monitoring started (every {interval}m, {watched} lessons watched)"),
        })
    }

    /// Stop the running session, if any, and clear durable state either way.
    pub async fn stop(&self) -> Result<StopOutcome> {
        let was_running = self.halt_running().await;
        self.store
            .clear()
            .await
            .context("failed to clear monitoring state")?;

        Ok(StopOutcome {
            message: if was_running {
                "monitoring stopped".into()
            } else {
                "no monitoring session was active".into()
            },
        })
    }

    pub async fn status(&self) -> StatusReport {
        let guard = self.running.lock().await;
        let active = guard
            .as_ref()
            .map(|monitor| !monitor.handle.is_finished())
            .unwrap_or(false);

        StatusReport {
            active,
            timestamp: Utc::now(),
        }
    }

    /// Resume the persisted session after a restart. A record targeting a
    /// date other than today is stale and is discarded without resuming.
    pub async fn recover_on_startup(&self) -> Result<()> {
        let Some(record) = self
            .store
            .load()
            .await
            .context("failed to load persisted monitoring state")?
        else {
            return Ok(());
        };

        let today = Local::now().date_naive();
        if record.config.target_date != today {
            info!(
                "discarding stale monitoring state for {} (today is {})",
                record.config.target_date, today
            );
            self.store
                .clear()
                .await
                .context("failed to clear stale monitoring state")?;
            return Ok(());
        }

        info!(
            "resuming monitoring for {} ({} lessons watched)",
            record.config.target_date,
            record.config.watched_indices.len()
        );
        self.spawn_monitor(record.config).await;
        Ok(())
    }

    async fn spawn_monitor(&self, config: MonitorConfig) {
        let session_id = Uuid::new_v4().to_string();
        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(monitor_loop(
            config,
            self.connector.clone(),
            self.notifier.clone(),
            cancel_token.clone(),
        ));

        info!("monitoring session {session_id} spawned");

        let mut guard = self.running.lock().await;
        *guard = Some(RunningMonitor {
            session_id,
            cancel_token,
            handle,
        });
    }

    /// Cancel the running loop and wait (bounded) for it to exit. Returns
    /// whether a session was running.
    async fn halt_running(&self) -> bool {
        let Some(monitor) = self.running.lock().await.take() else {
            return false;
        };

        monitor.cancel_token.cancel();
        match tokio::time::timeout(
            Duration::from_secs(STOP_JOIN_TIMEOUT_SECS),
            monitor.handle,
        )
        .await
        {
            Ok(Ok(())) => info!("monitoring session {} stopped", monitor.session_id),
            Ok(Err(join_err)) => warn!(
                "monitoring session {} task failed: {join_err}",
                monitor.session_id
            ),
            Err(_) => warn!(
                "monitoring session {} did not stop within {}s; proceeding anyway",
                monitor.session_id, STOP_JOIN_TIMEOUT_SECS
            ),
        }
        true
    }
}

/// Watching zero specific lessons is rejected here by policy, even though
/// the engine itself treats an empty set as watch-all.
fn validate_request(request: StartRequest) -> Result<MonitorConfig> {
    if request.user_id.trim().is_empty() || request.secret.trim().is_empty() {
        bail!("portal credentials are required");
    }

    let target_date = NaiveDate::parse_from_str(request.date.trim(), "%Y-%m-%d")
        .with_context(|| format!("invalid target date '{}'", request.date))?;

    if request.interval == 0 {
        bail!("polling interval must be at least one minute");
    }

    if request.selected_lessons.is_empty() {
        bail!("select at least one lesson to watch");
    }

    Ok(MonitorConfig {
        user_id: request.user_id,
        secret: request.secret,
        target_date,
        notify_method: request.notify_method,
        email: request.email,
        line_token: request.line_token,
        interval_minutes: request.interval,
        watched_indices: request.selected_lessons,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::testing::{lesson, RecordingNotifier, ScriptedConnector};
    use crate::models::LessonStatus;
    use chrono::Days;

    fn request(user_id: &str, date: &str) -> StartRequest {
        StartRequest {
            user_id: user_id.into(),
            secret: "hunter2".into(),
            date: date.into(),
            interval: 1,
            notify_method: NotifyMethod::None,
            email: None,
            line_token: None,
            selected_lessons: vec![0],
        }
    }

    fn controller(dir: &tempfile::TempDir) -> (MonitorController, Arc<ScriptedConnector>) {
        let store = StateStore::new(dir.path().join("state.sqlite3")).unwrap();
        let connector = ScriptedConnector::serving(vec![lesson(0, LessonStatus::Full)]);
        let notifier = RecordingNotifier::new();
        (
            MonitorController::new(store.clone(), connector.clone(), notifier),
            connector,
        )
    }

    #[tokio::test]
    async fn start_rejects_missing_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, connector) = controller(&dir);

        let mut bad = request("", "2025-06-01");
        bad.secret = String::new();
        assert!(controller.start(bad).await.is_err());
        assert!(!controller.status().await.active);
        assert_eq!(connector.connects(), 0);
    }

    #[tokio::test]
    async fn start_rejects_unparseable_date() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, _) = controller(&dir);
        assert!(controller.start(request("member-1", "06/01/2025")).await.is_err());
        assert!(controller.start(request("member-1", "")).await.is_err());
    }

    #[tokio::test]
    async fn start_rejects_zero_interval_and_empty_watch_set() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, _) = controller(&dir);

        let mut zero_interval = request("member-1", "2025-06-01");
        zero_interval.interval = 0;
        assert!(controller.start(zero_interval).await.is_err());

        let mut nothing_watched = request("member-1", "2025-06-01");
        nothing_watched.selected_lessons = vec![];
        assert!(controller.start(nothing_watched).await.is_err());
    }

    #[tokio::test]
    async fn start_runs_and_persists_then_stop_clears() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.sqlite3")).unwrap();
        let connector = ScriptedConnector::serving(vec![]);
        let controller = MonitorController::new(
            store.clone(),
            connector.clone(),
            RecordingNotifier::new(),
        );

        let outcome = controller.start(request("member-1", "2025-06-01")).await.unwrap();
        assert!(outcome.active);
        assert!(controller.status().await.active);

        let saved = store.load().await.unwrap().unwrap();
        assert_eq!(saved.config.user_id, "member-1");
        assert_eq!(saved.config.watched_indices, vec![0]);

        connector.wait_for_connects(1).await;

        let stopped = controller.stop().await.unwrap();
        assert_eq!(stopped.message, "monitoring stopped");
        assert!(!controller.status().await.active);
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn restart_supersedes_the_running_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.sqlite3")).unwrap();
        let connector = ScriptedConnector::serving(vec![]);
        let controller = MonitorController::new(
            store.clone(),
            connector.clone(),
            RecordingNotifier::new(),
        );

        controller.start(request("first", "2025-06-01")).await.unwrap();
        connector.wait_for_connects(1).await;

        controller.start(request("second", "2025-06-02")).await.unwrap();
        connector.wait_for_connects(2).await;

        assert!(controller.status().await.active);
        let saved = store.load().await.unwrap().unwrap();
        assert_eq!(saved.config.user_id, "second");

        controller.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_without_a_session_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, _) = controller(&dir);

        let stopped = controller.stop().await.unwrap();
        assert_eq!(stopped.message, "no monitoring session was active");
        assert!(!controller.status().await.active);
    }

    #[tokio::test]
    async fn recovery_resumes_a_session_targeting_today() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.sqlite3")).unwrap();
        let connector = ScriptedConnector::serving(vec![]);
        let controller = MonitorController::new(
            store.clone(),
            connector.clone(),
            RecordingNotifier::new(),
        );

        let today = Local::now().date_naive();
        let record = SessionRecord {
            config: MonitorConfig {
                user_id: "member-1".into(),
                secret: "hunter2".into(),
                target_date: today,
                notify_method: NotifyMethod::None,
                email: None,
                line_token: None,
                interval_minutes: 1,
                watched_indices: vec![0],
            },
            started_at: Utc::now(),
        };
        store.save(&record).await.unwrap();

        controller.recover_on_startup().await.unwrap();

        assert!(controller.status().await.active);
        connector.wait_for_connects(1).await;
        // the record stays persisted for the next restart
        assert!(store.load().await.unwrap().is_some());

        controller.stop().await.unwrap();
    }

    #[tokio::test]
    async fn recovery_discards_a_stale_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.sqlite3")).unwrap();
        let connector = ScriptedConnector::serving(vec![]);
        let controller = MonitorController::new(
            store.clone(),
            connector.clone(),
            RecordingNotifier::new(),
        );

        let yesterday = Local::now().date_naive().checked_sub_days(Days::new(1)).unwrap();
        let record = SessionRecord {
            config: MonitorConfig {
                user_id: "member-1".into(),
                secret: "hunter2".into(),
                target_date: yesterday,
                notify_method: NotifyMethod::None,
                email: None,
                line_token: None,
                interval_minutes: 1,
                watched_indices: vec![0],
            },
            started_at: Utc::now(),
        };
        store.save(&record).await.unwrap();

        controller.recover_on_startup().await.unwrap();

        assert!(!controller.status().await.active);
        assert_eq!(store.load().await.unwrap(), None);
        assert_eq!(connector.connects(), 0);
    }

    #[tokio::test]
    async fn recovery_with_empty_store_does_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, connector) = controller(&dir);

        controller.recover_on_startup().await.unwrap();

        assert!(!controller.status().await.active);
        assert_eq!(connector.connects(), 0);
    }

    #[test]
    fn start_request_deserializes_from_camel_case() {
        let request: StartRequest = serde_json::from_str(
            r#"{
                "userId": "member-1",
                "secret": "hunter2",
                "date": "2025-06-01",
                "notifyMethod": "line",
                "lineToken": "token-abc",
                "selectedLessons": [0, 2]
            }"#,
        )
        .unwrap();

        assert_eq!(request.user_id, "member-1");
        assert_eq!(request.interval, 5);
        assert_eq!(request.notify_method, NotifyMethod::Line);
        assert_eq!(request.selected_lessons, vec![0, 2]);
        assert_eq!(request.email, None);
    }
}
