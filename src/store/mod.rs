use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use log::{error, info};
use rusqlite::{params, Connection};
use tokio::sync::oneshot;

mod migrations;

use migrations::run_migrations;

use crate::models::{MonitorConfig, NotifyMethod, SessionRecord};

type StoreTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum StoreCommand {
    Execute(StoreTask),
    Shutdown,
}

struct StateStoreInner {
    sender: mpsc::Sender<StoreCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for StateStoreInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(StoreCommand::Shutdown) {
                error!("Failed to send shutdown to store thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join store thread: {join_err:?}");
            }
        }
    }
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| anyhow!("invalid datetime '{value}': {err}"))
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|err| anyhow!("invalid date '{value}': {err}"))
}

fn method_from_str(value: &str) -> Result<NotifyMethod> {
    match value {
        "email" => Ok(NotifyMethod::Email),
        "line" => Ok(NotifyMethod::Line),
        "none" => Ok(NotifyMethod::None),
        _ => Err(anyhow!("unknown notify method '{value}'")),
    }
}

/// Durable single-slot storage for the active monitoring session.
///
/// All SQLite access runs on a dedicated worker thread; async callers submit
/// closures and await the reply.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<StateStoreInner>,
    db_path: Arc<PathBuf>,
}

impl StateStore {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create state directory {}", parent.display())
            })?;
        }

        let (command_tx, command_rx) = mpsc::channel::<StoreCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("slotwatch-store".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open SQLite state store")));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }
                if let Err(err) = conn.pragma_update(None, "foreign_keys", "ON") {
                    error!("Failed to enable foreign keys: {err}");
                }

                let init_result =
                    run_migrations(&mut conn).context("failed to run state store migrations");
                if ready_tx.send(init_result).is_err() {
                    error!("Store initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        StoreCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        StoreCommand::Shutdown => break,
                    }
                }

                info!("State store thread shutting down");
            })
            .with_context(|| "failed to spawn state store worker thread")?;

        ready_rx
            .recv()
            .context("state store worker exited before signaling readiness")??;

        info!("State store initialized at {}", db_path.as_path().display());

        Ok(Self {
            inner: Arc::new(StateStoreInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = StoreCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("Store caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to store thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("state store thread terminated unexpectedly"))?
    }

    /// Overwrite the single session slot. The delete and insert share one
    /// transaction, so a concurrent reader never observes a partial record.
    pub async fn save(&self, record: &SessionRecord) -> Result<()> {
        let record = record.clone();
        self.execute(move |conn| {
            let selected = serde_json::to_string(&record.config.watched_indices)
                .context("failed to encode selected lessons")?;

            let tx = conn
                .transaction()
                .context("failed to open save transaction")?;
            tx.execute("DELETE FROM monitor_session", [])
                .context("failed to clear previous monitoring state")?;
            tx.execute(
                "INSERT INTO monitor_session
                 (slot, user_id, secret, date, notify_method, interval, email, line_token, selected_lessons, started_at)
                 VALUES (0, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.config.user_id,
                    record.config.secret,
                    record.config.target_date.format("%Y-%m-%d").to_string(),
                    record.config.notify_method.as_str(),
                    i64::from(record.config.interval_minutes),
                    record.config.email,
                    record.config.line_token,
                    selected,
                    record.started_at.to_rfc3339(),
                ],
            )
            .context("failed to insert monitoring state")?;
            tx.commit().context("failed to commit monitoring state")
        })
        .await
    }

    pub async fn load(&self) -> Result<Option<SessionRecord>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, secret, date, notify_method, interval, email, line_token, selected_lessons, started_at
                 FROM monitor_session
                 WHERE slot = 0",
            )?;

            let mut rows = stmt.query([])?;
            let Some(row) = rows.next()? else {
                return Ok(None);
            };

            let interval = row.get::<_, i64>(4)?;
            let record = SessionRecord {
                config: MonitorConfig {
                    user_id: row.get(0)?,
                    secret: row.get(1)?,
                    target_date: parse_date(&row.get::<_, String>(2)?)?,
                    notify_method: method_from_str(&row.get::<_, String>(3)?)?,
                    interval_minutes: u32::try_from(interval)
                        .map_err(|_| anyhow!("interval {interval} out of range"))?,
                    email: row.get(5)?,
                    line_token: row.get(6)?,
                    watched_indices: serde_json::from_str(&row.get::<_, String>(7)?)
                        .context("failed to decode selected lessons")?,
                },
                started_at: parse_datetime(&row.get::<_, String>(8)?)?,
            };

            Ok(Some(record))
        })
        .await
    }

    pub async fn clear(&self) -> Result<()> {
        self.execute(|conn| {
            conn.execute("DELETE FROM monitor_session", [])
                .context("failed to clear monitoring state")?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(user_id: &str) -> SessionRecord {
        SessionRecord {
            config: MonitorConfig {
                user_id: user_id.into(),
                secret: "hunter2".into(),
                target_date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
                notify_method: NotifyMethod::Line,
                email: None,
                line_token: Some("token-abc".into()),
                interval_minutes: 5,
                watched_indices: vec![0, 2, 7],
            },
            started_at: Utc.with_ymd_and_hms(2025, 6, 1, 8, 30, 0).unwrap(),
        }
    }

    fn open_store(dir: &tempfile::TempDir) -> StateStore {
        StateStore::new(dir.path().join("state.sqlite3")).unwrap()
    }

    #[tokio::test]
    async fn load_on_fresh_store_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        let saved = record("member-1");
        store.save(&saved).await.unwrap();

        assert_eq!(store.load().await.unwrap(), Some(saved));
    }

    #[tokio::test]
    async fn save_overwrites_previous_slot() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        store.save(&record("first")).await.unwrap();
        store.save(&record("second")).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.config.user_id, "second");
    }

    #[tokio::test]
    async fn clear_removes_the_slot() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        store.save(&record("member-1")).await.unwrap();
        store.clear().await.unwrap();

        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn state_survives_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let saved = record("member-1");

        let path = {
            let store = open_store(&dir);
            store.save(&saved).await.unwrap();
            store.path().to_path_buf()
        };

        let reopened = StateStore::new(path).unwrap();
        assert_eq!(reopened.load().await.unwrap(), Some(saved));
    }
}
