use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::{error, info, warn};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::models::{LessonSnapshot, LessonStatus, MonitorConfig, NotifyMethod};
use crate::notify::{messages, Notifier};
use crate::provider::{PortalConnector, PortalSession};

/// Shortened wait before retrying after a failed cycle.
const RECOVERY_WAIT_SECS: u64 = 60;

/// Poll the portal until the token is cancelled.
///
/// Cancellation is observed at the cycle boundary and during the inter-cycle
/// wait; an in-flight cycle always runs to completion. The memory of
/// last-observed lesson statuses lives here, owned by this task alone.
pub async fn monitor_loop(
    config: MonitorConfig,
    connector: Arc<dyn PortalConnector>,
    notifier: Arc<dyn Notifier>,
    cancel_token: CancellationToken,
) {
    info!(
        "monitoring started: date={} interval={}m watched={}",
        config.target_date,
        config.interval_minutes,
        if config.watched_indices.is_empty() {
            "all".to_string()
        } else {
            config.watched_indices.len().to_string()
        },
    );

    let mut previous: HashMap<String, LessonSnapshot> = HashMap::new();

    loop {
        if cancel_token.is_cancelled() {
            break;
        }

        let wait = match run_cycle(&config, connector.as_ref(), notifier.as_ref(), &mut previous)
            .await
        {
            Ok(checked) => {
                info!("cycle complete: {checked} watched lessons checked");
                Duration::from_secs(u64::from(config.interval_minutes) * 60)
            }
            Err(err) => {
                error!("monitoring cycle failed: {err:?}");
                Duration::from_secs(RECOVERY_WAIT_SECS)
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = cancel_token.cancelled() => break,
        }
    }

    info!("monitoring stopped");
}

async fn run_cycle(
    config: &MonitorConfig,
    connector: &dyn PortalConnector,
    notifier: &dyn Notifier,
    previous: &mut HashMap<String, LessonSnapshot>,
) -> Result<usize> {
    let mut session = connector
        .connect()
        .await
        .context("failed to open portal session")?;

    // Close before diffing, whatever the fetch outcome.
    let fetched = fetch_current(session.as_mut(), config).await;
    session.close().await;
    let lessons = fetched?;

    let watched = select_watched(&lessons, &config.watched_indices);
    let checked = watched.len();
    for lesson in watched {
        check_and_notify(config, notifier, previous, lesson).await;
    }

    Ok(checked)
}

async fn fetch_current(
    session: &mut dyn PortalSession,
    config: &MonitorConfig,
) -> Result<Vec<LessonSnapshot>> {
    let logged_in = session
        .authenticate(&config.user_id, &config.secret)
        .await
        .context("portal login attempt failed")?;
    if !logged_in {
        bail!("portal rejected credentials for {}", config.user_id);
    }

    session
        .fetch_lessons(config.target_date)
        .await
        .context("failed to fetch lesson list")
}

/// Empty index list watches every lesson; out-of-range indices are skipped.
fn select_watched<'a>(lessons: &'a [LessonSnapshot], indices: &[usize]) -> Vec<&'a LessonSnapshot> {
    if indices.is_empty() {
        return lessons.iter().collect();
    }
    indices
        .iter()
        .filter_map(|&index| lessons.get(index))
        .collect()
}

async fn check_and_notify(
    config: &MonitorConfig,
    notifier: &dyn Notifier,
    previous: &mut HashMap<String, LessonSnapshot>,
    lesson: &LessonSnapshot,
) {
    match previous.get(&lesson.id) {
        Some(seen) => {
            let opened = matches!(seen.status, LessonStatus::Full | LessonStatus::AlmostFull)
                && lesson.status == LessonStatus::Available;
            if opened {
                info!(
                    "slot opened: {} {} ({} -> {})",
                    lesson.time,
                    lesson.name,
                    seen.status.as_str(),
                    lesson.status.as_str()
                );
                let body = messages::opened(lesson, seen.status);
                dispatch(config, notifier, messages::OPENED_SUBJECT, &body).await;
            }
        }
        None => {
            if lesson.status == LessonStatus::Available {
                info!(
                    "already open on first observation: {} {}",
                    lesson.time, lesson.name
                );
                let body = messages::initial(lesson);
                dispatch(config, notifier, messages::INITIAL_SUBJECT, &body).await;
            }
        }
    }

    previous.insert(lesson.id.clone(), lesson.clone());
}

async fn dispatch(config: &MonitorConfig, notifier: &dyn Notifier, subject: &str, body: &str) {
    let delivered = notifier
        .notify(config.notify_method, config.notify_address(), subject, body)
        .await;
    if !delivered && config.notify_method != NotifyMethod::None {
        warn!(
            "{} notification was not delivered",
            config.notify_method.as_str()
        );
    }
}
