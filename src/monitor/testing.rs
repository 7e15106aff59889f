use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc, Mutex,
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::models::{LessonSnapshot, LessonStatus, MonitorConfig, NotifyMethod};
use crate::notify::Notifier;
use crate::provider::{PortalConnector, PortalSession};

pub(crate) fn lesson(position: usize, status: LessonStatus) -> LessonSnapshot {
    LessonSnapshot {
        id: format!("panel_{}", position + 1),
        time: "10:30".into(),
        name: format!("Lesson {}", position + 1),
        status,
    }
}

pub(crate) fn test_config() -> MonitorConfig {
    MonitorConfig {
        user_id: "member-1".into(),
        secret: "hunter2".into(),
        target_date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
        notify_method: NotifyMethod::None,
        email: None,
        line_token: None,
        interval_minutes: 1,
        watched_indices: vec![],
    }
}

#[derive(Debug, Clone)]
pub(crate) enum CycleOutcome {
    Lessons(Vec<LessonSnapshot>),
    AuthRejected,
    FetchError,
}

/// Scripted portal: each connect serves the next scripted outcome, then the
/// fallback once the script runs out.
pub(crate) struct ScriptedConnector {
    script: Mutex<VecDeque<CycleOutcome>>,
    fallback: CycleOutcome,
    connects: AtomicU32,
}

impl ScriptedConnector {
    pub(crate) fn scripted(script: Vec<CycleOutcome>, fallback: CycleOutcome) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            connects: AtomicU32::new(0),
        })
    }

    pub(crate) fn serving(lessons: Vec<LessonSnapshot>) -> Arc<Self> {
        Self::scripted(vec![], CycleOutcome::Lessons(lessons))
    }

    pub(crate) fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Yield until at least `count` sessions were connected. Panics rather
    /// than spinning forever when the loop never gets there.
    pub(crate) async fn wait_for_connects(&self, count: u32) {
        for _ in 0..10_000 {
            if self.connects() >= count {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("timed out waiting for {count} portal connects");
    }
}

#[async_trait]
impl PortalConnector for ScriptedConnector {
    async fn connect(&self) -> Result<Box<dyn PortalSession>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        Ok(Box::new(ScriptedSession { outcome }))
    }
}

struct ScriptedSession {
    outcome: CycleOutcome,
}

#[async_trait]
impl PortalSession for ScriptedSession {
    async fn authenticate(&mut self, _user_id: &str, _secret: &str) -> Result<bool> {
        match self.outcome {
            CycleOutcome::AuthRejected => Ok(false),
            _ => Ok(true),
        }
    }

    async fn fetch_lessons(&mut self, _date: NaiveDate) -> Result<Vec<LessonSnapshot>> {
        match &self.outcome {
            CycleOutcome::Lessons(lessons) => Ok(lessons.clone()),
            CycleOutcome::FetchError => bail!("scripted fetch failure"),
            CycleOutcome::AuthRejected => bail!("fetch after rejected login"),
        }
    }

    async fn close(&mut self) {}
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SentNotification {
    pub method: NotifyMethod,
    pub address: Option<String>,
    pub subject: String,
    pub body: String,
}

#[derive(Default)]
pub(crate) struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
}

impl RecordingNotifier {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn deliveries(&self) -> Vec<SentNotification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        method: NotifyMethod,
        address: Option<&str>,
        subject: &str,
        body: &str,
    ) -> bool {
        self.sent.lock().unwrap().push(SentNotification {
            method,
            address: address.map(str::to_string),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        method != NotifyMethod::None && address.is_some()
    }
}
