use async_trait::async_trait;
use std::future::Future;
use std::sync::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::aggregate::{Aggregator, CommitReport};
use crate::broker::{Broker, Event};
use crate::error::AppError;
use crate::reading::Reading;
use crate::window::{RollingWindow, WindowEntry};

/// Destination for decoded readings: the local pipeline or a remote forwarder.
#[async_trait]
pub trait ReadingSink: Send + Sync {
    async fn accept(&self, reading: Reading) -> Result<(), AppError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApplyOutcome {
    pub window_appended: bool,
    pub report: CommitReport,
    pub notified: usize,
}

/// Shared ingestion state: live window, tiered history and notifications.
pub struct Pipeline {
    window: Mutex<RollingWindow>,
    latest: RwLock<Option<Reading>>,
    aggregator: Aggregator,
    broker: Broker,
}

impl Pipeline {
    pub fn new(aggregator: Aggregator, broker: Broker) -> Self {
        Self {
            window: Mutex::new(RollingWindow::new()),
            latest: RwLock::new(None),
            aggregator,
            broker,
        }
    }

    /// Feed one reading through window, tiers and broker.
    /// Returns `None` for a reading that carries no register at all.
    pub async fn apply(&self, reading: Reading) -> Option<ApplyOutcome> {
        if reading.is_empty() {
            debug!(ts = %reading.timestamp, "empty reading ignored");
            return None;
        }

        let window_appended = match reading.power {
            Some(power) => self
                .window
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .append(reading.timestamp, power),
            None => false,
        };

        let report = self.aggregator.record(&reading).await;

        *self.latest.write().unwrap_or_else(|p| p.into_inner()) = Some(reading);

        let payload = serde_json::to_string(&reading).unwrap_or_else(|_| "reload".into());
        let notified = self.broker.publish(Event::update(payload));

        debug!(
            ts = %reading.timestamp,
            window_appended,
            committed = ?report.committed,
            notified,
            "reading applied"
        );
        Some(ApplyOutcome {
            window_appended,
            report,
            notified,
        })
    }

    pub fn window_snapshot(&self) -> Vec<WindowEntry> {
        self.window
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .snapshot()
    }

    /// Most recent reading seen since startup
    pub fn latest(&self) -> Option<Reading> {
        *self.latest.read().unwrap_or_else(|p| p.into_inner())
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }
}

#[async_trait]
impl ReadingSink for Pipeline {
    async fn accept(&self, reading: Reading) -> Result<(), AppError> {
        self.apply(reading).await;
        Ok(())
    }
}

/// Background ingestion with an explicit stop signal; joined on shutdown.
pub struct IngestionTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<Result<(), AppError>>,
}

impl IngestionTask {
    pub fn spawn<F, Fut>(name: &'static str, run: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = Result<(), AppError>> + Send + 'static,
    {
        let (shutdown, rx) = watch::channel(false);
        let fut = run(rx);
        let handle = tokio::spawn(async move {
            info!(source = name, "ingestion started");
            let res = fut.await;
            match &res {
                Ok(()) => info!(source = name, "ingestion stopped"),
                Err(e) => warn!(source = name, error = %e, "ingestion ended with error"),
            }
            res
        });
        Self { shutdown, handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal the task to stop and wait for it.
    pub async fn stop(self) -> Result<(), AppError> {
        // the task may already be gone, in which case nobody is listening
        let _ = self.shutdown.send(true);
        self.handle.await.map_err(join_error)?
    }

    /// Run until the task ends by itself or `signal` fires, whichever is first.
    pub async fn run_until<S>(mut self, signal: S) -> Result<(), AppError>
    where
        S: Future<Output = ()>,
    {
        let finished = tokio::select! {
            _ = signal => None,
            res = &mut self.handle => Some(res),
        };
        match finished {
            Some(res) => res.map_err(join_error)?,
            None => self.stop().await,
        }
    }
}

fn join_error(e: tokio::task::JoinError) -> AppError {
    AppError::Other(anyhow::anyhow!("ingestion task panicked: {}", e))
}

/// Resolves once the shutdown flag is raised or its sender is gone.
pub async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::repositories::{SqliteTierStore, TierStore};
    use crate::tier::Tier;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Arc;

    async fn pipeline() -> (Pipeline, Arc<SqliteTierStore>) {
        let pool = db::connect("sqlite::memory:").await.unwrap();
        db::ensure_schema(&pool).await.unwrap();
        let store = Arc::new(SqliteTierStore::new(pool));
        let agg = Aggregator::restore(store.clone()).await;
        (Pipeline::new(agg, Broker::new()), store)
    }

    #[tokio::test]
    async fn test_empty_reading_is_noop() {
        let (p, store) = pipeline().await;
        let mut sub = p.broker().subscribe();
        assert!(p.apply(Reading::new(Utc::now(), None, None, None)).await.is_none());
        assert!(sub.try_recv().is_none());
        assert!(p.window_snapshot().is_empty());
        assert!(p.latest().is_none());
        assert!(store.latest_raw().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_power_only_reading_updates_window() {
        let (p, store) = pipeline().await;
        let out = p
            .apply(Reading::new(Utc::now(), None, None, Some(321.0)))
            .await
            .unwrap();
        assert!(out.window_appended);
        assert!(out.report.is_empty());
        assert_eq!(p.window_snapshot()[0].power, 321.0);
        assert!(store.latest_raw().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_apply_reaches_every_component() {
        let (p, store) = pipeline().await;
        let mut sub = p.broker().subscribe();
        let t0 = Utc.with_ymd_and_hms(2024, 2, 1, 9, 30, 0).unwrap();

        let out = p
            .apply(Reading::new(t0, Some(10.0), Some(20.0), Some(150.0)))
            .await
            .unwrap();
        assert!(out.report.is_committed(Tier::Month));
        assert_eq!(out.notified, 1);
        assert_eq!(sub.try_recv().unwrap().name.as_deref(), Some("update"));

        let out = p
            .apply(Reading::new(t0 + Duration::seconds(5), Some(10.1), Some(20.0), Some(160.0)))
            .await
            .unwrap();
        assert!(!out.window_appended);
        assert_eq!(out.report.committed, vec![Tier::Raw]);
        assert_eq!(p.latest().unwrap().power, Some(160.0));
        assert_eq!(store.recent(Tier::Raw, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_task_stops_on_signal() {
        let task = IngestionTask::spawn("test", |mut rx| async move {
            shutdown_requested(&mut rx).await;
            Ok(())
        });
        assert!(!task.is_finished());
        task.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_run_until_stops_on_signal() {
        let task = IngestionTask::spawn("test", |mut rx| async move {
            shutdown_requested(&mut rx).await;
            Ok(())
        });
        task.run_until(async {}).await.unwrap();
    }

    #[tokio::test]
    async fn test_run_until_returns_when_task_ends() {
        let task = IngestionTask::spawn("eof", |_rx| async move {
            Err(AppError::Transport("device stream closed".into()))
        });
        let res = task.run_until(std::future::pending()).await;
        assert!(matches!(res, Err(AppError::Transport(_))));
    }

    #[tokio::test]
    async fn test_task_error_surfaces_on_stop() {
        let task = IngestionTask::spawn("failing", |_rx| async move {
            Err(AppError::Transport("device unplugged".into()))
        });
        assert!(matches!(task.stop().await, Err(AppError::Transport(_))));
    }
}
