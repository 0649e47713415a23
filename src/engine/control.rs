//! Control plane: follows the activity log, runs the periodic scan, resumes
//! deferred executions.
//!
//! The bus only wakes the loop. Activities are read back from the store past
//! a cursor, so a lagging receiver delays evaluation but never skips it.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Notify, Semaphore};
use tracing::{error, info, warn};

use super::scan::Scanner;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::model::Activity;
use crate::workflow::WorkflowEngine;

/// Activities read from the log per store round trip.
const CATCH_UP_BATCH: usize = 256;

/// The control plane loop: evaluate activities as they arrive, scan on a
/// fixed interval.
#[derive(Clone)]
pub struct ControlPlane {
    engine: WorkflowEngine,
    scanner: Scanner,
    config: EngineConfig,
    shutdown: Arc<Notify>,
    permits: Arc<Semaphore>,
}

impl ControlPlane {
    pub fn new(engine: WorkflowEngine) -> Self {
        let config = engine.config().clone();
        Self {
            scanner: Scanner::new(engine.clone()),
            permits: Arc::new(Semaphore::new(config.max_concurrent_evaluations)),
            shutdown: Arc::new(Notify::new()),
            engine,
            config,
        }
    }

    /// Signal the control plane to shut down.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Run until shutdown. In-flight evaluations are drained before return.
    pub async fn run(&self) -> Result<()> {
        let log = self.engine.pipeline().activity_log();
        let mut events = log.subscribe();
        let mut cursor = log.head().await?;
        let mut ticker = tokio::time::interval(self.config.scan_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            max_concurrent = self.config.max_concurrent_evaluations,
            "control plane started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("control plane shutting down");
                    break;
                }
                event = events.recv() => match event {
                    Ok(_) => self.catch_up(&mut cursor).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, cursor, "activity bus lagged, catching up from the log");
                        self.catch_up(&mut cursor).await;
                    }
                    Err(RecvError::Closed) => {
                        info!("activity bus closed");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    self.catch_up(&mut cursor).await;
                    self.tick().await;
                }
            }
        }

        self.drain().await;
        Ok(())
    }

    /// Dispatch every activity appended past `cursor`, advancing it.
    async fn catch_up(&self, cursor: &mut u64) {
        let log = self.engine.pipeline().activity_log();
        loop {
            let batch = match log.after(*cursor, CATCH_UP_BATCH).await {
                Ok(batch) => batch,
                Err(e) => {
                    error!(cursor = *cursor, "activity log read error: {e}");
                    return;
                }
            };
            let Some(&(last, _)) = batch.last() else {
                return;
            };
            for (_, activity) in batch {
                self.dispatch(activity).await;
            }
            *cursor = last;
        }
    }

    /// Evaluate one activity on its own task, bounded by the semaphore.
    async fn dispatch(&self, activity: Activity) {
        let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
            return;
        };
        let engine = self.engine.clone();
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = engine.evaluate_event(&activity).await {
                error!(activity_id = %activity.id, "evaluate_event error: {e}");
            }
        });
    }

    async fn tick(&self) {
        let now = Utc::now();
        if let Err(e) = self.scanner.scan(now).await {
            error!("scan error: {e}");
        }
        if let Err(e) = self.engine.run_due(now).await {
            error!("run_due error: {e}");
        }
    }

    async fn drain(&self) {
        let all = u32::try_from(self.config.max_concurrent_evaluations).unwrap_or(u32::MAX);
        if self.permits.acquire_many(all).await.is_err() {
            warn!("semaphore closed before in-flight evaluations drained");
        }
    }
}
