//! Monitoring scheduler
//!
//! Runs the ingestion cycle on a fixed interval in a dedicated task and owns
//! the mailbox authentication state that gates it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use qs_core::ItemStore;
use qs_email::MailboxClient;

use crate::error::{Result, ScheduleError};
use crate::pipeline::{CycleReport, CycleRunner};

/// Handle to the running monitor task
struct SchedulerHandle {
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal shutdown and wait for the in-flight cycle, if any, to finish
    async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.handle.await {
            warn!("Monitor task ended abnormally: {}", e);
        }
    }
}

/// Clears `running` when the monitor task ends, panics included
struct RunningGuard(Arc<MonitorState>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct MonitorState {
    running: AtomicBool,
    cycles_completed: AtomicU64,
    last_cycle: RwLock<Option<CycleReport>>,
}

impl MonitorState {
    fn record(&self, report: CycleReport) {
        self.cycles_completed.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_cycle.write() {
            *last = Some(report);
        }
    }

    fn last_cycle(&self) -> Option<CycleReport> {
        self.last_cycle.read().ok().and_then(|r| r.clone())
    }
}

/// Snapshot returned by [`MonitoringScheduler::status`]
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub running: bool,
    pub interval_secs: u64,
    pub cycles_completed: u64,
    pub last_cycle: Option<CycleReport>,
    pub items_processed_today: u64,
}

/// Periodic driver of the ingestion pipeline
pub struct MonitoringScheduler {
    runner: Arc<dyn CycleRunner>,
    mailbox: Arc<dyn MailboxClient>,
    store: ItemStore,
    interval: Duration,
    state: Arc<MonitorState>,
    handle: Mutex<Option<SchedulerHandle>>,
}

impl MonitoringScheduler {
    pub fn new(
        runner: Arc<dyn CycleRunner>,
        mailbox: Arc<dyn MailboxClient>,
        store: ItemStore,
        interval: Duration,
    ) -> Self {
        Self {
            runner,
            mailbox,
            store,
            interval,
            state: Arc::new(MonitorState::default()),
            handle: Mutex::new(None),
        }
    }

    pub fn mailbox(&self) -> &Arc<dyn MailboxClient> {
        &self.mailbox
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    /// Start periodic cycles. Returns `false` when already running.
    ///
    /// Fails with [`ScheduleError::NotAuthenticated`] while the mailbox has no
    /// usable token.
    pub async fn start(&self) -> Result<bool> {
        if !self.mailbox.is_authenticated().await {
            return Err(ScheduleError::NotAuthenticated);
        }

        let mut slot = self.handle.lock().await;
        match slot.take() {
            Some(previous) if previous.handle.is_finished() => {
                warn!("Previous monitor task exited unexpectedly, restarting");
                previous.stop().await;
            }
            Some(live) => {
                *slot = Some(live);
                return Ok(false);
            }
            None => {}
        }

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
        let runner = Arc::clone(&self.runner);
        let state = Arc::clone(&self.state);
        let interval = self.interval;

        state.running.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(async move {
            let _running = RunningGuard(Arc::clone(&state));
            info!("Email monitoring started (every {:?})", interval);

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => {
                        info!("Shutdown requested for email monitoring");
                        break;
                    }
                    _ = ticker.tick() => {
                        // runs to completion; shutdown is only observed between cycles
                        let report = runner.run_cycle().await;
                        state.record(report);
                    }
                }
            }

            info!("Email monitoring stopped");
        });

        *slot = Some(SchedulerHandle { shutdown_tx, handle });
        Ok(true)
    }

    /// Start only if the mailbox is already authenticated (process boot)
    pub async fn start_if_authenticated(&self) -> Result<bool> {
        match self.start().await {
            Err(ScheduleError::NotAuthenticated) => {
                info!("Mailbox not authenticated; monitoring waits for login");
                Ok(false)
            }
            other => other,
        }
    }

    /// Stop future cycles and wait for an in-flight one. Returns `false` when
    /// not running.
    pub async fn stop(&self) -> bool {
        let mut slot = self.handle.lock().await;
        let Some(handle) = slot.take() else {
            return false;
        };
        handle.stop().await;
        self.state.running.store(false, Ordering::SeqCst);
        true
    }

    /// Exchange an OAuth code and begin monitoring
    pub async fn complete_login(&self, code: &str) -> Result<()> {
        self.mailbox.authenticate(code).await?;
        self.start().await?;
        Ok(())
    }

    /// Stop monitoring, then drop the stored token
    pub async fn logout(&self) -> Result<()> {
        self.stop().await;
        self.mailbox.logout().await?;
        Ok(())
    }

    /// Read-only snapshot; `items_processed_today` counts from UTC midnight
    pub fn status(&self) -> Result<MonitorStatus> {
        let items_processed_today = self.store.count_processed_since(utc_midnight(Utc::now()))?;
        Ok(MonitorStatus {
            running: self.is_running(),
            interval_secs: self.interval.as_secs(),
            cycles_completed: self.state.cycles_completed.load(Ordering::SeqCst),
            last_cycle: self.state.last_cycle(),
            items_processed_today,
        })
    }
}

fn utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(now)
}
