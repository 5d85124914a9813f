use chrono::{Duration as ChronoDuration, Local, NaiveDateTime, NaiveTime};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config;
use crate::digest::BatchRunner;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid slot {0:?}; expected HH:MM")]
    InvalidSlot(String),
    #[error("scheduler needs at least one slot")]
    NoSlots,
}

/// Parse `HH:MM` slots, sorted and deduplicated.
pub fn parse_slots(slots: &[String]) -> Result<Vec<NaiveTime>, SchedulerError> {
    let mut parsed = slots
        .iter()
        .map(|s| {
            NaiveTime::parse_from_str(s.trim(), "%H:%M")
                .map_err(|_| SchedulerError::InvalidSlot(s.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if parsed.is_empty() {
        return Err(SchedulerError::NoSlots);
    }
    parsed.sort();
    parsed.dedup();
    Ok(parsed)
}

/// The first slot strictly after `now`, rolling over to tomorrow. `slots` must be sorted.
pub fn next_slot_after(now: NaiveDateTime, slots: &[NaiveTime]) -> Option<NaiveDateTime> {
    let today = now.date();
    slots
        .iter()
        .map(|t| today.and_time(*t))
        .find(|at| *at > now)
        .or_else(|| {
            let first = slots.first()?;
            Some((today + ChronoDuration::days(1)).and_time(*first))
        })
}

/// Next slot to fire, never at or before one that already fired.
pub fn next_fire(
    now: NaiveDateTime,
    last_fired: Option<NaiveDateTime>,
    slots: &[NaiveTime],
) -> Option<NaiveDateTime> {
    let from = last_fired.map_or(now, |last| last.max(now));
    next_slot_after(from, slots)
}

/// Owned trigger component. `start` spawns one task per job kind; each job
/// runs to completion before its next trigger is awaited, and `shutdown` is
/// only observed between runs.
pub struct Scheduler {
    runner: Arc<dyn BatchRunner>,
    slots: Vec<NaiveTime>,
    immediate_interval: Duration,
    running: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(runner: Arc<dyn BatchRunner>, cfg: &config::Scheduler) -> Result<Self, SchedulerError> {
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            runner,
            slots: parse_slots(&cfg.slots)?,
            immediate_interval: Duration::from_secs(cfg.immediate_interval_secs.max(1)),
            running: AtomicBool::new(false),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn both trigger loops. Returns `false` if already running.
    pub fn start(&self) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.shutdown_tx.send_replace(false);

        let slots_task = tokio::spawn(slot_loop(
            self.runner.clone(),
            self.slots.clone(),
            self.shutdown_tx.subscribe(),
        ));
        let immediate_task = tokio::spawn(immediate_loop(
            self.runner.clone(),
            self.immediate_interval,
            self.shutdown_tx.subscribe(),
        ));
        if let Ok(mut handles) = self.handles.lock() {
            handles.push(slots_task);
            handles.push(immediate_task);
        }
        info!(
            slots = ?self.slots,
            immediate_interval_secs = self.immediate_interval.as_secs(),
            "scheduler started"
        );
        true
    }

    /// Signal both loops and wait for any in-flight run to finish.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let handles: Vec<_> = match self.handles.lock() {
            Ok(mut handles) => handles.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(?err, "scheduler task ended abnormally");
            }
        }
        self.running.store(false, Ordering::SeqCst);
        info!("scheduler stopped");
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("slots", &self.slots)
            .field("immediate_interval", &self.immediate_interval)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

async fn slot_loop(
    runner: Arc<dyn BatchRunner>,
    slots: Vec<NaiveTime>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut last_fired = None;
    loop {
        let now = Local::now().naive_local();
        let Some(next) = next_fire(now, last_fired, &slots) else {
            return;
        };
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        debug!(next = %next, "waiting for next delivery slot");
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.changed() => return,
        }
        if *shutdown.borrow() {
            return;
        }

        last_fired = Some(next);
        let slot = next.format("%H:%M").to_string();
        let summary = runner.run_scheduled(Some(&slot)).await;
        info!(
            slot = %slot,
            status = summary.status.as_str(),
            sent = summary.emails_sent,
            failed = summary.emails_failed,
            "scheduled job finished"
        );
    }
}

async fn immediate_loop(
    runner: Arc<dyn BatchRunner>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => return,
        }
        if *shutdown.borrow() {
            return;
        }

        let summary = runner.run_immediate().await;
        if summary.total_users == 0 {
            debug!(message = ?summary.message, "no immediate requests");
        } else {
            info!(
                status = summary.status.as_str(),
                sent = summary.emails_sent,
                failed = summary.emails_failed,
                "immediate job finished"
            );
        }
    }
}
