//! Operational counters for the engine.
//!
//! Tracks what the engine has done this process lifetime without storing
//! any per-user payload data. Counters are cheap enough to bump from any
//! request path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Engine counters for the current process.
#[derive(Debug)]
pub struct EngineStats {
    events_ingested: AtomicU64,
    events_rejected: AtomicU64,
    sessions_started: AtomicU64,
    sessions_resolved: AtomicU64,
    sessions_stale: AtomicU64,
    reminders_scheduled: AtomicU64,
    reminders_degraded: AtomicU64,
    reminders_fired: AtomicU64,
    reminders_cancelled: AtomicU64,
    anomalies_flagged: AtomicU64,
    meds_uploaded: AtomicU64,
    meds_confirmed: AtomicU64,
    session_start: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

impl EngineStats {
    /// Create a new counter set.
    pub fn new() -> Self {
        Self {
            events_ingested: AtomicU64::new(0),
            events_rejected: AtomicU64::new(0),
            sessions_started: AtomicU64::new(0),
            sessions_resolved: AtomicU64::new(0),
            sessions_stale: AtomicU64::new(0),
            reminders_scheduled: AtomicU64::new(0),
            reminders_degraded: AtomicU64::new(0),
            reminders_fired: AtomicU64::new(0),
            reminders_cancelled: AtomicU64::new(0),
            anomalies_flagged: AtomicU64::new(0),
            meds_uploaded: AtomicU64::new(0),
            meds_confirmed: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a counter set persisted to the given path on `save()`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);
        stats
    }

    pub fn record_event_ingested(&self) {
        self.events_ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_rejected(&self) {
        self.events_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_resolved(&self) {
        self.sessions_resolved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_stale(&self) {
        self.sessions_stale.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reminder_scheduled(&self) {
        self.reminders_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reminder_degraded(&self) {
        self.reminders_degraded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reminder_fired(&self) {
        self.reminders_fired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reminder_cancelled(&self) {
        self.reminders_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_anomaly_flagged(&self) {
        self.anomalies_flagged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_med_uploaded(&self) {
        self.meds_uploaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_med_confirmed(&self) {
        self.meds_confirmed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            events_ingested: self.events_ingested.load(Ordering::Relaxed),
            events_rejected: self.events_rejected.load(Ordering::Relaxed),
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_resolved: self.sessions_resolved.load(Ordering::Relaxed),
            sessions_stale: self.sessions_stale.load(Ordering::Relaxed),
            reminders_scheduled: self.reminders_scheduled.load(Ordering::Relaxed),
            reminders_degraded: self.reminders_degraded.load(Ordering::Relaxed),
            reminders_fired: self.reminders_fired.load(Ordering::Relaxed),
            reminders_cancelled: self.reminders_cancelled.load(Ordering::Relaxed),
            anomalies_flagged: self.anomalies_flagged.load(Ordering::Relaxed),
            meds_uploaded: self.meds_uploaded.load(Ordering::Relaxed),
            meds_confirmed: self.meds_confirmed.load(Ordering::Relaxed),
            session_start: self.session_start,
            uptime_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let s = self.snapshot();
        format!(
            "Engine Statistics:\n\
             - Events ingested: {} ({} rejected)\n\
             - Sedentary sessions: {} started, {} resolved, {} stale\n\
             - Reminders: {} scheduled, {} degraded, {} fired, {} cancelled\n\
             - Habit anomalies flagged: {}\n\
             - Medications: {} uploaded, {} confirmations\n\
             - Uptime: {} seconds",
            s.events_ingested,
            s.events_rejected,
            s.sessions_started,
            s.sessions_resolved,
            s.sessions_stale,
            s.reminders_scheduled,
            s.reminders_degraded,
            s.reminders_fired,
            s.reminders_cancelled,
            s.anomalies_flagged,
            s.meds_uploaded,
            s.meds_confirmed,
            s.uptime_secs,
        )
    }

    /// Save counters to disk, if persistence was configured.
    pub fn save(&self) -> std::io::Result<()> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let json = serde_json::to_string_pretty(&self.snapshot())
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }
}

impl Default for EngineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared handle for the counters.
pub type SharedStats = Arc<EngineStats>;

/// Serializable view of the counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub events_ingested: u64,
    pub events_rejected: u64,
    pub sessions_started: u64,
    pub sessions_resolved: u64,
    pub sessions_stale: u64,
    pub reminders_scheduled: u64,
    pub reminders_degraded: u64,
    pub reminders_fired: u64,
    pub reminders_cancelled: u64,
    pub anomalies_flagged: u64,
    pub meds_uploaded: u64,
    pub meds_confirmed: u64,
    pub session_start: DateTime<Utc>,
    pub uptime_secs: u64,
}
