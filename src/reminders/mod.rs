//! Reminder scheduling with degrade-to-local fallback.
//!
//! The scheduler owns every outstanding timer. The primary path hands
//! timers to the external delivery service; when that call fails the
//! entry degrades to a local durable queue and is retried with
//! exponential backoff until the owning session or med record stops
//! wanting it. A degraded entry whose time arrives before a retry
//! succeeds is delivered locally (late) instead of being dropped.
//!
//! Scheduling is idempotent per key: re-scheduling replaces the prior
//! timer. Cancelling an already-delivered timer is a no-op reported as
//! `already_fired`.

pub mod client;

pub use client::{
    CancelStatus, DeliveryError, DeliveryService, HttpDeliveryClient, ReminderPayload,
    ScheduleRequest,
};

use crate::config::RetryConfig;
use crate::stats::SharedStats;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Terminal entries are pruned after this long.
const TERMINAL_RETENTION_HOURS: i64 = 24;

/// Unique key for a schedulable reminder.
///
/// The key namespace guarantees idempotent re-scheduling: one deliverable
/// timer per (user, session, tier) and per (user, med, occurrence).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReminderKey {
    SedentaryTier {
        user_id: String,
        session_id: Uuid,
        tier: u8,
    },
    MedOccurrence {
        user_id: String,
        med_id: Uuid,
        occurrence: DateTime<Utc>,
    },
}

impl ReminderKey {
    pub fn user_id(&self) -> &str {
        match self {
            ReminderKey::SedentaryTier { user_id, .. } => user_id,
            ReminderKey::MedOccurrence { user_id, .. } => user_id,
        }
    }

    /// Stable string form used on the delivery wire.
    pub fn wire_key(&self) -> String {
        match self {
            ReminderKey::SedentaryTier {
                user_id,
                session_id,
                tier,
            } => format!("sed:{user_id}:{session_id}:{tier}"),
            ReminderKey::MedOccurrence {
                user_id,
                med_id,
                occurrence,
            } => format!("med:{user_id}:{med_id}:{}", occurrence.timestamp()),
        }
    }
}

impl std::fmt::Display for ReminderKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.wire_key())
    }
}

/// Lifecycle of a tracked timer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
enum EntryState {
    /// Accepted by the delivery collaborator
    Remote { remote_id: String },
    /// Waiting in the local durable queue for a retry
    Degraded {
        attempts: u32,
        next_retry: DateTime<Utc>,
    },
    Fired {
        at: DateTime<Utc>,
    },
    Cancelled,
}

/// One tracked reminder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderEntry {
    pub reminder_id: Uuid,
    pub key: ReminderKey,
    pub at_time: DateTime<Utc>,
    pub payload: ReminderPayload,
    state: EntryState,
}

impl ReminderEntry {
    fn is_terminal(&self) -> bool {
        matches!(self.state, EntryState::Fired { .. } | EntryState::Cancelled)
    }

    fn is_degraded(&self) -> bool {
        matches!(self.state, EntryState::Degraded { .. })
    }
}

/// A reminder whose delivery time arrived, reported by `poll_due`.
#[derive(Debug, Clone, Serialize)]
pub struct FiredReminder {
    pub key: ReminderKey,
    pub at_time: DateTime<Utc>,
    pub payload: ReminderPayload,
    /// true when delivered by the local fallback instead of the collaborator
    pub delivered_locally: bool,
}

/// Scheduler owning all outstanding reminder timers.
pub struct ReminderScheduler<D: DeliveryService> {
    delivery: D,
    entries: Mutex<HashMap<ReminderKey, ReminderEntry>>,
    retry: RetryConfig,
    /// Degraded entries persisted here so a restart does not lose them
    queue_path: Option<PathBuf>,
    /// Local (late) deliveries appended here as JSONL
    journal_path: Option<PathBuf>,
    stats: SharedStats,
}

impl<D: DeliveryService> ReminderScheduler<D> {
    /// Create a scheduler with in-memory state only.
    pub fn new(delivery: D, retry: RetryConfig, stats: SharedStats) -> Self {
        Self {
            delivery,
            entries: Mutex::new(HashMap::new()),
            retry,
            queue_path: None,
            journal_path: None,
            stats,
        }
    }

    /// Create a scheduler with a durable degraded queue under `data_path`.
    ///
    /// Previously degraded entries are reloaded and become retry
    /// candidates immediately. A corrupt or missing queue file starts
    /// empty rather than failing startup.
    pub fn with_data_dir(
        delivery: D,
        retry: RetryConfig,
        stats: SharedStats,
        data_path: &std::path::Path,
    ) -> Self {
        let mut scheduler = Self::new(delivery, retry, stats);
        scheduler.queue_path = Some(data_path.join("pending_reminders.json"));
        scheduler.journal_path = Some(data_path.join("local_notifications.jsonl"));
        scheduler.load_queue();
        scheduler
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<ReminderKey, ReminderEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Schedule (or re-schedule) the timer for `key`.
    ///
    /// Always succeeds from the caller's point of view: a collaborator
    /// failure degrades the entry to the local queue. Returns the local
    /// reminder handle.
    pub async fn schedule(
        &self,
        key: ReminderKey,
        at_time: DateTime<Utc>,
        payload: ReminderPayload,
    ) -> Uuid {
        let now = Utc::now();
        let reminder_id = Uuid::new_v4();

        // Phase 1: replace any prior timer for this key (under the lock,
        // no I/O) and note what needs a remote cancel.
        let prior_remote = {
            let mut entries = self.lock_entries();
            let prior = entries.insert(
                key.clone(),
                ReminderEntry {
                    reminder_id,
                    key: key.clone(),
                    at_time,
                    payload: payload.clone(),
                    state: EntryState::Degraded {
                        attempts: 0,
                        next_retry: now,
                    },
                },
            );
            match prior.map(|e| e.state) {
                Some(EntryState::Remote { remote_id }) => Some(remote_id),
                _ => None,
            }
        };

        // Phase 2: I/O with no lock held.
        if let Some(remote_id) = prior_remote {
            match self.delivery.cancel(&remote_id).await {
                Ok(status) => {
                    tracing::debug!(%key, ?status, "replaced prior remote timer");
                }
                Err(e) => {
                    tracing::warn!(%key, error = %e, "failed to cancel replaced timer");
                }
            }
        }

        let request = ScheduleRequest {
            key: key.wire_key(),
            at_time,
            payload,
        };

        match self.delivery.schedule(&request).await {
            Ok(remote_id) => {
                self.stats.record_reminder_scheduled();
                let mut entries = self.lock_entries();
                if let Some(entry) = entries.get_mut(&key) {
                    if entry.reminder_id == reminder_id {
                        entry.state = EntryState::Remote { remote_id };
                    }
                }
            }
            Err(e) => {
                tracing::warn!(%key, error = %e, "delivery unavailable, queueing locally");
                self.stats.record_reminder_degraded();
                let entries = self.lock_entries();
                self.persist_queue(&entries);
            }
        }

        reminder_id
    }

    /// Cancel the timer for `key`.
    ///
    /// An already-delivered timer reports `AlreadyFired` and nothing else
    /// happens; an unknown key reports `NotFound`.
    pub async fn cancel(&self, key: &ReminderKey) -> CancelStatus {
        let remote = {
            let mut entries = self.lock_entries();
            let (remote, was_degraded) = match entries.get_mut(key) {
                None => return CancelStatus::NotFound,
                Some(entry) => match &entry.state {
                    EntryState::Fired { .. } => return CancelStatus::AlreadyFired,
                    EntryState::Cancelled => return CancelStatus::Cancelled,
                    EntryState::Remote { remote_id } => {
                        let id = remote_id.clone();
                        entry.state = EntryState::Cancelled;
                        (Some(id), false)
                    }
                    EntryState::Degraded { .. } => {
                        entry.state = EntryState::Cancelled;
                        (None, true)
                    }
                },
            };
            if was_degraded {
                self.persist_queue(&entries);
            }
            remote
        };

        self.stats.record_reminder_cancelled();

        if let Some(remote_id) = remote {
            match self.delivery.cancel(&remote_id).await {
                Ok(CancelStatus::AlreadyFired) => {
                    // delivery won the race; record the firing
                    let mut entries = self.lock_entries();
                    if let Some(entry) = entries.get_mut(key) {
                        entry.state = EntryState::Fired { at: Utc::now() };
                    }
                    return CancelStatus::AlreadyFired;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(%key, error = %e, "remote cancel failed; timer dropped locally");
                }
            }
        }

        CancelStatus::Cancelled
    }

    /// Cancel every non-terminal timer matching the predicate. Returns
    /// how many were cancelled.
    pub async fn cancel_matching(&self, wanted: impl Fn(&ReminderKey) -> bool) -> usize {
        let keys: Vec<ReminderKey> = {
            let entries = self.lock_entries();
            entries
                .values()
                .filter(|e| !e.is_terminal() && wanted(&e.key))
                .map(|e| e.key.clone())
                .collect()
        };

        let mut cancelled = 0;
        for key in keys {
            if self.cancel(&key).await == CancelStatus::Cancelled {
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Record that the collaborator delivered `remote_id`, as reported by
    /// its callback. Returns the fired reminder for routing.
    pub fn settle_remote_fired(&self, remote_id: &str) -> Option<FiredReminder> {
        let mut entries = self.lock_entries();
        let entry = entries.values_mut().find(|e| {
            matches!(&e.state, EntryState::Remote { remote_id: id } if id == remote_id)
        })?;
        entry.state = EntryState::Fired { at: Utc::now() };
        self.stats.record_reminder_fired();
        Some(FiredReminder {
            key: entry.key.clone(),
            at_time: entry.at_time,
            payload: entry.payload.clone(),
            delivered_locally: false,
        })
    }

    /// Advance the timer set to `now`.
    ///
    /// Fires due timers (in time order), retries degraded entries whose
    /// backoff elapsed, and drops entries the probe no longer wants.
    /// Callers route the returned fired reminders to their owners.
    pub async fn poll_due(
        &self,
        now: DateTime<Utc>,
        still_wanted: impl Fn(&ReminderKey) -> bool,
    ) -> Vec<FiredReminder> {
        let mut fired = Vec::new();
        let mut retries: Vec<(ReminderKey, ScheduleRequest)> = Vec::new();

        {
            let mut entries = self.lock_entries();

            let mut due: Vec<&mut ReminderEntry> = entries
                .values_mut()
                .filter(|e| !e.is_terminal() && e.at_time <= now)
                .collect();
            due.sort_by_key(|e| e.at_time);

            for entry in due {
                let locally = entry.is_degraded();
                entry.state = EntryState::Fired { at: now };
                fired.push(FiredReminder {
                    key: entry.key.clone(),
                    at_time: entry.at_time,
                    payload: entry.payload.clone(),
                    delivered_locally: locally,
                });
            }

            for entry in entries.values_mut() {
                if let EntryState::Degraded { next_retry, .. } = entry.state {
                    if next_retry > now {
                        continue;
                    }
                    if !still_wanted(&entry.key) {
                        entry.state = EntryState::Cancelled;
                        tracing::debug!(key = %entry.key, "dropping unwanted degraded timer");
                        continue;
                    }
                    retries.push((
                        entry.key.clone(),
                        ScheduleRequest {
                            key: entry.key.wire_key(),
                            at_time: entry.at_time,
                            payload: entry.payload.clone(),
                        },
                    ));
                }
            }

            let cutoff = now - Duration::hours(TERMINAL_RETENTION_HOURS);
            entries.retain(|_, e| match &e.state {
                EntryState::Fired { at } => *at > cutoff,
                EntryState::Cancelled => false,
                _ => true,
            });

            self.persist_queue(&entries);
        }

        for reminder in &fired {
            self.stats.record_reminder_fired();
            if reminder.delivered_locally {
                tracing::info!(
                    key = %reminder.key,
                    "delivering reminder locally (collaborator never accepted it)"
                );
                self.append_journal(reminder, now);
            } else {
                tracing::info!(key = %reminder.key, "reminder delivered");
            }
        }

        // Retry I/O with no lock held.
        for (key, request) in retries {
            match self.delivery.schedule(&request).await {
                Ok(remote_id) => {
                    self.stats.record_reminder_scheduled();
                    tracing::info!(%key, "degraded reminder accepted by collaborator");
                    let mut entries = self.lock_entries();
                    if let Some(entry) = entries.get_mut(&key) {
                        if entry.is_degraded() {
                            entry.state = EntryState::Remote { remote_id };
                        }
                    }
                    self.persist_queue(&entries);
                }
                Err(e) => {
                    let mut entries = self.lock_entries();
                    if let Some(entry) = entries.get_mut(&key) {
                        if let EntryState::Degraded { attempts, .. } = entry.state {
                            let attempts = attempts + 1;
                            let delay = self.retry.delay_for_attempt(attempts);
                            entry.state = EntryState::Degraded {
                                attempts,
                                next_retry: now
                                    + Duration::from_std(delay)
                                        .unwrap_or_else(|_| Duration::seconds(300)),
                            };
                            tracing::warn!(
                                %key,
                                attempts,
                                error = %e,
                                "retry failed, backing off {}s",
                                delay.as_secs()
                            );
                        }
                    }
                    self.persist_queue(&entries);
                }
            }
        }

        fired
    }

    /// Number of non-terminal timers currently tracked.
    pub fn pending_count(&self) -> usize {
        self.lock_entries()
            .values()
            .filter(|e| !e.is_terminal())
            .count()
    }

    /// Snapshot of a tracked entry, for tests and inspection.
    pub fn entry(&self, key: &ReminderKey) -> Option<ReminderEntry> {
        self.lock_entries().get(key).cloned()
    }

    /// Whether the entry for `key` sits in the degraded queue.
    pub fn is_degraded(&self, key: &ReminderKey) -> bool {
        self.lock_entries()
            .get(key)
            .map(|e| e.is_degraded())
            .unwrap_or(false)
    }

    fn persist_queue(&self, entries: &HashMap<ReminderKey, ReminderEntry>) {
        let Some(ref path) = self.queue_path else {
            return;
        };
        let degraded: Vec<&ReminderEntry> =
            entries.values().filter(|e| e.is_degraded()).collect();
        match serde_json::to_string_pretty(&degraded) {
            Ok(json) => {
                if let Some(parent) = path.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                if let Err(e) = std::fs::write(path, json) {
                    tracing::warn!(error = %e, "failed to persist degraded queue");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize degraded queue"),
        }
    }

    fn load_queue(&mut self) {
        let Some(ref path) = self.queue_path else {
            return;
        };
        if !path.exists() {
            return;
        }
        match std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|s| serde_json::from_str::<Vec<ReminderEntry>>(&s).map_err(|e| e.to_string()))
        {
            Ok(loaded) => {
                let count = loaded.len();
                let mut entries = self.lock_entries();
                for entry in loaded {
                    entries.insert(entry.key.clone(), entry);
                }
                if count > 0 {
                    tracing::info!(count, "reloaded degraded reminders from disk");
                }
            }
            Err(e) => tracing::warn!(error = %e, "could not load degraded queue, starting empty"),
        }
    }

    fn append_journal(&self, reminder: &FiredReminder, now: DateTime<Utc>) {
        let Some(ref path) = self.journal_path else {
            return;
        };
        let record = serde_json::json!({
            "key": reminder.key.wire_key(),
            "at_time": reminder.at_time,
            "delivered_at": now,
            "payload": reminder.payload,
        });
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let line = format!("{record}\n");
        use std::io::Write;
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| f.write_all(line.as_bytes()));
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to append local notification journal");
        }
    }
}
