//! The orchestration engine.
//!
//! Fuses posture reports, medication schedules, and habit telemetry into
//! per-user state and drives the reminder scheduler. Per-user state lives
//! in an arena of independently locked records, so flows for different
//! users never contend while a single user's mutations stay serialized.
//!
//! Entry points follow a strict shape: validate the envelope, compute
//! the transition under the user's lock (pure, no I/O), release the
//! lock, then execute the scheduling side effects.

use crate::config::Config;
use crate::error::EngineError;
use crate::events::{CamReport, HabitEvent, InboundEvent};
use crate::habits::{self, AnomalyReport, HabitProfile, ProfileSnapshots};
use crate::meds::{self, MedRecord, MedStore};
use crate::reminders::{
    DeliveryService, FiredReminder, ReminderKey, ReminderPayload, ReminderScheduler,
};
use crate::sedentary::{
    self, ReportOutcome, SedentarySession, SessionAction, SessionArchive, SessionState,
};
use crate::stats::{EngineStats, SharedStats};
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

/// Per-user opt-out switches.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UserSettings {
    pub opt_out_camera: bool,
    pub opt_out_habits: bool,
}

/// Partial settings update; unset fields keep their value.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct UserSettingsUpdate {
    pub opt_out_camera: Option<bool>,
    pub opt_out_habits: Option<bool>,
}

/// Everything the engine tracks for one user.
#[derive(Debug, Default)]
struct UserState {
    session: Option<SedentarySession>,
    archive: SessionArchive,
    profiles: HashMap<String, HabitProfile>,
    settings: UserSettings,
}

/// Result of a cam report ingestion.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CamIngest {
    /// User opted out of camera tracking
    OptedOut,
    /// Report was applied (possibly as a no-op)
    Applied {
        #[serde(flatten)]
        outcome: ReportOutcome,
    },
}

/// Result of an explicit session creation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionCreate {
    OptedOut,
    Created { session_id: uuid::Uuid },
    /// An active session already existed; returned unchanged
    Existing { session_id: uuid::Uuid },
}

/// Result of a habit event ingestion. Anomalies are advisory: the caller
/// decides whether to act on them.
#[derive(Debug, Clone, Serialize)]
pub struct HabitIngest {
    pub profile: HabitProfile,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anomaly: Option<AnomalyReport>,
}

/// Result of a medication upload or schedule edit.
#[derive(Debug, Clone, Serialize)]
pub struct MedUpload {
    pub record: MedRecord,
    /// How many dose reminders were handed to the scheduler
    pub scheduled: usize,
    /// Present when the schedule text did not parse; the record is still
    /// stored with an empty occurrence list
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_warning: Option<String>,
}

/// Unified outcome for the generic `ingest` dispatcher.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IngestOutcome {
    Cam(CamIngest),
    Habit(HabitIngest),
    Adherence { record: MedRecord },
}

/// The behavioral-orchestration engine.
pub struct Orchestrator<D: DeliveryService> {
    tz: Tz,
    stale_timeout: Duration,
    anomaly: crate::config::AnomalyConfig,
    scheduler: ReminderScheduler<D>,
    meds: MedStore,
    snapshots: ProfileSnapshots,
    users: RwLock<HashMap<String, Arc<Mutex<UserState>>>>,
    stats: SharedStats,
    sweep_interval: std::time::Duration,
    /// Stamped into reminder payloads as the producing instance
    instance: String,
}

impl<D: DeliveryService> Orchestrator<D> {
    /// Create an engine over the given delivery collaborator.
    ///
    /// The degraded reminder queue is made durable under the configured
    /// data directory.
    pub fn new(config: Config, delivery: D) -> Result<Self, EngineError> {
        let tz = config
            .tz()
            .map_err(|e| EngineError::Validation(e.to_string()))?;
        config
            .ensure_directories()
            .map_err(|e| EngineError::Storage(e.to_string()))?;

        let stats: SharedStats =
            Arc::new(EngineStats::with_persistence(config.data_path.join("stats.json")));
        let scheduler = ReminderScheduler::with_data_dir(
            delivery,
            config.retry.clone(),
            stats.clone(),
            &config.data_path,
        );

        let host = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        let stale_timeout = Duration::from_std(config.stale_timeout)
            .map_err(|e| EngineError::Validation(format!("stale_timeout: {e}")))?;

        Ok(Self {
            tz,
            stale_timeout,
            anomaly: config.anomaly.clone(),
            scheduler,
            meds: MedStore::new(),
            snapshots: ProfileSnapshots::new(),
            users: RwLock::new(HashMap::new()),
            stats,
            sweep_interval: config.sweep_interval,
            instance: format!("caremind-{host}"),
        })
    }

    /// Engine counters.
    pub fn stats(&self) -> &SharedStats {
        &self.stats
    }

    /// The reminder scheduler, for inspection.
    pub fn scheduler(&self) -> &ReminderScheduler<D> {
        &self.scheduler
    }

    fn user_slot(&self, user_id: &str) -> Arc<Mutex<UserState>> {
        {
            let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(slot) = users.get(user_id) {
                return slot.clone();
            }
        }
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        users
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(UserState::default())))
            .clone()
    }

    fn lock_user<'a>(slot: &'a Arc<Mutex<UserState>>) -> MutexGuard<'a, UserState> {
        slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Route one inbound event to its handler.
    pub async fn ingest(&self, event: InboundEvent) -> Result<IngestOutcome, EngineError> {
        if let Err(e) = event.validate() {
            self.stats.record_event_rejected();
            return Err(e);
        }
        match event {
            InboundEvent::Cam(report) => {
                Ok(IngestOutcome::Cam(self.ingest_cam_report(report).await?))
            }
            InboundEvent::Habit(event) => Ok(IngestOutcome::Habit(self.ingest_habit_event(event)?)),
            InboundEvent::Adherence(confirmation) => {
                let record = self
                    .confirm_medication(
                        &confirmation.user_id,
                        confirmation.med_id,
                        confirmation.taken,
                    )
                    .await?;
                Ok(IngestOutcome::Adherence { record })
            }
        }
    }

    /// Apply a posture report to the user's sedentary session.
    pub async fn ingest_cam_report(&self, report: CamReport) -> Result<CamIngest, EngineError> {
        if let Err(e) = InboundEvent::Cam(report.clone()).validate() {
            self.stats.record_event_rejected();
            return Err(e);
        }
        self.stats.record_event_ingested();

        let slot = self.user_slot(&report.user_id);
        let (outcome, actions) = {
            let mut state = Self::lock_user(&slot);
            if state.settings.opt_out_camera {
                return Ok(CamIngest::OptedOut);
            }
            let (outcome, actions) = sedentary::apply_report(
                &mut state.session,
                &report.user_id,
                report.posture,
                report.timestamp,
            );
            self.track_outcome(&mut state, &outcome, report.timestamp);
            (outcome, actions)
        };

        self.run_session_actions(&report.user_id, actions).await;
        Ok(CamIngest::Applied { outcome })
    }

    /// Open a sedentary session without a posture report.
    ///
    /// Idempotent: creating a second session for a user with one already
    /// active returns the existing session.
    pub async fn create_sedentary_session(
        &self,
        user_id: &str,
    ) -> Result<SessionCreate, EngineError> {
        if user_id.trim().is_empty() {
            self.stats.record_event_rejected();
            return Err(EngineError::Validation("empty user_id".to_string()));
        }

        let now = Utc::now();
        let slot = self.user_slot(user_id);
        let (session_id, created, actions) = {
            let mut state = Self::lock_user(&slot);
            if state.settings.opt_out_camera {
                return Ok(SessionCreate::OptedOut);
            }
            sedentary::ensure_session(&mut state.session, user_id, now)
        };

        if created {
            self.stats.record_session_started();
            tracing::info!(user_id, %session_id, "sedentary session opened");
        }
        self.run_session_actions(user_id, actions).await;

        Ok(if created {
            SessionCreate::Created { session_id }
        } else {
            SessionCreate::Existing { session_id }
        })
    }

    /// Store a medication and schedule its dose reminders.
    ///
    /// Unparseable schedule text is a warning, not a failure: the record
    /// is stored with no occurrences and the warning is surfaced.
    pub async fn upload_medication(
        &self,
        user_id: &str,
        med_name: &str,
        dosage: &str,
        schedule_text: &str,
    ) -> Result<MedUpload, EngineError> {
        if user_id.trim().is_empty() {
            self.stats.record_event_rejected();
            return Err(EngineError::Validation("empty user_id".to_string()));
        }
        if med_name.trim().is_empty() {
            self.stats.record_event_rejected();
            return Err(EngineError::Validation("empty med_name".to_string()));
        }

        let now = Utc::now();
        let (occurrences, parse_warning) =
            match meds::parse_occurrences(schedule_text, now, self.tz) {
                Ok(occ) => (occ, None),
                Err(e) => {
                    tracing::warn!(user_id, med_name, warning = %e, "schedule did not parse");
                    (Vec::new(), Some(e.to_string()))
                }
            };

        let record = self
            .meds
            .create(user_id, med_name, dosage, schedule_text, &occurrences);
        self.stats.record_med_uploaded();

        let scheduled = self.schedule_doses(&record).await;
        Ok(MedUpload {
            record,
            scheduled,
            parse_warning,
        })
    }

    /// Re-parse an edited schedule, cancelling the old timers first so
    /// overlapping occurrence sets cannot double-deliver.
    pub async fn update_medication_schedule(
        &self,
        user_id: &str,
        med_id: uuid::Uuid,
        schedule_text: &str,
    ) -> Result<MedUpload, EngineError> {
        let existing = self.meds.get(med_id)?;
        if existing.user_id != user_id {
            return Err(EngineError::NotFound(format!(
                "med {med_id} for user {user_id}"
            )));
        }

        self.scheduler
            .cancel_matching(
                |key| matches!(key, ReminderKey::MedOccurrence { med_id: m, .. } if *m == med_id),
            )
            .await;

        let now = Utc::now();
        let (occurrences, parse_warning) =
            match meds::parse_occurrences(schedule_text, now, self.tz) {
                Ok(occ) => (occ, None),
                Err(e) => {
                    tracing::warn!(user_id, %med_id, warning = %e, "schedule did not parse");
                    (Vec::new(), Some(e.to_string()))
                }
            };

        let record = self
            .meds
            .replace_schedule(med_id, schedule_text, &occurrences)?;
        let scheduled = self.schedule_doses(&record).await;
        Ok(MedUpload {
            record,
            scheduled,
            parse_warning,
        })
    }

    /// Log a dose confirmation and settle the matching reminder.
    pub async fn confirm_medication(
        &self,
        user_id: &str,
        med_id: uuid::Uuid,
        taken: bool,
    ) -> Result<MedRecord, EngineError> {
        if user_id.trim().is_empty() {
            self.stats.record_event_rejected();
            return Err(EngineError::Validation("empty user_id".to_string()));
        }
        self.stats.record_event_ingested();
        let record = self.meds.confirm(user_id, med_id, taken, Utc::now())?;
        self.stats.record_med_confirmed();
        Ok(record)
    }

    /// Fetch a stored medication.
    pub fn get_medication(&self, med_id: uuid::Uuid) -> Result<MedRecord, EngineError> {
        self.meds.get(med_id)
    }

    /// All medications for a user.
    pub fn medications_for_user(&self, user_id: &str) -> Vec<MedRecord> {
        self.meds.list_for_user(user_id)
    }

    /// Adherence history for a user.
    pub fn adherence_for_user(&self, user_id: &str) -> Vec<crate::meds::AdherenceRecord> {
        self.meds.adherence_for_user(user_id)
    }

    /// Fold a habit observation into the user's profile.
    ///
    /// The anomaly verdict (if any) is advisory output; the engine never
    /// schedules anything from it.
    pub fn ingest_habit_event(&self, event: HabitEvent) -> Result<HabitIngest, EngineError> {
        if let Err(e) = InboundEvent::Habit(event.clone()).validate() {
            self.stats.record_event_rejected();
            return Err(e);
        }
        self.stats.record_event_ingested();

        let value = habits::seconds_of_day(event.timestamp, self.tz);
        let slot = self.user_slot(&event.user_id);

        let (profile, anomaly) = {
            let mut state = Self::lock_user(&slot);
            let suppress = state.settings.opt_out_habits;
            let profile = state
                .profiles
                .entry(event.event_type.clone())
                .or_insert_with(|| HabitProfile::new(&event.user_id, &event.event_type));
            let anomaly = habits::observe_value(profile, value, event.timestamp, &self.anomaly);
            (profile.clone(), if suppress { None } else { anomaly })
        };

        self.snapshots.publish(profile.clone());
        if anomaly.is_some() {
            self.stats.record_anomaly_flagged();
            tracing::info!(
                user_id = %event.user_id,
                event_type = %event.event_type,
                "habit deviation flagged"
            );
        }

        Ok(HabitIngest { profile, anomaly })
    }

    /// Read a habit profile from the published snapshots.
    ///
    /// Snapshot reads never take the user's mutation lock and may be one
    /// update behind.
    pub fn get_habit_profile(
        &self,
        user_id: &str,
        event_type: &str,
    ) -> Result<HabitProfile, EngineError> {
        self.snapshots
            .get(user_id, event_type)
            .ok_or_else(|| EngineError::NotFound(format!("profile {user_id}/{event_type}")))
    }

    /// The user's active session, if any.
    pub fn active_session(&self, user_id: &str) -> Option<SedentarySession> {
        let slot = self.user_slot(user_id);
        let state = Self::lock_user(&slot);
        state
            .session
            .clone()
            .filter(|s| s.state == SessionState::Active)
    }

    /// The user's resolved-session history.
    pub fn session_archive(&self, user_id: &str) -> SessionArchive {
        let slot = self.user_slot(user_id);
        let archive = Self::lock_user(&slot).archive.clone();
        archive
    }

    /// Update a user's opt-out settings.
    pub fn set_user_settings(&self, user_id: &str, update: UserSettingsUpdate) -> UserSettings {
        let slot = self.user_slot(user_id);
        let mut state = Self::lock_user(&slot);
        if let Some(v) = update.opt_out_camera {
            state.settings.opt_out_camera = v;
        }
        if let Some(v) = update.opt_out_habits {
            state.settings.opt_out_habits = v;
        }
        state.settings
    }

    /// Read a user's settings.
    pub fn user_settings(&self, user_id: &str) -> UserSettings {
        let slot = self.user_slot(user_id);
        let settings = Self::lock_user(&slot).settings;
        settings
    }

    /// Record a delivery-collaborator callback for a fired reminder.
    pub fn reminder_delivered(&self, remote_id: &str) -> Option<FiredReminder> {
        let fired = self.scheduler.settle_remote_fired(remote_id)?;
        self.route_fired(&fired);
        Some(fired)
    }

    /// Advance time-driven behavior to `now`.
    ///
    /// Resolves stale sessions, fires due timers, retries degraded
    /// entries, and routes fired reminders back to their owners. The
    /// background loop calls this with wall-clock time; tests drive it
    /// directly.
    pub async fn sweep(&self, now: DateTime<Utc>) {
        // stale sessions first so their pending tiers are cancelled
        // before the due check can fire them
        let slots: Vec<(String, Arc<Mutex<UserState>>)> = {
            let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
            users
                .iter()
                .map(|(id, slot)| (id.clone(), slot.clone()))
                .collect()
        };

        for (user_id, slot) in slots {
            let actions = {
                let mut state = Self::lock_user(&slot);
                match sedentary::resolve_if_stale(&mut state.session, now, self.stale_timeout) {
                    Some((outcome, actions)) => {
                        self.track_outcome(&mut state, &outcome, now);
                        tracing::info!(user_id = %user_id, "sedentary session stale, resolving");
                        actions
                    }
                    None => Vec::new(),
                }
            };
            self.run_session_actions(&user_id, actions).await;
        }

        let fired = self
            .scheduler
            .poll_due(now, |key| self.key_still_wanted(key))
            .await;
        for reminder in fired {
            self.route_fired(&reminder);
        }
    }

    /// Drive the engine on its configured cadence until the task is
    /// aborted.
    pub async fn run(self: Arc<Self>) {
        let mut cadence = tokio::time::interval(self.sweep_interval);
        cadence.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::info!(
            interval_secs = self.sweep_interval.as_secs(),
            "maintenance loop started"
        );
        loop {
            cadence.tick().await;
            self.sweep(Utc::now()).await;
        }
    }

    /// Whether a degraded timer still has a live owner.
    fn key_still_wanted(&self, key: &ReminderKey) -> bool {
        match key {
            ReminderKey::SedentaryTier {
                user_id,
                session_id,
                ..
            } => {
                let slot = self.user_slot(user_id);
                let state = Self::lock_user(&slot);
                state
                    .session
                    .as_ref()
                    .map(|s| s.session_id == *session_id && s.state == SessionState::Active)
                    .unwrap_or(false)
            }
            ReminderKey::MedOccurrence {
                med_id, occurrence, ..
            } => self.meds.occurrence_wanted(*med_id, *occurrence),
        }
    }

    /// Route a fired reminder back to the record that owns it.
    fn route_fired(&self, reminder: &FiredReminder) {
        match &reminder.key {
            ReminderKey::SedentaryTier {
                user_id,
                session_id,
                tier,
            } => {
                let slot = self.user_slot(user_id);
                let mut state = Self::lock_user(&slot);
                if sedentary::note_tier_fired(&mut state.session, *session_id, *tier) {
                    tracing::info!(user_id = %user_id, tier = *tier, "sedentary reminder delivered");
                }
            }
            ReminderKey::MedOccurrence {
                med_id, occurrence, ..
            } => {
                self.meds.note_fired(*med_id, *occurrence);
            }
        }
    }

    /// Bookkeeping common to report- and sweep-driven transitions.
    /// Resolved sessions move from the live slot into the archive.
    fn track_outcome(&self, state: &mut UserState, outcome: &ReportOutcome, now: DateTime<Utc>) {
        match outcome {
            ReportOutcome::Started { .. } => {
                self.stats.record_session_started();
            }
            ReportOutcome::Resolved { reason, .. } => {
                match reason {
                    sedentary::ResolveReason::Upright => self.stats.record_session_resolved(),
                    sedentary::ResolveReason::Stale => self.stats.record_session_stale(),
                }
                if let Some(session) = state.session.take() {
                    state.archive.push(session, now, *reason);
                }
            }
            _ => {}
        }
    }

    async fn run_session_actions(&self, user_id: &str, actions: Vec<SessionAction>) {
        for action in actions {
            match action {
                SessionAction::ScheduleTier {
                    session_id,
                    tier,
                    at,
                } => {
                    let key = ReminderKey::SedentaryTier {
                        user_id: user_id.to_string(),
                        session_id,
                        tier,
                    };
                    let payload = ReminderPayload {
                        text: sedentary::tier_reminder_text(user_id, tier),
                        user_id: user_id.to_string(),
                        source: self.instance.clone(),
                    };
                    self.scheduler.schedule(key, at, payload).await;
                }
                SessionAction::CancelTiers { session_id } => {
                    self.scheduler
                        .cancel_matching(|key| {
                            matches!(
                                key,
                                ReminderKey::SedentaryTier { session_id: s, .. } if *s == session_id
                            )
                        })
                        .await;
                }
            }
        }
    }

    async fn schedule_doses(&self, record: &MedRecord) -> usize {
        let mut scheduled = 0;
        for occurrence in record.occurrences() {
            let key = ReminderKey::MedOccurrence {
                user_id: record.user_id.clone(),
                med_id: record.med_id,
                occurrence,
            };
            let payload = ReminderPayload {
                text: meds::dose_reminder_text(&record.med_name, &record.dosage),
                user_id: record.user_id.clone(),
                source: self.instance.clone(),
            };
            self.scheduler.schedule(key, occurrence, payload).await;
            scheduled += 1;
        }
        scheduled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Posture;
    use crate::reminders::{CancelStatus, DeliveryError, ScheduleRequest};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct NullDelivery {
        counter: AtomicUsize,
    }

    impl DeliveryService for Arc<NullDelivery> {
        async fn schedule(&self, _request: &ScheduleRequest) -> Result<String, DeliveryError> {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            Ok(format!("r-{n}"))
        }

        async fn cancel(&self, _reminder_id: &str) -> Result<CancelStatus, DeliveryError> {
            Ok(CancelStatus::Cancelled)
        }
    }

    fn test_engine() -> Orchestrator<Arc<NullDelivery>> {
        let mut config = Config::default();
        config.data_path =
            std::env::temp_dir().join(format!("caremind-engine-{}", uuid::Uuid::new_v4()));
        Orchestrator::new(config, Arc::new(NullDelivery::default())).expect("engine")
    }

    #[tokio::test]
    async fn test_cam_report_round_trip() {
        let engine = test_engine();
        let outcome = engine
            .ingest_cam_report(CamReport::new("ada", Posture::Sitting, Utc::now()))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            CamIngest::Applied {
                outcome: ReportOutcome::Started { .. }
            }
        ));
        assert!(engine.active_session("ada").is_some());
        assert_eq!(engine.scheduler().pending_count(), 3);
    }

    #[tokio::test]
    async fn test_validation_rejects_before_mutation() {
        let engine = test_engine();
        let err = engine
            .ingest_cam_report(CamReport::new("", Posture::Sitting, Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(engine.scheduler().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_opt_out_camera_suppresses_tracking() {
        let engine = test_engine();
        engine.set_user_settings(
            "ada",
            UserSettingsUpdate {
                opt_out_camera: Some(true),
                opt_out_habits: None,
            },
        );
        let outcome = engine
            .ingest_cam_report(CamReport::new("ada", Posture::Sitting, Utc::now()))
            .await
            .unwrap();
        assert!(matches!(outcome, CamIngest::OptedOut));
        assert!(engine.active_session("ada").is_none());
    }

    #[tokio::test]
    async fn test_session_create_idempotent() {
        let engine = test_engine();
        let first = engine.create_sedentary_session("ada").await.unwrap();
        let second = engine.create_sedentary_session("ada").await.unwrap();
        let (a, b) = match (first, second) {
            (SessionCreate::Created { session_id: a }, SessionCreate::Existing { session_id: b }) => {
                (a, b)
            }
            other => panic!("unexpected outcomes: {other:?}"),
        };
        assert_eq!(a, b);
        // second call scheduled nothing new
        assert_eq!(engine.scheduler().pending_count(), 3);
    }

    #[tokio::test]
    async fn test_habit_profile_query_and_not_found() {
        let engine = test_engine();
        engine
            .ingest_habit_event(HabitEvent::new("ada", "wake_up", Utc::now()))
            .unwrap();

        let profile = engine.get_habit_profile("ada", "wake_up").unwrap();
        assert_eq!(profile.count, 1);

        assert!(matches!(
            engine.get_habit_profile("ada", "bedtime"),
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_med_upload_warning_path() {
        let engine = test_engine();
        let upload = engine
            .upload_medication("ada", "metformin", "500 mg", "whenever I feel like it")
            .await
            .unwrap();
        assert!(upload.parse_warning.is_some());
        assert_eq!(upload.scheduled, 0);
        // the record is still there
        assert!(engine.get_medication(upload.record.med_id).is_ok());
    }

    #[tokio::test]
    async fn test_confirm_unknown_med() {
        let engine = test_engine();
        let err = engine
            .confirm_medication("ada", uuid::Uuid::new_v4(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}
