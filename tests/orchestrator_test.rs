//! End-to-end scenarios for the orchestration engine.
//!
//! Time-driven behavior is exercised by driving `sweep` with synthetic
//! instants instead of sleeping, so these tests run in milliseconds.

use caremind::config::Config;
use caremind::engine::{CamIngest, Orchestrator, UserSettingsUpdate};
use caremind::events::{CamReport, HabitEvent, Posture};
use caremind::reminders::{
    CancelStatus, DeliveryError, DeliveryService, ReminderKey, ScheduleRequest,
};
use caremind::sedentary::ReportOutcome;
use chrono::{DateTime, Duration, Timelike, Utc};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// In-memory delivery collaborator that records every call and can be
/// switched into a permanent-failure mode.
#[derive(Default)]
struct RecordingDelivery {
    fail: AtomicBool,
    scheduled: Mutex<Vec<ScheduleRequest>>,
    cancelled: Mutex<Vec<String>>,
    counter: AtomicUsize,
}

impl RecordingDelivery {
    fn healthy() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn failing() -> Arc<Self> {
        let d = Self::default();
        d.fail.store(true, Ordering::SeqCst);
        Arc::new(d)
    }

    fn scheduled_times(&self) -> Vec<DateTime<Utc>> {
        self.scheduled.lock().unwrap().iter().map(|r| r.at_time).collect()
    }

    fn cancel_count(&self) -> usize {
        self.cancelled.lock().unwrap().len()
    }
}

/// Newtype around the shared double so `DeliveryService` can be
/// implemented for it from this (foreign) test crate — the orphan rule
/// forbids `impl DeliveryService for Arc<RecordingDelivery>` here, but a
/// local wrapper is fine. Delegates every call to the inner recorder.
#[derive(Clone)]
struct Delivery(Arc<RecordingDelivery>);

impl DeliveryService for Delivery {
    async fn schedule(&self, request: &ScheduleRequest) -> Result<String, DeliveryError> {
        if self.0.fail.load(Ordering::SeqCst) {
            return Err(DeliveryError::Network("connection refused".to_string()));
        }
        self.0.scheduled.lock().unwrap().push(request.clone());
        let n = self.0.counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("r-{n}"))
    }

    async fn cancel(&self, reminder_id: &str) -> Result<CancelStatus, DeliveryError> {
        if self.0.fail.load(Ordering::SeqCst) {
            return Err(DeliveryError::Network("connection refused".to_string()));
        }
        self.0.cancelled.lock().unwrap().push(reminder_id.to_string());
        Ok(CancelStatus::Cancelled)
    }
}

fn new_engine(delivery: Arc<RecordingDelivery>) -> Orchestrator<Delivery> {
    let mut config = Config::default();
    config.data_path =
        std::env::temp_dir().join(format!("caremind-test-{}", uuid::Uuid::new_v4()));
    Orchestrator::new(config, Delivery(delivery)).expect("engine should start")
}

fn at(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

async fn sit(engine: &Orchestrator<Delivery>, user: &str, t: DateTime<Utc>) {
    engine
        .ingest_cam_report(CamReport::new(user, Posture::Sitting, t))
        .await
        .expect("cam ingest should succeed");
}

/// Scenario A: sitting for 3h10m with liveness refreshes fires all three
/// tiers and leaves the session active at tier 3.
#[tokio::test]
async fn scenario_a_three_tiers_fire() {
    let delivery = RecordingDelivery::healthy();
    let engine = new_engine(delivery.clone());
    let t0 = at("2026-05-01T09:00:00Z");

    sit(&engine, "ada", t0).await;
    assert_eq!(delivery.scheduled.lock().unwrap().len(), 3);

    // before the first checkpoint nothing fires
    engine.sweep(t0 + Duration::minutes(30)).await;
    assert_eq!(engine.stats().snapshot().reminders_fired, 0);

    // keep the session live and step past each checkpoint
    for (refresh_min, sweep_min) in [(55, 61), (115, 121), (175, 181)] {
        sit(&engine, "ada", t0 + Duration::minutes(refresh_min)).await;
        engine.sweep(t0 + Duration::minutes(sweep_min)).await;
    }

    assert_eq!(engine.stats().snapshot().reminders_fired, 3);
    let session = engine.active_session("ada").expect("still active");
    assert_eq!(session.reminder_tier, 3);
}

/// Scenario B: standing up after 45 minutes resolves the session and
/// cancels all three tiers before any fires.
#[tokio::test]
async fn scenario_b_standing_cancels_everything() {
    let delivery = RecordingDelivery::healthy();
    let engine = new_engine(delivery.clone());
    let t0 = at("2026-05-01T09:00:00Z");

    sit(&engine, "ada", t0).await;
    let outcome = engine
        .ingest_cam_report(CamReport::new(
            "ada",
            Posture::Standing,
            t0 + Duration::minutes(45),
        ))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        CamIngest::Applied {
            outcome: ReportOutcome::Resolved { .. }
        }
    ));

    // all three remote timers were cancelled
    assert_eq!(delivery.cancel_count(), 3);
    assert!(engine.active_session("ada").is_none());

    // hours later, nothing fires
    engine.sweep(t0 + Duration::hours(4)).await;
    assert_eq!(engine.stats().snapshot().reminders_fired, 0);
    assert_eq!(engine.session_archive("ada").len(), 1);
}

/// Scenario C: "08:00,20:00" schedules exactly two dose reminders at the
/// next occurring 08:00 and 20:00.
#[tokio::test]
async fn scenario_c_clock_schedule() {
    let delivery = RecordingDelivery::healthy();
    let engine = new_engine(delivery.clone());

    let upload = engine
        .upload_medication("ada", "metformin", "500 mg", "08:00,20:00")
        .await
        .unwrap();

    assert!(upload.parse_warning.is_none());
    assert_eq!(upload.scheduled, 2);
    assert_eq!(upload.record.reminders.len(), 2);

    let now = Utc::now();
    let times = delivery.scheduled_times();
    assert_eq!(times.len(), 2);
    let mut clocks: Vec<(u32, u32)> = times.iter().map(|t| (t.hour(), t.minute())).collect();
    clocks.sort();
    assert_eq!(clocks, vec![(8, 0), (20, 0)]);
    for t in &times {
        assert!(*t > now);
        assert!(*t <= now + Duration::hours(25));
    }
}

/// Scenario D: a collaborator that errors on every call never fails
/// ingestion; reminders queue locally and back off up to the 5m cap.
#[tokio::test]
async fn scenario_d_degraded_delivery() {
    let delivery = RecordingDelivery::failing();
    let engine = new_engine(delivery.clone());
    let t0 = Utc::now();

    // ingestion still succeeds
    sit(&engine, "ada", t0).await;
    let session = engine.active_session("ada").expect("session opened");
    assert_eq!(engine.scheduler().pending_count(), 3);

    let key = ReminderKey::SedentaryTier {
        user_id: "ada".to_string(),
        session_id: session.session_id,
        tier: 1,
    };
    assert!(engine.scheduler().is_degraded(&key));

    // retries keep failing; entries stay queued rather than dropped
    let mut t = t0;
    for _ in 0..8 {
        t += Duration::minutes(6);
        sit(&engine, "ada", t).await; // keep the session from going stale
        engine.sweep(t).await;
    }
    assert!(engine.scheduler().is_degraded(&key));

    // the collaborator comes back and the retry lands
    delivery.fail.store(false, Ordering::SeqCst);
    t += Duration::minutes(6);
    sit(&engine, "ada", t).await;
    engine.sweep(t).await;
    assert!(!engine.scheduler().is_degraded(&key));
    assert!(!delivery.scheduled.lock().unwrap().is_empty());
}

/// Scenario E: unparseable schedule text stores the record, surfaces a
/// warning, and schedules nothing.
#[tokio::test]
async fn scenario_e_unparseable_schedule() {
    let delivery = RecordingDelivery::healthy();
    let engine = new_engine(delivery.clone());

    let upload = engine
        .upload_medication("ada", "metformin", "500 mg", "whenever I feel like it")
        .await
        .unwrap();

    assert!(upload.parse_warning.is_some());
    assert_eq!(upload.scheduled, 0);
    assert!(upload.record.reminders.is_empty());
    assert!(engine.get_medication(upload.record.med_id).is_ok());
    assert!(delivery.scheduled.lock().unwrap().is_empty());
}

/// Editing a schedule cancels the old pending reminders before the new
/// set is scheduled — overlapping sets cannot double-deliver.
#[tokio::test]
async fn reparse_cancels_before_rescheduling() {
    let delivery = RecordingDelivery::healthy();
    let engine = new_engine(delivery.clone());

    let upload = engine
        .upload_medication("ada", "metformin", "500 mg", "08:00,20:00")
        .await
        .unwrap();
    assert_eq!(engine.scheduler().pending_count(), 2);

    let updated = engine
        .update_medication_schedule("ada", upload.record.med_id, "08:00,12:00")
        .await
        .unwrap();

    // both old timers were cancelled even though 08:00 overlaps
    assert_eq!(delivery.cancel_count(), 2);
    assert_eq!(updated.scheduled, 2);
    assert_eq!(engine.scheduler().pending_count(), 2);
}

/// For any posture sequence one user never has two active sessions.
#[tokio::test]
async fn at_most_one_active_session() {
    let delivery = RecordingDelivery::healthy();
    let engine = new_engine(delivery);
    let t0 = at("2026-05-01T09:00:00Z");

    let postures = [
        Posture::Sitting,
        Posture::Sitting,
        Posture::Standing,
        Posture::Sitting,
        Posture::Walking,
        Posture::Unknown,
        Posture::Sitting,
        Posture::Sitting,
    ];

    for (i, posture) in postures.into_iter().enumerate() {
        engine
            .ingest_cam_report(CamReport::new(
                "ada",
                posture,
                t0 + Duration::minutes(i as i64),
            ))
            .await
            .unwrap();
        // invariant holds after every step
        assert!(engine.active_session("ada").iter().count() <= 1);
    }
    assert!(engine.active_session("ada").is_some());
    assert_eq!(engine.session_archive("ada").len(), 2);
}

/// A stale gap is treated as an implicit stand-up: the session resolves
/// and no further tiers fire.
#[tokio::test]
async fn stale_gap_resolves_session() {
    let delivery = RecordingDelivery::healthy();
    let engine = new_engine(delivery.clone());
    let t0 = at("2026-05-01T09:00:00Z");

    sit(&engine, "ada", t0).await;
    // no reports for 20 minutes (> 10 minute default timeout)
    engine.sweep(t0 + Duration::minutes(20)).await;

    assert!(engine.active_session("ada").is_none());
    assert_eq!(engine.session_archive("ada").len(), 1);
    assert_eq!(delivery.cancel_count(), 3);

    // the tiers were cancelled before their times; nothing ever fires
    engine.sweep(t0 + Duration::hours(4)).await;
    assert_eq!(engine.stats().snapshot().reminders_fired, 0);
}

/// Out-of-order posture reports do not roll back newer state.
#[tokio::test]
async fn out_of_order_reports_ignored() {
    let delivery = RecordingDelivery::healthy();
    let engine = new_engine(delivery);
    let t0 = at("2026-05-01T09:00:00Z");

    sit(&engine, "ada", t0 + Duration::minutes(10)).await;
    let outcome = engine
        .ingest_cam_report(CamReport::new("ada", Posture::Standing, t0))
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        CamIngest::Applied {
            outcome: ReportOutcome::Ignored { .. }
        }
    ));
    assert!(engine.active_session("ada").is_some());
}

/// Incremental profile statistics match a batch computation of the same
/// values.
#[tokio::test]
async fn habit_profile_matches_batch_statistics() {
    let delivery = RecordingDelivery::healthy();
    let engine = new_engine(delivery);

    let clock_times = ["07:10", "07:25", "06:55", "07:40", "07:05", "07:20"];
    let mut values = Vec::new();
    for (day, clock) in clock_times.iter().enumerate() {
        let ts = at(&format!("2026-05-{:02}T{clock}:00Z", day + 1));
        values.push((ts.hour() * 3600 + ts.minute() * 60) as f64);
        engine
            .ingest_habit_event(HabitEvent::new("ada", "wake_up", ts))
            .unwrap();
    }

    let profile = engine.get_habit_profile("ada", "wake_up").unwrap();
    let n = values.len() as f64;
    let mean: f64 = values.iter().sum::<f64>() / n;
    let variance: f64 = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    assert_eq!(profile.count, values.len() as u64);
    assert!((profile.mean - mean).abs() < 1e-9);
    assert!((profile.variance() - variance).abs() < 1e-9);
}

/// Anomalies never fire below the minimum sample count, then fire for a
/// clear deviation once the profile is established.
#[tokio::test]
async fn anomaly_gating_and_detection() {
    let delivery = RecordingDelivery::healthy();
    let engine = new_engine(delivery.clone());

    // two observations, then an extreme value: still below the gate
    for clock in ["07:00", "07:10"] {
        engine
            .ingest_habit_event(HabitEvent::new(
                "ada",
                "wake_up",
                at(&format!("2026-05-01T{clock}:00Z")),
            ))
            .unwrap();
    }
    let early = engine
        .ingest_habit_event(HabitEvent::new("ada", "wake_up", at("2026-05-01T19:00:00Z")))
        .unwrap();
    assert!(early.anomaly.is_none());

    // rebuild a stable pattern; the outlier above widened the spread, so
    // use a fresh event type
    for (day, clock) in ["07:00", "07:05", "07:10", "06:55", "07:02", "07:08"]
        .iter()
        .enumerate()
    {
        engine
            .ingest_habit_event(HabitEvent::new(
                "ada",
                "bedtime",
                at(&format!("2026-05-{:02}T{clock}:00Z", day + 1)),
            ))
            .unwrap();
    }
    let flagged = engine
        .ingest_habit_event(HabitEvent::new("ada", "bedtime", at("2026-05-07T15:00:00Z")))
        .unwrap();
    let anomaly = flagged.anomaly.expect("deviation should be flagged");
    assert!(anomaly.z_score.abs() > 2.0);

    // advisory only: nothing was scheduled for it
    assert!(delivery.scheduled.lock().unwrap().is_empty());
}

/// Opting out of habit tracking suppresses anomaly reports but keeps the
/// profile updated.
#[tokio::test]
async fn habit_opt_out_suppresses_anomalies() {
    let delivery = RecordingDelivery::healthy();
    let engine = new_engine(delivery);
    engine.set_user_settings(
        "ada",
        UserSettingsUpdate {
            opt_out_camera: None,
            opt_out_habits: Some(true),
        },
    );

    for (day, clock) in ["07:00", "07:05", "07:10", "06:55", "07:02", "07:08"]
        .iter()
        .enumerate()
    {
        engine
            .ingest_habit_event(HabitEvent::new(
                "ada",
                "wake_up",
                at(&format!("2026-05-{:02}T{clock}:00Z", day + 1)),
            ))
            .unwrap();
    }
    let outcome = engine
        .ingest_habit_event(HabitEvent::new("ada", "wake_up", at("2026-05-07T15:00:00Z")))
        .unwrap();

    assert!(outcome.anomaly.is_none());
    // the observation still landed in the profile
    assert_eq!(outcome.profile.count, 7);
}

/// Adherence confirmation settles the fired reminder and lands in the
/// adherence log.
#[tokio::test]
async fn confirm_settles_fired_dose() {
    let delivery = RecordingDelivery::healthy();
    let engine = new_engine(delivery);

    let upload = engine
        .upload_medication("ada", "metformin", "500 mg", "every 2 hours")
        .await
        .unwrap();
    assert!(upload.scheduled > 0);

    // fire the first dose
    engine.sweep(Utc::now() + Duration::hours(3)).await;

    let record = engine
        .confirm_medication("ada", upload.record.med_id, true)
        .await
        .unwrap();
    assert!(record
        .reminders
        .iter()
        .any(|r| r.status == caremind::MedReminderStatus::Confirmed));

    let log = engine.adherence_for_user("ada");
    assert_eq!(log.len(), 1);
    assert!(log[0].taken);
}
