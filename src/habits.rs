//! Habit profile engine.
//!
//! Maintains a running statistical summary per (user, event type) and
//! scores each new observation against the history that preceded it.
//! Profiles are updated with a single-pass Welford accumulator so memory
//! stays bounded regardless of event volume.

use crate::config::AnomalyConfig;
use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::collections::HashMap;
use std::sync::RwLock;

/// Running statistics for one (user, event type) pair.
///
/// `variance_accum` is the Welford M2 sum; it is non-negative by
/// construction. `confidence` saturates below 1.0 as the sample count
/// grows and never decreases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HabitProfile {
    pub user_id: String,
    pub event_type: String,
    pub count: u64,
    pub mean: f64,
    pub variance_accum: f64,
    pub confidence: f64,
    pub last_updated: DateTime<Utc>,
}

impl HabitProfile {
    /// Create an empty profile.
    pub fn new(user_id: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            event_type: event_type.into(),
            count: 0,
            mean: 0.0,
            variance_accum: 0.0,
            confidence: 0.0,
            last_updated: Utc::now(),
        }
    }

    /// Population variance of the observed values.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.variance_accum / self.count as f64
        }
    }

    /// Population standard deviation of the observed values.
    pub fn stddev(&self) -> f64 {
        self.variance().sqrt()
    }
}

/// Anomaly verdict for a single observation, scored against the profile
/// as it stood *before* the observation was folded in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub user_id: String,
    pub event_type: String,
    /// The observed value (seconds of day)
    pub value: f64,
    pub z_score: f64,
    /// Two-sided tail probability under a normal model
    pub p_value: f64,
    pub baseline_mean: f64,
    pub baseline_stddev: f64,
    pub confidence: f64,
}

/// Project a timestamp to seconds-of-day in the given zone.
///
/// Habit values are clock positions, not instants: "woke at 07:30" should
/// compare equal across days and DST shifts, so the projection happens in
/// the user's zone.
pub fn seconds_of_day(timestamp: DateTime<Utc>, tz: Tz) -> f64 {
    let local = timestamp.with_timezone(&tz);
    (local.hour() * 3600 + local.minute() * 60 + local.second()) as f64
}

/// Fold one observation into a profile, returning an anomaly report when
/// the value deviates from an established pattern.
///
/// The observation is scored first (pre-update statistics), then folded
/// in, so a value never contributes to the baseline it is judged against.
/// Profiles below the confidence or sample-count gates never report
/// anomalies, whatever the value.
pub fn observe_value(
    profile: &mut HabitProfile,
    value: f64,
    now: DateTime<Utc>,
    cfg: &AnomalyConfig,
) -> Option<AnomalyReport> {
    let anomaly = score_value(profile, value, cfg);

    // Welford update
    profile.count += 1;
    let delta = value - profile.mean;
    profile.mean += delta / profile.count as f64;
    let delta2 = value - profile.mean;
    profile.variance_accum += delta * delta2;
    // guard against negative drift from floating-point cancellation
    if profile.variance_accum < 0.0 {
        profile.variance_accum = 0.0;
    }

    let saturating = profile.count as f64 / (profile.count as f64 + cfg.confidence_k);
    profile.confidence = profile.confidence.max(saturating);
    profile.last_updated = now;

    anomaly
}

/// Score a value against the current profile without mutating it.
pub fn score_value(
    profile: &HabitProfile,
    value: f64,
    cfg: &AnomalyConfig,
) -> Option<AnomalyReport> {
    if profile.count < cfg.min_count || profile.confidence < cfg.min_confidence {
        return None;
    }
    let stddev = profile.stddev();
    if stddev <= f64::EPSILON {
        return None;
    }

    let z = (value - profile.mean) / stddev;
    if z.abs() <= cfg.z_threshold {
        return None;
    }

    let normal = Normal::new(0.0, 1.0).expect("standard normal is well-formed");
    let p_value = 2.0 * (1.0 - normal.cdf(z.abs()));

    Some(AnomalyReport {
        user_id: profile.user_id.clone(),
        event_type: profile.event_type.clone(),
        value,
        z_score: z,
        p_value,
        baseline_mean: profile.mean,
        baseline_stddev: stddev,
        confidence: profile.confidence,
    })
}

/// Published profile snapshots for queries.
///
/// Mutation happens under the owning user's lock; after each commit the
/// updated profile is published here so `get` never contends with the
/// mutation path. Readers may observe a snapshot one update behind.
#[derive(Debug, Default)]
pub struct ProfileSnapshots {
    inner: RwLock<HashMap<(String, String), HabitProfile>>,
}

impl ProfileSnapshots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the post-commit state of a profile.
    pub fn publish(&self, profile: HabitProfile) {
        let key = (profile.user_id.clone(), profile.event_type.clone());
        if let Ok(mut map) = self.inner.write() {
            map.insert(key, profile);
        }
    }

    /// Fetch the latest published snapshot, if any.
    pub fn get(&self, user_id: &str, event_type: &str) -> Option<HabitProfile> {
        self.inner
            .read()
            .ok()?
            .get(&(user_id.to_string(), event_type.to_string()))
            .cloned()
    }
}
