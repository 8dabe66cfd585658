//! Medication records, dose reminders, and adherence logging.
//!
//! Records are created from an intake form (or OCR output) carrying a
//! free-text schedule. The parsed occurrences each get one `MedReminder`;
//! editing the schedule replaces occurrences wholesale, and the caller
//! cancels the old timers before scheduling the new ones.

pub mod schedule;

pub use schedule::{parse_occurrences, parse_schedule_text, ScheduleForm, PLANNING_HORIZON};

use crate::error::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use uuid::Uuid;

/// Lifecycle of one dose reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MedReminderStatus {
    Pending,
    Fired,
    Confirmed,
    Missed,
}

/// One reminder per parsed schedule occurrence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedReminder {
    pub reminder_id: Uuid,
    pub med_id: Uuid,
    pub user_id: String,
    pub scheduled_time: DateTime<Utc>,
    pub status: MedReminderStatus,
}

/// A stored medication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedRecord {
    pub med_id: Uuid,
    pub user_id: String,
    pub med_name: String,
    pub dosage: String,
    pub schedule_text: String,
    pub reminders: Vec<MedReminder>,
}

impl MedRecord {
    /// Parsed occurrence instants, in order.
    pub fn occurrences(&self) -> Vec<DateTime<Utc>> {
        self.reminders.iter().map(|r| r.scheduled_time).collect()
    }

    fn build_reminders(
        med_id: Uuid,
        user_id: &str,
        occurrences: &[DateTime<Utc>],
    ) -> Vec<MedReminder> {
        occurrences
            .iter()
            .map(|&scheduled_time| MedReminder {
                reminder_id: Uuid::new_v4(),
                med_id,
                user_id: user_id.to_string(),
                scheduled_time,
                status: MedReminderStatus::Pending,
            })
            .collect()
    }
}

/// One adherence confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdherenceRecord {
    pub med_id: Uuid,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub taken: bool,
}

/// Reminder text for a dose.
pub fn dose_reminder_text(med_name: &str, dosage: &str) -> String {
    if dosage.is_empty() {
        format!("Take {med_name}")
    } else {
        format!("Take {med_name} ({dosage})")
    }
}

/// Store of medication records and the adherence log.
#[derive(Debug, Default)]
pub struct MedStore {
    records: RwLock<HashMap<Uuid, MedRecord>>,
    adherence: Mutex<Vec<AdherenceRecord>>,
}

impl MedStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_adherence(&self) -> MutexGuard<'_, Vec<AdherenceRecord>> {
        self.adherence.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a record with one pending reminder per occurrence.
    pub fn create(
        &self,
        user_id: &str,
        med_name: &str,
        dosage: &str,
        schedule_text: &str,
        occurrences: &[DateTime<Utc>],
    ) -> MedRecord {
        let med_id = Uuid::new_v4();
        let record = MedRecord {
            med_id,
            user_id: user_id.to_string(),
            med_name: med_name.to_string(),
            dosage: dosage.to_string(),
            schedule_text: schedule_text.to_string(),
            reminders: MedRecord::build_reminders(med_id, user_id, occurrences),
        };
        if let Ok(mut records) = self.records.write() {
            records.insert(med_id, record.clone());
        }
        record
    }

    /// Fetch a record.
    pub fn get(&self, med_id: Uuid) -> Result<MedRecord, EngineError> {
        self.records
            .read()
            .ok()
            .and_then(|r| r.get(&med_id).cloned())
            .ok_or_else(|| EngineError::NotFound(format!("med {med_id}")))
    }

    /// All records for a user.
    pub fn list_for_user(&self, user_id: &str) -> Vec<MedRecord> {
        self.records
            .read()
            .map(|r| {
                r.values()
                    .filter(|m| m.user_id == user_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Occurrence times whose reminders are still pending.
    pub fn pending_occurrences(&self, med_id: Uuid) -> Vec<DateTime<Utc>> {
        self.records
            .read()
            .ok()
            .and_then(|r| {
                r.get(&med_id).map(|m| {
                    m.reminders
                        .iter()
                        .filter(|rem| rem.status == MedReminderStatus::Pending)
                        .map(|rem| rem.scheduled_time)
                        .collect()
                })
            })
            .unwrap_or_default()
    }

    /// Replace the schedule and regenerate reminders.
    ///
    /// The caller must cancel timers for the previously-pending
    /// occurrences (see `pending_occurrences`) before scheduling the new
    /// set, so overlapping old/new occurrence sets cannot double-deliver.
    pub fn replace_schedule(
        &self,
        med_id: Uuid,
        schedule_text: &str,
        occurrences: &[DateTime<Utc>],
    ) -> Result<MedRecord, EngineError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| EngineError::Storage("med store lock poisoned".to_string()))?;
        let record = records
            .get_mut(&med_id)
            .ok_or_else(|| EngineError::NotFound(format!("med {med_id}")))?;
        record.schedule_text = schedule_text.to_string();
        record.reminders = MedRecord::build_reminders(med_id, &record.user_id, occurrences);
        Ok(record.clone())
    }

    /// Mark the reminder for `occurrence` as fired.
    pub fn note_fired(&self, med_id: Uuid, occurrence: DateTime<Utc>) -> bool {
        let Ok(mut records) = self.records.write() else {
            return false;
        };
        let Some(record) = records.get_mut(&med_id) else {
            return false;
        };
        for reminder in &mut record.reminders {
            if reminder.scheduled_time == occurrence
                && reminder.status == MedReminderStatus::Pending
            {
                reminder.status = MedReminderStatus::Fired;
                return true;
            }
        }
        false
    }

    /// Whether an occurrence still has a pending reminder; retry probes
    /// use this to drop timers for edited or deleted schedules.
    pub fn occurrence_wanted(&self, med_id: Uuid, occurrence: DateTime<Utc>) -> bool {
        self.records
            .read()
            .map(|r| {
                r.get(&med_id)
                    .map(|m| {
                        m.reminders.iter().any(|rem| {
                            rem.scheduled_time == occurrence
                                && rem.status == MedReminderStatus::Pending
                        })
                    })
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    /// Log an adherence confirmation and settle the matching reminder.
    ///
    /// The most recent fired reminder settles first; with none fired, the
    /// reminder nearest to `now` does. Returns the updated record.
    pub fn confirm(
        &self,
        user_id: &str,
        med_id: Uuid,
        taken: bool,
        now: DateTime<Utc>,
    ) -> Result<MedRecord, EngineError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| EngineError::Storage("med store lock poisoned".to_string()))?;
        let record = records
            .get_mut(&med_id)
            .ok_or_else(|| EngineError::NotFound(format!("med {med_id}")))?;
        if record.user_id != user_id {
            return Err(EngineError::NotFound(format!(
                "med {med_id} for user {user_id}"
            )));
        }

        let settled = MedReminderStatus::from_taken(taken);
        let target = record
            .reminders
            .iter()
            .enumerate()
            .filter(|(_, r)| r.status == MedReminderStatus::Fired)
            .max_by_key(|(_, r)| r.scheduled_time)
            .map(|(i, _)| i)
            .or_else(|| {
                // no fired reminder yet: settle the pending one nearest now
                record
                    .reminders
                    .iter()
                    .enumerate()
                    .filter(|(_, r)| r.status == MedReminderStatus::Pending)
                    .min_by_key(|(_, r)| (r.scheduled_time - now).num_seconds().abs())
                    .map(|(i, _)| i)
            });
        if let Some(i) = target {
            record.reminders[i].status = settled;
        }

        let updated = record.clone();
        drop(records);

        self.lock_adherence().push(AdherenceRecord {
            med_id,
            user_id: user_id.to_string(),
            timestamp: now,
            taken,
        });

        Ok(updated)
    }

    /// Adherence history for a user.
    pub fn adherence_for_user(&self, user_id: &str) -> Vec<AdherenceRecord> {
        self.lock_adherence()
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect()
    }
}

impl MedReminderStatus {
    fn from_taken(taken: bool) -> Self {
        if taken {
            MedReminderStatus::Confirmed
        } else {
            MedReminderStatus::Missed
        }
    }
}
