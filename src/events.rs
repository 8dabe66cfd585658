//! Event envelope types accepted by the ingestion pipeline.
//!
//! External producers (posture classifier, med intake form, habit
//! emitters) deliver events in these shapes. The engine validates only
//! the envelope — user id and timestamp — never the classification
//! itself.

use crate::error::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Posture label reported by the external pose classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Posture {
    Sitting,
    Standing,
    Walking,
    /// Classifier could not decide; ignored by the session manager.
    Unknown,
}

impl Posture {
    /// Whether this posture resolves an active sedentary session.
    pub fn is_upright(&self) -> bool {
        matches!(self, Posture::Standing | Posture::Walking)
    }
}

/// A posture report from the camera pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CamReport {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face_id: Option<String>,
    pub posture: Posture,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
}

impl CamReport {
    /// Create a minimal report with just the fields the engine acts on.
    pub fn new(user_id: impl Into<String>, posture: Posture, timestamp: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            face_id: None,
            posture,
            timestamp,
            location_hash: None,
            image_id: None,
        }
    }
}

/// A generic life-event observation for habit modeling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HabitEvent {
    pub user_id: String,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
}

impl HabitEvent {
    pub fn new(
        user_id: impl Into<String>,
        event_type: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            event_type: event_type.into(),
            timestamp,
        }
    }
}

/// An adherence confirmation for a medication dose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedConfirmation {
    pub user_id: String,
    pub med_id: Uuid,
    pub taken: bool,
    pub timestamp: DateTime<Utc>,
}

/// Unified inbound event for the ingestion pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InboundEvent {
    Cam(CamReport),
    Habit(HabitEvent),
    Adherence(MedConfirmation),
}

impl InboundEvent {
    pub fn user_id(&self) -> &str {
        match self {
            InboundEvent::Cam(e) => &e.user_id,
            InboundEvent::Habit(e) => &e.user_id,
            InboundEvent::Adherence(e) => &e.user_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            InboundEvent::Cam(e) => e.timestamp,
            InboundEvent::Habit(e) => e.timestamp,
            InboundEvent::Adherence(e) => e.timestamp,
        }
    }

    /// Validate the envelope before any state mutation.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.user_id().trim().is_empty() {
            return Err(EngineError::Validation("empty user_id".to_string()));
        }
        if let InboundEvent::Habit(e) = self {
            if e.event_type.trim().is_empty() {
                return Err(EngineError::Validation("empty event_type".to_string()));
            }
        }
        Ok(())
    }
}
