//! Caremind - behavioral orchestration engine for proactive care reminders.
//!
//! This library fuses low-rate sensor events (posture reports), medication
//! schedules, and generic habit telemetry into per-user state, and emits
//! reminders when behavioral conditions are met: prolonged sedentary time,
//! due medication doses, and statistically anomalous habit deviations.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Orchestrator                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │  cam reports ──▶ ┌───────────┐    ┌──────────────┐           │
//! │                  │ Sedentary │───▶│   Reminder   │──▶ HTTP   │
//! │  med uploads ──▶ │ Sessions  │    │  Scheduler   │  delivery │
//! │        │         └───────────┘    └──────┬───────┘  service  │
//! │        ▼                                 │ degrade           │
//! │  ┌───────────┐   ┌───────────┐    ┌──────▼───────┐           │
//! │  │ Schedule  │   │   Habit   │    │ Local durable│           │
//! │  │  Parser   │   │ Profiles  │    │    queue     │           │
//! │  └───────────┘   └───────────┘    └──────────────┘           │
//! │  habit events ────────▲                                      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Per-user state is an arena of independently locked records: flows for
//! different users run in parallel while one user's mutations stay
//! serialized. The external delivery service is expected to be flaky;
//! reminders it rejects wait in a durable local queue and are retried
//! with exponential backoff.
//!
//! # Example
//!
//! ```no_run
//! use caremind::config::Config;
//! use caremind::engine::Orchestrator;
//! use caremind::events::{CamReport, Posture};
//! use caremind::reminders::HttpDeliveryClient;
//! use chrono::Utc;
//!
//! # async fn demo() -> Result<(), caremind::error::EngineError> {
//! let config = Config::default();
//! let delivery = HttpDeliveryClient::new(config.delivery.clone());
//! let engine = Orchestrator::new(config, delivery)?;
//!
//! engine
//!     .ingest_cam_report(CamReport::new("ada", Posture::Sitting, Utc::now()))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod habits;
pub mod meds;
pub mod reminders;
pub mod sedentary;
pub mod stats;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use config::Config;
pub use engine::{CamIngest, HabitIngest, IngestOutcome, MedUpload, Orchestrator, SessionCreate};
pub use error::EngineError;
pub use events::{CamReport, HabitEvent, InboundEvent, MedConfirmation, Posture};
pub use habits::{AnomalyReport, HabitProfile};
pub use meds::{MedRecord, MedReminder, MedReminderStatus};
pub use reminders::{
    CancelStatus, DeliveryService, HttpDeliveryClient, ReminderKey, ReminderScheduler,
};
pub use sedentary::{SedentarySession, SessionState};
pub use stats::{EngineStats, SharedStats, StatsSnapshot};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
