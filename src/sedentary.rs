//! Sedentary session tracking.
//!
//! Each user has at most one non-terminal session. A `sitting` report
//! with no active session opens one and schedules escalation reminders
//! at +1h/+2h/+3h; `standing`/`walking` resolves it and cancels whatever
//! has not fired yet. A long gap without reports is treated as an
//! implicit "stood up".
//!
//! Transitions are pure: they mutate the session slot and return the
//! scheduling side effects for the caller to execute after releasing the
//! user's lock.

use crate::events::Posture;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

/// Escalation checkpoints, in hours after session start.
pub const TIER_OFFSETS_HOURS: [i64; 3] = [1, 2, 3];

/// Resolved sessions kept per user.
const ARCHIVE_CAPACITY: usize = 32;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Resolved,
}

/// A tracked interval of continuous sitting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SedentarySession {
    pub user_id: String,
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub last_posture: Posture,
    pub last_update_at: DateTime<Utc>,
    /// Highest escalation tier whose reminder has fired (0 = none yet)
    pub reminder_tier: u8,
    pub state: SessionState,
}

impl SedentarySession {
    fn new(user_id: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            session_id: Uuid::new_v4(),
            started_at,
            last_posture: Posture::Sitting,
            last_update_at: started_at,
            reminder_tier: 0,
            state: SessionState::Active,
        }
    }

    /// Scheduled time for an escalation tier (1-based).
    pub fn tier_time(&self, tier: u8) -> DateTime<Utc> {
        self.started_at + Duration::hours(TIER_OFFSETS_HOURS[(tier as usize - 1).min(2)])
    }
}

/// Why a resolved session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveReason {
    /// An upright posture report arrived
    Upright,
    /// No cam reports within the stale timeout
    Stale,
}

/// Scheduling side effect produced by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Schedule the reminder for one escalation tier
    ScheduleTier {
        session_id: Uuid,
        tier: u8,
        at: DateTime<Utc>,
    },
    /// Cancel all not-yet-fired tier reminders for a session
    CancelTiers { session_id: Uuid },
}

/// What a cam report did to the user's session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReportOutcome {
    /// A new session opened
    Started { session_id: Uuid },
    /// Liveness refresh of the existing session
    Refreshed { session_id: Uuid },
    /// The active session resolved
    Resolved {
        session_id: Uuid,
        reason: ResolveReason,
        /// whether any escalation reminder had fired before resolution
        after_reminder: bool,
    },
    /// Report had no effect (no session, stale ordering, unknown posture)
    Ignored { reason: IgnoreReason },
}

/// Why a report was a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    NoActiveSession,
    OutOfOrder,
    UnknownPosture,
}

/// Apply one posture report to the user's session slot.
///
/// Out-of-order reports (timestamp not newer than `last_update_at`) are
/// dropped, making the handler idempotent and last-writer-by-timestamp.
pub fn apply_report(
    slot: &mut Option<SedentarySession>,
    user_id: &str,
    posture: Posture,
    timestamp: DateTime<Utc>,
) -> (ReportOutcome, Vec<SessionAction>) {
    if posture == Posture::Unknown {
        return (
            ReportOutcome::Ignored {
                reason: IgnoreReason::UnknownPosture,
            },
            Vec::new(),
        );
    }

    match slot {
        Some(session) if session.state == SessionState::Active => {
            if timestamp <= session.last_update_at {
                return (
                    ReportOutcome::Ignored {
                        reason: IgnoreReason::OutOfOrder,
                    },
                    Vec::new(),
                );
            }
            session.last_update_at = timestamp;
            session.last_posture = posture;

            if posture.is_upright() {
                session.state = SessionState::Resolved;
                let outcome = ReportOutcome::Resolved {
                    session_id: session.session_id,
                    reason: ResolveReason::Upright,
                    after_reminder: session.reminder_tier > 0,
                };
                let actions = vec![SessionAction::CancelTiers {
                    session_id: session.session_id,
                }];
                (outcome, actions)
            } else {
                (
                    ReportOutcome::Refreshed {
                        session_id: session.session_id,
                    },
                    Vec::new(),
                )
            }
        }
        _ => {
            if posture != Posture::Sitting {
                return (
                    ReportOutcome::Ignored {
                        reason: IgnoreReason::NoActiveSession,
                    },
                    Vec::new(),
                );
            }
            let session = SedentarySession::new(user_id, timestamp);
            let session_id = session.session_id;
            let actions = schedule_all_tiers(&session);
            *slot = Some(session);
            (ReportOutcome::Started { session_id }, actions)
        }
    }
}

/// Open a session explicitly (no cam report).
///
/// Idempotent: an existing active session is returned unchanged with no
/// side effects — duplicate creation is a state conflict handled as
/// success.
pub fn ensure_session(
    slot: &mut Option<SedentarySession>,
    user_id: &str,
    now: DateTime<Utc>,
) -> (Uuid, bool, Vec<SessionAction>) {
    if let Some(session) = slot {
        if session.state == SessionState::Active {
            return (session.session_id, false, Vec::new());
        }
    }
    let session = SedentarySession::new(user_id, now);
    let session_id = session.session_id;
    let actions = schedule_all_tiers(&session);
    *slot = Some(session);
    (session_id, true, actions)
}

fn schedule_all_tiers(session: &SedentarySession) -> Vec<SessionAction> {
    (1..=3u8)
        .map(|tier| SessionAction::ScheduleTier {
            session_id: session.session_id,
            tier,
            at: session.tier_time(tier),
        })
        .collect()
}

/// Resolve the session if no report arrived within `stale_timeout`.
///
/// A stale gap is read as an implicit "stood up": the session resolves
/// and pending reminders are cancelled without firing further.
pub fn resolve_if_stale(
    slot: &mut Option<SedentarySession>,
    now: DateTime<Utc>,
    stale_timeout: Duration,
) -> Option<(ReportOutcome, Vec<SessionAction>)> {
    let session = slot.as_mut()?;
    if session.state != SessionState::Active {
        return None;
    }
    if now - session.last_update_at < stale_timeout {
        return None;
    }

    session.state = SessionState::Resolved;
    session.last_update_at = now;
    let outcome = ReportOutcome::Resolved {
        session_id: session.session_id,
        reason: ResolveReason::Stale,
        after_reminder: session.reminder_tier > 0,
    };
    let actions = vec![SessionAction::CancelTiers {
        session_id: session.session_id,
    }];
    Some((outcome, actions))
}

/// Record a delivered tier reminder on the owning session.
///
/// Firing never changes the lifecycle state; it only raises the recorded
/// escalation tier. Returns false when the session is gone or the ids do
/// not match (e.g. a late report for a replaced session).
pub fn note_tier_fired(slot: &mut Option<SedentarySession>, session_id: Uuid, tier: u8) -> bool {
    match slot {
        Some(session)
            if session.session_id == session_id && session.state == SessionState::Active =>
        {
            session.reminder_tier = session.reminder_tier.max(tier);
            true
        }
        _ => false,
    }
}

/// Reminder text for an escalation tier.
pub fn tier_reminder_text(user_id: &str, tier: u8) -> String {
    let hours = TIER_OFFSETS_HOURS[(tier as usize - 1).min(2)];
    format!("Sedentary reminder for {user_id}: been sitting for {hours} hour(s)")
}

/// Bounded history of resolved sessions for one user.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct SessionArchive {
    entries: VecDeque<ArchivedSession>,
    /// Sessions resolved upright after at least one reminder fired
    pub returned_after_reminder: u64,
}

/// A resolved session with its resolution context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedSession {
    pub session: SedentarySession,
    pub resolved_at: DateTime<Utc>,
    pub reason: ResolveReason,
}

impl SessionArchive {
    pub fn push(&mut self, session: SedentarySession, resolved_at: DateTime<Utc>, reason: ResolveReason) {
        if reason == ResolveReason::Upright && session.reminder_tier > 0 {
            self.returned_after_reminder += 1;
        }
        self.entries.push_back(ArchivedSession {
            session,
            resolved_at,
            reason,
        });
        while self.entries.len() > ARCHIVE_CAPACITY {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn latest(&self) -> Option<&ArchivedSession> {
        self.entries.back()
    }
}
