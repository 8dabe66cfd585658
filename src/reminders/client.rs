//! Client for the external reminder delivery service.
//!
//! The delivery collaborator exposes a narrow schedule/cancel interface.
//! It is expected to be unavailable at times; callers degrade to the
//! local queue in `reminders::ReminderScheduler` rather than failing.

use crate::config::DeliveryConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Delivery client error types.
#[derive(Debug)]
pub enum DeliveryError {
    /// Network/HTTP error
    Network(String),
    /// Server returned an error response
    Server { status: u16, message: String },
    /// JSON serialization error
    Serialization(String),
}

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryError::Network(msg) => write!(f, "delivery network error: {msg}"),
            DeliveryError::Server { status, message } => {
                write!(f, "delivery server error ({status}): {message}")
            }
            DeliveryError::Serialization(msg) => {
                write!(f, "delivery serialization error: {msg}")
            }
        }
    }
}

impl std::error::Error for DeliveryError {}

/// Payload delivered with a reminder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderPayload {
    /// Human-readable reminder text
    pub text: String,
    /// User the reminder belongs to
    pub user_id: String,
    /// Producing instance identifier
    pub source: String,
}

/// Request body for the schedule endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleRequest {
    /// Idempotency key; re-scheduling the same key replaces the timer
    pub key: String,
    /// Delivery time (ISO-8601)
    pub at_time: DateTime<Utc>,
    pub payload: ReminderPayload,
}

/// Response from the schedule endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleResponse {
    pub reminder_id: String,
}

/// Outcome of a cancel call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelStatus {
    Cancelled,
    AlreadyFired,
    NotFound,
}

/// Response from the cancel endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct CancelResponse {
    pub status: CancelStatus,
}

/// Capability interface over the delivery collaborator.
///
/// The live implementation talks HTTP; tests substitute in-memory
/// doubles. The scheduler selects between remote delivery and the local
/// degraded queue without the core logic branching on transport.
pub trait DeliveryService: Send + Sync + 'static {
    /// Ask the collaborator to deliver `payload` at `at_time`.
    fn schedule(
        &self,
        request: &ScheduleRequest,
    ) -> impl Future<Output = Result<String, DeliveryError>> + Send;

    /// Cancel a previously scheduled reminder.
    fn cancel(
        &self,
        reminder_id: &str,
    ) -> impl Future<Output = Result<CancelStatus, DeliveryError>> + Send;
}

/// HTTP client for the reminder delivery service.
pub struct HttpDeliveryClient {
    config: DeliveryConfig,
    client: reqwest::Client,
    instance_id: String,
}

impl HttpDeliveryClient {
    /// Create a new delivery client.
    pub fn new(config: DeliveryConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        // Identify this producer instance from hostname + a short nonce
        let host = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let instance_id = format!(
            "caremind-{}-{}",
            host,
            &uuid::Uuid::new_v4().to_string()[..8]
        );

        Self {
            config,
            client,
            instance_id,
        }
    }

    /// Get the producer instance ID stamped into payloads.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.token {
            Some(token) => req.header("Authorization", format!("Bearer {token}")),
            None => req,
        }
    }
}

impl DeliveryService for HttpDeliveryClient {
    async fn schedule(&self, request: &ScheduleRequest) -> Result<String, DeliveryError> {
        let response = self
            .authorize(self.client.post(self.config.schedule_url()))
            .json(request)
            .send()
            .await
            .map_err(|e| DeliveryError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(DeliveryError::Server {
                status: status.as_u16(),
                message,
            });
        }

        let body: ScheduleResponse = response
            .json()
            .await
            .map_err(|e| DeliveryError::Serialization(e.to_string()))?;

        Ok(body.reminder_id)
    }

    async fn cancel(&self, reminder_id: &str) -> Result<CancelStatus, DeliveryError> {
        let response = self
            .authorize(self.client.post(self.config.cancel_url(reminder_id)))
            .send()
            .await
            .map_err(|e| DeliveryError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(DeliveryError::Server {
                status: status.as_u16(),
                message,
            });
        }

        let body: CancelResponse = response
            .json()
            .await
            .map_err(|e| DeliveryError::Serialization(e.to_string()))?;

        Ok(body.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_id_prefix() {
        let client = HttpDeliveryClient::new(DeliveryConfig::default());
        assert!(client.instance_id().starts_with("caremind-"));
    }

    #[test]
    fn test_cancel_status_wire_labels() {
        let parsed: CancelResponse =
            serde_json::from_str(r#"{"status":"already_fired"}"#).unwrap();
        assert_eq!(parsed.status, CancelStatus::AlreadyFired);
    }

    #[test]
    fn test_schedule_request_serializes_iso8601() {
        let request = ScheduleRequest {
            key: "sed:ada:1".to_string(),
            at_time: "2026-05-01T10:00:00Z".parse().unwrap(),
            payload: ReminderPayload {
                text: "stand up".to_string(),
                user_id: "ada".to_string(),
                source: "test".to_string(),
            },
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("2026-05-01T10:00:00Z"));
        assert!(json.contains("\"key\":\"sed:ada:1\""));
    }
}
