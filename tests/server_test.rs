//! Integration tests for the HTTP adapter.

#[cfg(feature = "server")]
mod server_tests {
    use caremind::config::Config;
    use caremind::engine::Orchestrator;
    use caremind::reminders::HttpDeliveryClient;
    use caremind::server;
    use std::sync::Arc;
    use std::time::Duration;

    async fn start_server() -> (std::net::SocketAddr, tokio::sync::oneshot::Sender<()>) {
        let mut config = Config::default();
        config.data_path =
            std::env::temp_dir().join(format!("caremind-server-test-{}", uuid::Uuid::new_v4()));
        // point at a dead port so delivery degrades instead of hanging
        config.delivery.port = 1;
        config.delivery.timeout_secs = 1;

        let delivery = HttpDeliveryClient::new(config.delivery.clone());
        let engine = Arc::new(Orchestrator::new(config, delivery).expect("engine"));
        server::run(engine, 0).await.expect("server should start")
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (addr, shutdown_tx) = start_server().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let client = reqwest::Client::new();
        let response = client
            .get(format!("http://{}/health", addr))
            .send()
            .await
            .expect("Failed to send request");

        assert!(response.status().is_success());

        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["status"], "ok");
        assert!(body["version"].as_str().is_some());

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_cam_ingest_requires_timestamp() {
        let (addr, shutdown_tx) = start_server().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let client = reqwest::Client::new();
        let response = client
            .post(format!("http://{}/ingest/cam", addr))
            .json(&serde_json::json!({
                "user_id": "ada",
                "posture": "sitting"
            }))
            .send()
            .await
            .expect("Failed to send request");

        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["code"], "VALIDATION");

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_cam_ingest_opens_session_despite_dead_delivery() {
        let (addr, shutdown_tx) = start_server().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let client = reqwest::Client::new();
        let response = client
            .post(format!("http://{}/ingest/cam", addr))
            .json(&serde_json::json!({
                "user_id": "ada",
                "posture": "sitting",
                "timestamp": "2026-05-01T09:00:00Z"
            }))
            .send()
            .await
            .expect("Failed to send request");

        // the delivery collaborator is unreachable, but ingestion succeeds
        assert!(response.status().is_success());
        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["status"], "ok");
        assert_eq!(body["result"]["outcome"], "started");

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_med_upload_warning_for_bad_schedule() {
        let (addr, shutdown_tx) = start_server().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let client = reqwest::Client::new();
        let response = client
            .post(format!("http://{}/meds/upload", addr))
            .json(&serde_json::json!({
                "user_id": "ada",
                "med_name": "metformin",
                "dosage": "500 mg",
                "schedule_text": "whenever I feel like it"
            }))
            .send()
            .await
            .expect("Failed to send request");

        assert!(response.status().is_success());
        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["status"], "warning");
        assert!(body["result"]["parse_warning"].as_str().is_some());

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_habit_profile_not_found() {
        let (addr, shutdown_tx) = start_server().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let client = reqwest::Client::new();
        let response = client
            .get(format!("http://{}/habits/ada/wake_up", addr))
            .send()
            .await
            .expect("Failed to send request");

        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_settings_roundtrip() {
        let (addr, shutdown_tx) = start_server().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let client = reqwest::Client::new();
        let response = client
            .post(format!("http://{}/users/ada/settings", addr))
            .json(&serde_json::json!({ "opt_out_camera": true }))
            .send()
            .await
            .expect("Failed to send request");
        assert!(response.status().is_success());

        let body: serde_json::Value = client
            .get(format!("http://{}/users/ada/settings", addr))
            .send()
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");
        assert_eq!(body["opt_out_camera"], true);
        assert_eq!(body["opt_out_habits"], false);

        let _ = shutdown_tx.send(());
    }
}
