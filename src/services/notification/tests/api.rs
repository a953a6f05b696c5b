//! End-to-end tests driving the HTTP surface of the delivery engine.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tower::ServiceExt;

use courier_notification::channels::{
    AdapterInfo, ChannelAdapter, ProviderReceipt, SendError, SmsAdapter, WhatsAppAdapter,
};
use courier_notification::{create_router, EngineConfig, NotificationService, SanitizerPolicy};
use courier_shared::{ChannelKind, Notification};

fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.retry.initial_delay_secs = 0;
    config.retry.max_delay_secs = 0;
    config.retry.jitter = false;
    config.dispatch.await_timeout_secs = 5;
    config.rate_limit.limit = 1000;
    config
}

fn app(config: EngineConfig) -> (Arc<NotificationService>, Router) {
    let service = NotificationService::new(config).expect("engine should build");
    service.start();
    let router = create_router(service.clone());
    (service, router)
}

/// Email adapter that always fails transiently, for breaker scenarios
struct DownEmailAdapter;

#[async_trait]
impl ChannelAdapter for DownEmailAdapter {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn send(&self, _n: &Notification) -> Result<ProviderReceipt, SendError> {
        Err(SendError::Transient("relay unreachable".to_string()))
    }

    async fn health_check(&self) -> bool {
        false
    }

    fn info(&self) -> AdapterInfo {
        AdapterInfo {
            name: "email".to_string(),
            provider: "down".to_string(),
            enabled: true,
        }
    }
}

fn post(path: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(path: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(path)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn email_send_returns_success_and_latency() {
    let (service, router) = app(test_config());

    let response = router
        .clone()
        .oneshot(post(
            "/notifications/email",
            json!({
                "to": "user@example.com",
                "subject": "Welcome",
                "html": "<p>Hello and welcome</p>"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert!(body["id"].is_string());
    assert_eq!(body["message"], "Notification sent successfully");
    assert!(body["latency_ms"].as_u64().is_some());

    service.shutdown().await;
}

#[tokio::test]
async fn invalid_email_recipient_is_a_400() {
    let (service, router) = app(test_config());

    let response = router
        .clone()
        .oneshot(post(
            "/notifications/email",
            json!({
                "to": "not-an-address",
                "subject": "Hi",
                "html": "hello"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    service.shutdown().await;
}

#[tokio::test]
async fn burst_of_sixty_hits_the_rate_limit() {
    let mut config = test_config();
    config.rate_limit.limit = 30;
    let (service, router) = app(config);

    let mut too_many = 0;
    let mut saw_headers = false;
    for _ in 0..60 {
        let response = router
            .clone()
            .oneshot(post(
                "/notifications/sms",
                json!({"to": "+15551234567", "message": "ping"}),
            ))
            .await
            .unwrap();
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            too_many += 1;
            let headers = response.headers();
            saw_headers = headers.contains_key("x-ratelimit-limit")
                && headers.contains_key("x-ratelimit-remaining")
                && headers.contains_key("retry-after");
        }
    }

    assert!(too_many >= 1, "expected at least one 429 in a 60-burst");
    assert!(saw_headers, "429 responses must carry rate-limit headers");

    service.shutdown().await;
}

#[tokio::test]
async fn clean_policy_strips_injected_script() {
    let (service, router) = app(test_config());

    let response = router
        .clone()
        .oneshot(post(
            "/notifications/email",
            json!({
                "to": "user@example.com",
                "subject": "Hi",
                "html": "Hello <script>alert('xss')</script> <a href=\"javascript:x()\">y</a> <img onerror=boom()>"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let cleaned = body["sanitized_content"].as_str().unwrap().to_lowercase();
    assert!(!cleaned.contains("<script"));
    assert!(!cleaned.contains("javascript:"));
    assert!(!cleaned.contains("onerror"));

    service.shutdown().await;
}

#[tokio::test]
async fn reject_policy_refuses_injected_script() {
    let mut config = test_config();
    config.sanitizer.policy = SanitizerPolicy::Reject;
    let (service, router) = app(config);

    let response = router
        .clone()
        .oneshot(post(
            "/notifications/email",
            json!({
                "to": "user@example.com",
                "subject": "Hi",
                "html": "<script>alert(1)</script>"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "SECURITY_VALIDATION_ERROR");

    service.shutdown().await;
}

#[tokio::test]
async fn external_id_lookup_404_before_200_after() {
    let (service, router) = app(test_config());

    let missing = router
        .clone()
        .oneshot(get("/notifications/external/ghost-123"))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let send = router
        .clone()
        .oneshot(post(
            "/notifications/email",
            json!({"to": "user@example.com", "subject": "Hi", "html": "hello"}),
        ))
        .await
        .unwrap();
    let sent = body_json(send).await;
    let id = sent["id"].as_str().unwrap().to_string();

    // The provider-assigned id comes back through the record.
    let external_id = service
        .find(id.parse().unwrap())
        .unwrap()
        .external_id
        .expect("sent notification has an external id");

    let found = router
        .clone()
        .oneshot(get(&format!("/notifications/external/{}", external_id)))
        .await
        .unwrap();
    assert_eq!(found.status(), StatusCode::OK);
    let body = body_json(found).await;
    assert_eq!(body["id"], id.as_str());
    assert_eq!(body["external_id"], external_id.as_str());
    assert_eq!(body["channel"], "email");
    assert_eq!(body["status"], "sent");

    service.shutdown().await;
}

#[tokio::test]
async fn manual_retry_returns_a_ticket_for_the_original() {
    let (service, router) = app(test_config());

    // A scheduled notification stays pending, so it is retryable.
    let scheduled_for = Utc::now() + chrono::Duration::hours(1);
    let send = router
        .clone()
        .oneshot(post(
            "/notifications/email",
            json!({
                "to": "user@example.com",
                "subject": "Later",
                "html": "hello",
                "scheduled_for": scheduled_for
            }),
        ))
        .await
        .unwrap();
    let accepted = body_json(send).await;
    let id = accepted["id"].as_str().unwrap().to_string();

    let retry = router
        .clone()
        .oneshot(post(
            "/notifications/retry",
            json!({"id": id, "reason": "operator request"}),
        ))
        .await
        .unwrap();
    assert_eq!(retry.status(), StatusCode::OK);
    let ticket = body_json(retry).await;
    assert_eq!(ticket["original_id"], id.as_str());
    assert_ne!(ticket["retry_id"], ticket["original_id"]);
    assert_eq!(ticket["retry_config"]["max_retries"], 3);

    service.shutdown().await;
}

#[tokio::test]
async fn retry_of_a_terminal_notification_conflicts() {
    let (service, router) = app(test_config());

    let send = router
        .clone()
        .oneshot(post(
            "/notifications/email",
            json!({"to": "user@example.com", "subject": "Hi", "html": "hello"}),
        ))
        .await
        .unwrap();
    let sent = body_json(send).await;
    assert_eq!(sent["status"], "sent");
    let id = sent["id"].as_str().unwrap().to_string();

    let retry = router
        .clone()
        .oneshot(post(
            "/notifications/retry",
            json!({"id": id, "reason": "too late"}),
        ))
        .await
        .unwrap();
    assert_eq!(retry.status(), StatusCode::CONFLICT);

    let unknown = router
        .clone()
        .oneshot(post(
            "/notifications/retry",
            json!({"id": uuid::Uuid::new_v4(), "reason": "ghost"}),
        ))
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    service.shutdown().await;
}

#[tokio::test]
async fn scheduled_notification_cancels_once() {
    let (service, router) = app(test_config());

    let scheduled_for = Utc::now() + chrono::Duration::hours(1);
    let send = router
        .clone()
        .oneshot(post(
            "/notifications/sms",
            json!({
                "to": "+15551234567",
                "message": "reminder",
                "scheduled_for": scheduled_for
            }),
        ))
        .await
        .unwrap();
    let accepted = body_json(send).await;
    assert_eq!(accepted["status"], "pending");
    let id = accepted["id"].as_str().unwrap().to_string();

    let cancel = router
        .clone()
        .oneshot(post(
            "/notifications/cancel",
            json!({"id": id, "reason": "changed plans"}),
        ))
        .await
        .unwrap();
    assert_eq!(cancel.status(), StatusCode::OK);
    let body = body_json(cancel).await;
    assert_eq!(body["id"], id.as_str());
    assert_eq!(body["status"], "cancelled");

    // A cancelled notification never transitions again.
    let again = router
        .clone()
        .oneshot(post("/notifications/cancel", json!({"id": id})))
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::CONFLICT);

    service.shutdown().await;
}

#[tokio::test]
async fn cancel_after_send_conflicts() {
    let (service, router) = app(test_config());

    let send = router
        .clone()
        .oneshot(post(
            "/notifications/email",
            json!({"to": "user@example.com", "subject": "Hi", "html": "hello"}),
        ))
        .await
        .unwrap();
    let sent = body_json(send).await;
    let id = sent["id"].as_str().unwrap().to_string();

    let cancel = router
        .clone()
        .oneshot(post("/notifications/cancel", json!({"id": id})))
        .await
        .unwrap();
    assert_eq!(cancel.status(), StatusCode::CONFLICT);

    service.shutdown().await;
}

#[tokio::test]
async fn batch_of_fifty_mostly_succeeds() {
    let (service, router) = app(test_config());

    let notifications: Vec<Value> = (0..50)
        .map(|i| {
            json!({
                "channel": "email",
                "to": format!("user{}@example.com", i),
                "subject": "Batch",
                "content": format!("Message {}", i)
            })
        })
        .collect();

    let response = router
        .clone()
        .oneshot(post(
            "/notifications",
            json!({"action": "batch", "notifications": notifications}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 50);
    let successes = results
        .iter()
        .filter(|r| r["success"].as_bool().unwrap_or(false))
        .count();
    assert!(successes >= 40, "expected >=80% success, got {}", successes);

    service.shutdown().await;
}

#[tokio::test]
async fn generic_send_routes_by_channel() {
    let (service, router) = app(test_config());

    let response = router
        .clone()
        .oneshot(post(
            "/notifications",
            json!({
                "action": "send",
                "notification": {
                    "channel": "whatsapp",
                    "to": "+15551234567",
                    "content": "order update",
                    "template_id": "order_update_v2"
                }
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["channel"], "whatsapp");
    assert_eq!(body["success"], true);

    service.shutdown().await;
}

#[tokio::test]
async fn list_paginates_with_totals() {
    let (service, router) = app(test_config());

    for i in 0..5 {
        let response = router
            .clone()
            .oneshot(post(
                "/notifications/email",
                json!({
                    "to": format!("user{}@example.com", i),
                    "subject": "Hi",
                    "html": "hello"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = router
        .clone()
        .oneshot(get("/notifications?page=1&limit=2"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["notifications"].as_array().unwrap().len(), 2);
    assert_eq!(body["pagination"]["page"], 1);
    assert_eq!(body["pagination"]["limit"], 2);
    assert_eq!(body["pagination"]["total"], 5);

    let sent_only = router
        .clone()
        .oneshot(get("/notifications?status=sent&limit=100"))
        .await
        .unwrap();
    let body = body_json(sent_only).await;
    assert_eq!(body["pagination"]["total"], 5);

    service.shutdown().await;
}

#[tokio::test]
async fn health_and_stats_report_the_engine_state() {
    let (service, router) = app(test_config());

    let _ = router
        .clone()
        .oneshot(post(
            "/notifications/email",
            json!({"to": "user@example.com", "subject": "Hi", "html": "hello"}),
        ))
        .await
        .unwrap();

    let health = router
        .clone()
        .oneshot(get("/notifications/health"))
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);
    let body = body_json(health).await;
    assert_eq!(body["status"], "healthy");
    for channel in ["email", "sms", "whatsapp"] {
        assert_eq!(body["details"]["adapters"][channel]["healthy"], true);
        assert_eq!(body["details"]["adapters"][channel]["circuit"], "closed");
    }

    let stats = router
        .clone()
        .oneshot(get("/notifications/stats?detailed=true"))
        .await
        .unwrap();
    assert_eq!(stats.status(), StatusCode::OK);
    let body = body_json(stats).await;
    assert_eq!(body["metrics"]["channels"]["email"]["sent"], 1);
    assert_eq!(body["circuit_breakers"]["email"]["state"], "closed");
    assert!(body["performance"].is_object());

    service.shutdown().await;
}

#[tokio::test]
async fn failing_channel_opens_its_breaker() {
    let mut config = test_config();
    config.breaker.failure_threshold = 2;
    let adapters: Vec<Arc<dyn ChannelAdapter>> = vec![
        Arc::new(DownEmailAdapter),
        Arc::new(SmsAdapter::new()),
        Arc::new(WhatsAppAdapter::new()),
    ];
    let service = NotificationService::with_adapters(config, adapters).unwrap();
    service.start();
    let router = create_router(service.clone());

    // Every attempt fails transiently; the retry budget drains and the
    // breaker trips along the way.
    let response = router
        .clone()
        .oneshot(post(
            "/notifications/email",
            json!({"to": "user@example.com", "subject": "Hi", "html": "hello"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);

    // Give the retry loop a moment to burn through the budget.
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        let stats = router
            .clone()
            .oneshot(get("/notifications/stats"))
            .await
            .unwrap();
        let body = body_json(stats).await;
        if body["circuit_breakers"]["email"]["state"] == "open" {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "breaker never opened: {}",
            body
        );
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    // Healthy channels keep flowing while email is blocked.
    let sms = router
        .clone()
        .oneshot(post(
            "/notifications/sms",
            json!({"to": "+15551234567", "message": "still works"}),
        ))
        .await
        .unwrap();
    assert_eq!(sms.status(), StatusCode::OK);
    let body = body_json(sms).await;
    assert_eq!(body["success"], true);

    service.shutdown().await;
}
