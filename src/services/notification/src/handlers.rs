//! HTTP handlers for the notification API
//!
//! Thin translation layer: extract the caller identity, map the DTO into the
//! engine's accept-path input, and let `EngineError`'s `IntoResponse` shape
//! every failure. Submission endpoints are rate limited per caller; read
//! side and operational endpoints are not.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use courier_shared::{ChannelKind, NotificationStatus};
use serde::Deserialize;
use std::sync::Arc;

use crate::dispatch::{AcceptRequest, CallerContext, NotificationService};

/// Shared axum state
pub type ServiceState = State<Arc<NotificationService>>;

/// Caller identity for rate limiting: first `x-forwarded-for` hop, else a
/// shared default bucket.
pub fn caller_identity(headers: &HeaderMap) -> CallerContext {
    let identity = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "anonymous".to_string());
    CallerContext::new(identity)
}

/// Channel-specific submission endpoints
pub mod send_handlers {
    use super::*;
    use courier_shared::{
        DispatchAction, DispatchRequest, EmailRequest, SendRequest, SendResponse, SmsRequest,
        WhatsAppRequest,
    };
    use serde_json::{json, Value};

    use crate::error::{EngineError, Result};

    /// POST /notifications/email
    pub async fn send_email(
        State(service): ServiceState,
        headers: HeaderMap,
        Json(request): Json<EmailRequest>,
    ) -> Result<Json<SendResponse>> {
        service.check_rate(&caller_identity(&headers))?;
        let response = service
            .send_and_wait(AcceptRequest {
                channel: ChannelKind::Email,
                to: request.to,
                subject: Some(request.subject),
                content: request.html,
                template_id: None,
                payload: None,
                priority: request.priority,
                scheduled_for: request.scheduled_for,
            })
            .await?;
        Ok(Json(response))
    }

    /// POST /notifications/sms
    pub async fn send_sms(
        State(service): ServiceState,
        headers: HeaderMap,
        Json(request): Json<SmsRequest>,
    ) -> Result<Json<SendResponse>> {
        service.check_rate(&caller_identity(&headers))?;
        let response = service
            .send_and_wait(AcceptRequest {
                channel: ChannelKind::Sms,
                to: request.to,
                subject: None,
                content: request.message,
                template_id: None,
                payload: None,
                priority: request.priority,
                scheduled_for: request.scheduled_for,
            })
            .await?;
        Ok(Json(response))
    }

    /// POST /notifications/whatsapp
    pub async fn send_whatsapp(
        State(service): ServiceState,
        headers: HeaderMap,
        Json(request): Json<WhatsAppRequest>,
    ) -> Result<Json<SendResponse>> {
        service.check_rate(&caller_identity(&headers))?;
        // Template messages carry their body in the payload; the template id
        // stands in as content for sanitization purposes.
        let content = request
            .payload
            .as_ref()
            .and_then(|p| p.get("body"))
            .and_then(|b| b.as_str())
            .unwrap_or(request.template_id.as_str())
            .to_string();
        let response = service
            .send_and_wait(AcceptRequest {
                channel: ChannelKind::Whatsapp,
                to: request.to,
                subject: None,
                content,
                template_id: Some(request.template_id),
                payload: request.payload,
                priority: request.priority,
                scheduled_for: request.scheduled_for,
            })
            .await?;
        Ok(Json(response))
    }

    fn accept_request(request: SendRequest) -> AcceptRequest {
        AcceptRequest {
            channel: request.channel,
            to: request.to,
            subject: request.subject,
            content: request.content,
            template_id: request.template_id,
            payload: request.payload,
            priority: request.priority,
            scheduled_for: request.scheduled_for,
        }
    }

    /// POST /notifications: generic send or batch
    pub async fn dispatch(
        State(service): ServiceState,
        headers: HeaderMap,
        Json(request): Json<DispatchRequest>,
    ) -> Result<Json<Value>> {
        service.check_rate(&caller_identity(&headers))?;
        match request.action {
            DispatchAction::Send => {
                let send = request.notification.ok_or_else(|| {
                    EngineError::validation("notification", "send requires a notification")
                })?;
                let response = service.send_and_wait(accept_request(send)).await?;
                Ok(Json(serde_json::to_value(response).map_err(|e| {
                    EngineError::internal(format!("response serialization failed: {}", e))
                })?))
            }
            DispatchAction::Batch => {
                let sends = request.notifications.ok_or_else(|| {
                    EngineError::validation("notifications", "batch requires notifications")
                })?;
                let results = service
                    .send_batch(sends.into_iter().map(accept_request).collect())
                    .await?;
                Ok(Json(json!({ "results": results })))
            }
        }
    }
}

/// Lifecycle endpoints: list, lookup, retry, cancel
pub mod lifecycle_handlers {
    use super::*;
    use courier_shared::{
        CancelRequest, CancelResponse, ExternalLookupResponse, ListResponse, Pagination,
        RetryRequest, RetryTicket,
    };

    use crate::error::{EngineError, Result};

    #[derive(Debug, Deserialize)]
    pub struct ListQuery {
        pub page: Option<u32>,
        pub limit: Option<u32>,
        pub status: Option<NotificationStatus>,
    }

    /// GET /notifications
    pub async fn list(
        State(service): ServiceState,
        Query(query): Query<ListQuery>,
    ) -> Json<ListResponse> {
        let page = query.page.unwrap_or(1).max(1);
        let limit = query.limit.unwrap_or(20).clamp(1, 100);
        let (notifications, total) = service.list(query.status, page, limit);
        Json(ListResponse {
            notifications,
            pagination: Pagination { page, limit, total },
        })
    }

    /// GET /notifications/external/:external_id
    pub async fn find_by_external_id(
        State(service): ServiceState,
        Path(external_id): Path<String>,
    ) -> Result<Json<ExternalLookupResponse>> {
        let notification = service
            .find_by_external_id(&external_id)
            .ok_or_else(|| EngineError::not_found(format!("external id {}", external_id)))?;
        Ok(Json(ExternalLookupResponse {
            id: notification.id,
            external_id,
            channel: notification.channel,
            status: notification.status,
        }))
    }

    /// POST /notifications/retry
    pub async fn retry(
        State(service): ServiceState,
        Json(request): Json<RetryRequest>,
    ) -> Result<Json<RetryTicket>> {
        let ticket = service.schedule_retry(request.id, &request.reason)?;
        Ok(Json(ticket))
    }

    /// POST /notifications/cancel
    pub async fn cancel(
        State(service): ServiceState,
        Json(request): Json<CancelRequest>,
    ) -> Result<Json<CancelResponse>> {
        let cancelled = service.cancel(request.id, request.reason.as_deref())?;
        Ok(Json(CancelResponse {
            id: cancelled.id,
            status: cancelled.status,
        }))
    }
}

/// Operational endpoints: health, stats, Prometheus metrics
pub mod ops_handlers {
    use super::*;
    use serde_json::Value;

    use crate::error::Result;

    #[derive(Debug, Deserialize)]
    pub struct StatsQuery {
        pub detailed: Option<bool>,
    }

    /// GET /notifications/health
    pub async fn health(State(service): ServiceState) -> Json<Value> {
        Json(service.health().await)
    }

    /// GET /notifications/stats
    pub async fn stats(
        State(service): ServiceState,
        Query(query): Query<StatsQuery>,
    ) -> Json<Value> {
        Json(service.stats(query.detailed.unwrap_or(false)))
    }

    /// GET /metrics
    pub async fn metrics(State(service): ServiceState) -> Result<String> {
        service.export_metrics()
    }
}
