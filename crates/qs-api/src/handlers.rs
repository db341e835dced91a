//! HTTP API handlers
//!
//! Item views, reprocess requests, document download, monitor control and
//! the mailbox OAuth flow.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use qs_core::{AggregateCounts, Item};
use qs_schedule::MonitorStatus;

use crate::error::{ApiError, Result};
use crate::server::AppState;

// ============================================================================
// Request/Response types
// ============================================================================

/// Health check payload
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub success: bool,
    pub message: &'static str,
    pub timestamp: DateTime<Utc>,
}

/// Query string of the item listing
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    pub order: Option<String>,
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub items: Vec<Item>,
    pub count: usize,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub counts: AggregateCounts,
}

#[derive(Debug, Serialize)]
pub struct MonitorStatusResponse {
    #[serde(flatten)]
    pub status: MonitorStatus,
    pub authenticated: bool,
    pub queue_depth: u64,
}

#[derive(Debug, Serialize)]
pub struct MonitorActionResponse {
    pub success: bool,
    pub running: bool,
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ReprocessResponse {
    pub success: bool,
    pub external_id: String,
    pub queue_depth: u64,
}

#[derive(Debug, Serialize)]
pub struct AuthStatusResponse {
    pub authenticated: bool,
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct AuthLoginResponse {
    pub success: bool,
    pub authorization_url: String,
}

#[derive(Debug, Serialize)]
pub struct AuthLogoutResponse {
    pub success: bool,
    pub message: &'static str,
}

/// Parameters the OAuth provider appends to the redirect
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

// ============================================================================
// Handler functions
// ============================================================================

/// Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        success: true,
        message: "QuoteSnap API is running",
        timestamp: Utc::now(),
    })
}

/// List items, newest first unless `order=asc`
pub async fn list_emails(
    State(state): State<AppState>,
    Query(params): Query<ListQuery>,
) -> Result<Json<ListResponse>> {
    if params.limit == 0 {
        return Err(ApiError::InvalidRequest("limit must be positive".into()));
    }
    let newest_first = match params.order.as_deref() {
        None | Some("desc") => true,
        Some("asc") => false,
        Some(other) => {
            return Err(ApiError::InvalidRequest(format!(
                "order must be 'asc' or 'desc', got '{other}'"
            )));
        }
    };

    let items = state
        .query
        .list_items(params.limit, params.offset, newest_first)?;
    Ok(Json(ListResponse {
        count: items.len(),
        items,
        limit: params.limit.min(qs_core::query::MAX_PAGE_SIZE),
        offset: params.offset,
    }))
}

pub async fn get_email(
    State(state): State<AppState>,
    Path(external_id): Path<String>,
) -> Result<Json<Item>> {
    Ok(Json(state.query.get_item(&external_id)?))
}

pub async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>> {
    let counts = state.query.aggregate_counts()?;
    Ok(Json(StatsResponse { counts }))
}

/// Queue an item for reclassification on the next cycle
pub async fn reprocess_email(
    State(state): State<AppState>,
    Path(external_id): Path<String>,
) -> Result<(StatusCode, Json<ReprocessResponse>)> {
    let queue_depth = state.queue.enqueue(&external_id)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ReprocessResponse {
            success: true,
            external_id,
            queue_depth,
        }),
    ))
}

/// Download the quotation document of a `VALID` item
pub async fn generate_quotation(
    State(state): State<AppState>,
    Path(external_id): Path<String>,
) -> Result<Response> {
    let document = state.query.render_document(&external_id)?;
    debug!(external_id, filename = %document.filename, "Rendered quotation");

    let headers = [
        (header::CONTENT_TYPE, document.content_type.to_string()),
        (
            header::CONTENT_DISPOSITION,
            content_disposition(&document.filename),
        ),
        (header::CACHE_CONTROL, "no-store".to_string()),
    ];
    Ok((headers, document.bytes).into_response())
}

/// `attachment` disposition with an ASCII `filename` for old clients and the
/// exact name as RFC 5987 `filename*`
fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c == ' ' || c.is_ascii_graphic() => c,
            _ => '_',
        })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(filename)
    )
}

pub async fn monitor_status(State(state): State<AppState>) -> Result<Json<MonitorStatusResponse>> {
    let status = state.scheduler.status()?;
    let authenticated = state.scheduler.mailbox().is_authenticated().await;
    let queue_depth = state.queue.count()?;
    Ok(Json(MonitorStatusResponse {
        status,
        authenticated,
        queue_depth,
    }))
}

/// Start monitoring; 409 while the mailbox is not authenticated
pub async fn monitor_start(State(state): State<AppState>) -> Result<Json<MonitorActionResponse>> {
    let started = state.scheduler.start().await?;
    Ok(Json(MonitorActionResponse {
        success: true,
        running: true,
        message: if started {
            "Email monitoring started"
        } else {
            "Email monitoring already running"
        },
    }))
}

pub async fn monitor_stop(State(state): State<AppState>) -> Json<MonitorActionResponse> {
    let stopped = state.scheduler.stop().await;
    Json(MonitorActionResponse {
        success: true,
        running: false,
        message: if stopped {
            "Email monitoring stopped"
        } else {
            "Email monitoring was not running"
        },
    })
}

pub async fn auth_status(State(state): State<AppState>) -> Json<AuthStatusResponse> {
    let authenticated = state.scheduler.mailbox().is_authenticated().await;
    Json(AuthStatusResponse {
        authenticated,
        message: if authenticated {
            "Authenticated with Gmail"
        } else {
            "Not authenticated with Gmail"
        },
    })
}

/// Issue an authorization URL bound to a fresh CSRF `state`
pub async fn auth_login(State(state): State<AppState>) -> Result<Json<AuthLoginResponse>> {
    let csrf = uuid::Uuid::new_v4().to_string();
    let authorization_url = state.scheduler.mailbox().authorization_url(&csrf)?;
    state.oauth_states.issue(csrf).await;

    Ok(Json(AuthLoginResponse {
        success: true,
        authorization_url,
    }))
}

/// OAuth redirect target: exchange the code, start monitoring, send the
/// browser back to the frontend
pub async fn auth_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackQuery>,
) -> Result<Response> {
    let frontend = state.api.frontend_url.trim_end_matches('/');

    if let Some(error) = params.error {
        warn!("OAuth provider returned an error: {}", error);
        return Ok(Redirect::to(&format!("{frontend}/?error=oauth_failed")).into_response());
    }

    let Some(code) = params.code else {
        return Err(ApiError::InvalidRequest(
            "authorization code not provided".into(),
        ));
    };

    let state_known = match &params.state {
        Some(csrf) => state.oauth_states.consume(csrf).await,
        None => false,
    };
    if !state_known {
        warn!("OAuth callback with unknown or expired state parameter");
        return Ok(Redirect::to(&format!("{frontend}/?error=invalid_state")).into_response());
    }

    match state.scheduler.complete_login(&code).await {
        Ok(()) => {
            info!("Mailbox authenticated; monitoring started");
            Ok(Redirect::to(&format!("{frontend}/dashboard")).into_response())
        }
        Err(e) => {
            warn!("OAuth code exchange failed: {}", e);
            Ok(Redirect::to(&format!("{frontend}/?error=auth_failed")).into_response())
        }
    }
}

/// Stop monitoring and forget the stored token
pub async fn auth_logout(State(state): State<AppState>) -> Result<Json<AuthLogoutResponse>> {
    state.scheduler.logout().await?;
    Ok(Json(AuthLogoutResponse {
        success: true,
        message: "Logged out",
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use chrono::TimeZone;
    use serde_json::Value;
    use tower::ServiceExt;

    use qs_core::{
        ApiConfig, CsvQuotationRenderer, Database, Disposition, ExtractedFields, ItemStore,
        QueryService, RawContent, ReprocessQueue, RequirementLine,
    };
    use qs_email::{EmailError, MailboxClient, MailboxMessage};
    use qs_schedule::{CycleReport, CycleRunner, MonitoringScheduler};

    use crate::server::router;

    #[derive(Default)]
    struct StubMailbox {
        authenticated: AtomicBool,
    }

    #[async_trait]
    impl MailboxClient for StubMailbox {
        fn authorization_url(&self, state: &str) -> qs_email::Result<String> {
            Ok(format!("https://accounts.example.com/auth?state={state}"))
        }

        async fn authenticate(&self, code: &str) -> qs_email::Result<()> {
            if code == "bad" {
                return Err(EmailError::AuthFailed("invalid_grant".into()));
            }
            self.authenticated.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn is_authenticated(&self) -> bool {
            self.authenticated.load(Ordering::SeqCst)
        }

        async fn logout(&self) -> qs_email::Result<()> {
            self.authenticated.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn list_new_messages(
            &self,
            _since: Option<DateTime<Utc>>,
            _limit: usize,
            _known: &(dyn for<'k> Fn(&'k str) -> bool + Sync),
        ) -> qs_email::Result<Vec<MailboxMessage>> {
            Ok(Vec::new())
        }
    }

    struct IdleRunner;

    #[async_trait]
    impl CycleRunner for IdleRunner {
        async fn run_cycle(&self) -> CycleReport {
            CycleReport::default()
        }
    }

    struct Harness {
        store: ItemStore,
        state: AppState,
    }

    fn harness(api: ApiConfig) -> Harness {
        let db = Database::in_memory().unwrap();
        let store = ItemStore::new(db.clone());
        let queue = ReprocessQueue::new(db);
        let scheduler = Arc::new(MonitoringScheduler::new(
            Arc::new(IdleRunner),
            Arc::new(StubMailbox::default()),
            store.clone(),
            Duration::from_secs(30),
        ));
        let query = QueryService::new(store.clone(), Arc::new(CsvQuotationRenderer));
        Harness {
            store,
            state: AppState::new(query, queue, scheduler, api),
        }
    }

    fn seed(store: &ItemStore, id: &str, minute: u32, verdict: Option<Disposition>) {
        let raw = RawContent::new(format!("RFQ {id}"), "buyer@example.com", "Need laptops");
        let received = Utc.with_ymd_and_hms(2025, 3, 4, 10, minute, 0).unwrap();
        store.upsert_if_absent(id, &raw, received).unwrap();

        if let Some(disposition) = verdict {
            let fields = ExtractedFields {
                client_name: "Ama".into(),
                email: "ama@example.com".into(),
                mobile: "0244".into(),
                deadline: None,
                requirements: vec![RequirementLine {
                    brand_and_model: "Dell Latitude".into(),
                    quantity: "2".into(),
                    ..Default::default()
                }],
            };
            let fields = (disposition == Disposition::Valid).then_some(&fields);
            store
                .mark_classified(id, disposition, fields, Utc::now(), None)
                .unwrap();
        }
    }

    async fn send(state: &AppState, method: &str, uri: &str, key: Option<&str>) -> Response {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(key) = key {
            request = request.header(header::AUTHORIZATION, format!("Bearer {key}"));
        }
        router(state.clone())
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness(ApiConfig::default());
        let response = send(&h.state, "GET", "/api/health", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["success"], true);
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_list_and_get_items() {
        let h = harness(ApiConfig::default());
        seed(&h.store, "g-1", 1, None);
        seed(&h.store, "g-2", 2, Some(Disposition::Irrelevant));

        let body = json(send(&h.state, "GET", "/api/emails", None).await).await;
        assert_eq!(body["count"], 2);
        assert_eq!(body["items"][0]["external_id"], "g-2");

        let body = json(send(&h.state, "GET", "/api/emails?order=asc&limit=1", None).await).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["items"][0]["external_id"], "g-1");

        let body = json(send(&h.state, "GET", "/api/emails/g-2", None).await).await;
        assert_eq!(body["disposition"], "IRRELEVANT");

        let response = send(&h.state, "GET", "/api/emails/missing", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json(response).await["kind"], "not_found");
    }

    #[tokio::test]
    async fn test_list_rejects_bad_parameters() {
        let h = harness(ApiConfig::default());
        let response = send(&h.state, "GET", "/api/emails?order=sideways", None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let response = send(&h.state, "GET", "/api/emails?limit=0", None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stats() {
        let h = harness(ApiConfig::default());
        seed(&h.store, "g-1", 1, None);
        seed(&h.store, "g-2", 2, Some(Disposition::Valid));
        seed(&h.store, "g-3", 3, Some(Disposition::NotValid));

        let body = json(send(&h.state, "GET", "/api/emails/stats", None).await).await;
        assert_eq!(body["total"], 3);
        assert_eq!(body["valid"], 1);
        assert_eq!(body["not_valid"], 1);
        assert_eq!(body["pending"], 1);
        assert_eq!(body["irrelevant"], 0);
    }

    #[tokio::test]
    async fn test_generate_quotation() {
        let h = harness(ApiConfig::default());
        seed(&h.store, "g-valid", 1, Some(Disposition::Valid));
        seed(&h.store, "g-pending", 2, None);

        let response = send(&h.state, "GET", "/api/quotation/generate/g-valid", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap();
        assert!(disposition.starts_with("attachment; filename=\"Quotation_RFQ g-valid_"));
        assert!(disposition.contains("; filename*=UTF-8''Quotation_RFQ%20g-valid_"));
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("Dell Latitude"));

        let response = send(&h.state, "GET", "/api/quotation/generate/g-pending", None).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = json(response).await;
        assert_eq!(body["kind"], "invalid_state");
        assert_eq!(body["retryable"], false);

        let response = send(&h.state, "GET", "/api/quotation/generate/nope", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_reprocess_enqueues() {
        let h = harness(ApiConfig::default());
        seed(&h.store, "g-1", 1, Some(Disposition::Irrelevant));

        let response = send(&h.state, "POST", "/api/emails/g-1/reprocess", None).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(json(response).await["queue_depth"], 1);

        let response = send(&h.state, "POST", "/api/emails/g-1/reprocess", None).await;
        assert_eq!(json(response).await["queue_depth"], 1);

        let response = send(&h.state, "POST", "/api/emails/unknown/reprocess", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        // the item itself is untouched until the next cycle
        let item = h.store.get("g-1").unwrap().unwrap();
        assert_eq!(item.disposition, Disposition::Irrelevant);
    }

    #[tokio::test]
    async fn test_mutating_routes_require_api_key() {
        let h = harness(ApiConfig {
            key: Some("secret".into()),
            ..Default::default()
        });
        seed(&h.store, "g-1", 1, None);

        let response = send(&h.state, "POST", "/api/emails/g-1/reprocess", None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let response = send(&h.state, "POST", "/api/emails/g-1/reprocess", Some("wrong")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let response = send(&h.state, "POST", "/api/emails/g-1/reprocess", Some("secret")).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        // reads stay public
        let response = send(&h.state, "GET", "/api/emails", None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_monitor_start_requires_mailbox_auth() {
        let h = harness(ApiConfig::default());

        let response = send(&h.state, "POST", "/api/monitor/start", None).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(json(response).await["kind"], "invalid_state");

        let body = json(send(&h.state, "GET", "/api/monitor/status", None).await).await;
        assert_eq!(body["running"], false);
        assert_eq!(body["authenticated"], false);
        assert_eq!(body["queue_depth"], 0);
        assert_eq!(body["items_processed_today"], 0);
    }

    #[tokio::test]
    async fn test_oauth_flow_starts_and_logout_stops_monitoring() {
        let h = harness(ApiConfig::default());

        let body = json(send(&h.state, "GET", "/api/auth/login", None).await).await;
        let url = body["authorization_url"].as_str().unwrap().to_string();
        let csrf = url.split("state=").nth(1).unwrap().to_string();

        let response = send(
            &h.state,
            "GET",
            &format!("/api/auth/callback?code=good&state={csrf}"),
            None,
        )
        .await;
        assert!(response.status().is_redirection());
        assert_eq!(response.headers()[header::LOCATION], "http://localhost:3000/dashboard");
        assert!(h.state.scheduler.is_running());

        let body = json(send(&h.state, "GET", "/api/auth/status", None).await).await;
        assert_eq!(body["authenticated"], true);

        // each state value is single-use
        let response = send(
            &h.state,
            "GET",
            &format!("/api/auth/callback?code=good&state={csrf}"),
            None,
        )
        .await;
        assert_eq!(
            response.headers()[header::LOCATION],
            "http://localhost:3000/?error=invalid_state"
        );

        let response = send(&h.state, "POST", "/api/auth/logout", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!h.state.scheduler.is_running());
        let body = json(send(&h.state, "GET", "/api/auth/status", None).await).await;
        assert_eq!(body["authenticated"], false);
    }

    #[tokio::test]
    async fn test_non_ascii_subject_yields_ascii_safe_header() {
        let h = harness(ApiConfig::default());
        let raw = RawContent::new("Devis café für Ümit", "buyer@example.com", "Need laptops");
        h.store.upsert_if_absent("g-intl", &raw, Utc::now()).unwrap();
        let fields = ExtractedFields {
            client_name: "Ümit".into(),
            ..Default::default()
        };
        h.store
            .mark_classified("g-intl", Disposition::Valid, Some(&fields), Utc::now(), None)
            .unwrap();

        let response = send(&h.state, "GET", "/api/quotation/generate/g-intl", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let value = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap();
        assert!(value.is_ascii());
        assert!(value.starts_with("attachment; filename=\"Quotation_Devis caf_ f_r _mit_"));
        assert!(value.contains("filename*=UTF-8''Quotation_Devis%20caf%C3%A9%20f%C3%BCr%20%C3%9Cmit_"));
    }

    #[test]
    fn test_content_disposition_escapes_quotes() {
        let value = content_disposition("a\"b\\c.csv");
        assert!(value.starts_with("attachment; filename=\"a_b_c.csv\";"));
        assert!(value.ends_with("filename*=UTF-8''a%22b%5Cc.csv"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_oauth_state_is_rejected() {
        let h = harness(ApiConfig::default());
        let body = json(send(&h.state, "GET", "/api/auth/login", None).await).await;
        let url = body["authorization_url"].as_str().unwrap().to_string();
        let csrf = url.split("state=").nth(1).unwrap().to_string();

        tokio::time::advance(crate::oauth::STATE_TTL + Duration::from_secs(1)).await;

        let response = send(
            &h.state,
            "GET",
            &format!("/api/auth/callback?code=good&state={csrf}"),
            None,
        )
        .await;
        assert_eq!(
            response.headers()[header::LOCATION],
            "http://localhost:3000/?error=invalid_state"
        );
        assert!(!h.state.scheduler.is_running());
        assert_eq!(h.state.oauth_states.outstanding().await, 0);
    }

    #[tokio::test]
    async fn test_oauth_callback_failures() {
        let h = harness(ApiConfig::default());

        let response = send(&h.state, "GET", "/api/auth/callback?state=x", None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(&h.state, "GET", "/api/auth/callback?error=access_denied", None).await;
        assert_eq!(
            response.headers()[header::LOCATION],
            "http://localhost:3000/?error=oauth_failed"
        );

        let body = json(send(&h.state, "GET", "/api/auth/login", None).await).await;
        let url = body["authorization_url"].as_str().unwrap().to_string();
        let csrf = url.split("state=").nth(1).unwrap().to_string();
        let response = send(
            &h.state,
            "GET",
            &format!("/api/auth/callback?code=bad&state={csrf}"),
            None,
        )
        .await;
        assert_eq!(
            response.headers()[header::LOCATION],
            "http://localhost:3000/?error=auth_failed"
        );
        assert!(!h.state.scheduler.is_running());
    }
}
