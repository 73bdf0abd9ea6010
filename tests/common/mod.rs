#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    response::Response,
    Router,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use tower_http::cors::CorsLayer;
use tribute_api::{
    auth::{AuthService, ADMIN_ROLE},
    cache::InMemoryCache,
    config::AppConfig,
    db,
    errors::ServiceError,
    events::{self, EventHandler, EventSender},
    gateway::{
        CheckoutRequest, CheckoutSession, CheckoutState, PaymentGateway, PaymentStatus,
        SessionStatus,
    },
    handlers::AppServices,
    notifications::{DbNotificationSink, NotificationDispatcher},
    webhooks::SignatureGenerator,
    AppState,
};
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Payment provider stand-in. Sessions are created unpaid and flipped by the
/// test with [`ScriptedGateway::mark_paid`].
#[derive(Default)]
pub struct ScriptedGateway {
    sessions: Mutex<HashMap<String, SessionStatus>>,
    requests: Mutex<Vec<CheckoutRequest>>,
    next_id: AtomicUsize,
    unavailable: AtomicBool,
}

impl ScriptedGateway {
    pub fn mark_paid(&self, session_id: &str) {
        if let Some(session) = self.sessions.lock().unwrap().get_mut(session_id) {
            session.payment_status = PaymentStatus::Paid;
            session.status = CheckoutState::Complete;
        }
    }

    pub fn requests(&self) -> Vec<CheckoutRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_session_id(&self) -> String {
        format!("cs_it_{}", self.next_id.load(Ordering::SeqCst))
    }

    /// Makes session lookups fail as if the provider were down.
    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, ServiceError> {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("cs_it_{}", n);
        let session = SessionStatus {
            id: id.clone(),
            payment_status: PaymentStatus::Unpaid,
            status: CheckoutState::Open,
            metadata: request.metadata.clone().into_iter().collect(),
            amount_total: Some(request.line_items.iter().map(|item| item.total()).sum()),
        };
        self.sessions.lock().unwrap().insert(id.clone(), session);
        self.requests.lock().unwrap().push(request);
        Ok(CheckoutSession {
            url: format!("https://checkout.example/pay/{}", id),
            id,
        })
    }

    async fn retrieve_session(&self, session_id: &str) -> Result<SessionStatus, ServiceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ServiceError::GatewayTimeout);
        }
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| ServiceError::InvalidInput(format!("unknown session {}", session_id)))
    }

    async fn expire_session(&self, session_id: &str) -> Result<(), ServiceError> {
        match self.sessions.lock().unwrap().get_mut(session_id) {
            Some(session) if session.status == CheckoutState::Open => {
                session.status = CheckoutState::Expired;
                Ok(())
            }
            _ => Err(ServiceError::GatewayError(format!(
                "session {} cannot be expired",
                session_id
            ))),
        }
    }
}

/// Full application over a throwaway SQLite file.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<ScriptedGateway>,
    _db_dir: TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let db_dir = tempfile::tempdir().expect("temp dir");
        let db_file = db_dir.path().join("tribute_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_file.display()),
            "test_secret_key_for_testing_purposes_only_32chars".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.auto_migrate = true;
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.payment_webhook_secret = Some(WEBHOOK_SECRET.to_string());
        cfg.public_base_url = "https://tribute.example".to_string();

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let sink = Arc::new(DbNotificationSink::new(db_arc.clone()));
        let handlers: Vec<Arc<dyn EventHandler>> =
            vec![Arc::new(NotificationDispatcher::new(sink))];
        let event_task = tokio::spawn(events::process_events(event_rx, handlers));

        let gateway = Arc::new(ScriptedGateway::default());
        let services = AppServices::new(
            db_arc.clone(),
            &cfg,
            event_sender.clone(),
            gateway.clone(),
            Arc::new(InMemoryCache::new()),
        );
        services
            .prices
            .seed_defaults()
            .await
            .expect("failed to seed prices");

        let state = AppState {
            db: db_arc,
            auth: Arc::new(AuthService::new((&cfg).into())),
            config: cfg,
            event_sender,
            services,
        };
        let router = tribute_api::build_router(state.clone(), CorsLayer::permissive());

        Self {
            router,
            state,
            gateway,
            _db_dir: db_dir,
            _event_task: event_task,
        }
    }

    pub fn token_for(&self, user_id: Uuid) -> String {
        self.state
            .auth
            .issue_token(user_id, &[], chrono::Duration::hours(1))
            .expect("token")
    }

    pub fn admin_token(&self) -> String {
        self.state
            .auth
            .issue_token(Uuid::new_v4(), &[ADMIN_ROLE], chrono::Duration::hours(1))
            .expect("token")
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");
        self.send(request).await
    }

    pub async fn request_as(
        &self,
        user_id: Uuid,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> Response {
        let token = self.token_for(user_id);
        self.request(method, uri, body, Some(&token)).await
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error")
    }

    /// Posts a webhook body signed with the configured secret.
    pub async fn post_webhook(&self, body: &Value) -> Response {
        let raw = body.to_string();
        let ts = chrono::Utc::now().timestamp().to_string();
        let sig = SignatureGenerator::new(WEBHOOK_SECRET)
            .sign_payload(&ts, raw.as_bytes())
            .expect("signature");
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/payments/webhook")
            .header("content-type", "application/json")
            .header("x-timestamp", ts)
            .header("x-signature", sig)
            .body(Body::from(raw))
            .expect("request");
        self.send(request).await
    }

    /// Creates and publishes a memorial, returning `(id, slug)`.
    pub async fn published_memorial(&self, owner: Uuid, name: &str) -> (Uuid, String) {
        let created = self
            .request_as(
                owner,
                Method::POST,
                "/api/v1/memorials",
                Some(json!({ "name": name })),
            )
            .await;
        assert_eq!(created.status(), StatusCode::CREATED);
        let body = response_json(created).await;
        let id = uuid_at(&body, "/data/id");
        let slug = body["data"]["default_slug"]
            .as_str()
            .expect("slug")
            .to_string();

        let published = self
            .request_as(
                owner,
                Method::POST,
                &format!("/api/v1/memorials/{}/publish", id),
                None,
            )
            .await;
        assert_eq!(published.status(), StatusCode::OK);
        (id, slug)
    }

    /// Creates a draft contribution and returns its id.
    pub async fn draft(&self, owner: Uuid, slug: &str, payload: Value) -> Uuid {
        let response = self
            .request_as(
                owner,
                Method::POST,
                &format!("/api/v1/memorials/{}/contributions", slug),
                Some(payload),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        uuid_at(&response_json(response).await, "/data/id")
    }

    /// Polls `user`'s inbox until it holds at least `count` notifications.
    pub async fn wait_for_notifications(&self, user: Uuid, count: usize) -> Vec<Value> {
        for _ in 0..50 {
            let response = self
                .request_as(user, Method::GET, "/api/v1/notifications", None)
                .await;
            let body = response_json(response).await;
            let items = body["data"].as_array().cloned().unwrap_or_default();
            if items.len() >= count {
                return items;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("expected {} notifications for {}", count, user);
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).unwrap_or_else(|_| {
        Value::String(String::from_utf8_lossy(&bytes).into_owned())
    })
}

pub fn uuid_at(body: &Value, pointer: &str) -> Uuid {
    body.pointer(pointer)
        .and_then(Value::as_str)
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .unwrap_or_else(|| panic!("no uuid at {} in {}", pointer, body))
}
