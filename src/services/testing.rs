//! Fixtures shared by the service tests.

use async_trait::async_trait;
use sea_orm::DatabaseConnection;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::cache::InMemoryCache;
use crate::entities::contribution::ContributionKind;
use crate::entities::memorial;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::gateway::{
    CheckoutRequest, CheckoutSession, CheckoutState, PaymentGateway, PaymentStatus, SessionStatus,
};
use crate::models::{ContributionView, CreateContributionRequest, PayableOption};

use super::feed::FeedService;
use super::flags::FlagService;
use super::lifecycle::{ContributionService, LifecycleSettings};
use super::likes::LikeService;
use super::memorials::{CreateMemorialRequest, MemorialService};
use super::price_catalog::PriceCatalog;

/// In-process gateway. Sessions start open and unpaid; tests flip them with
/// [`FakeGateway::mark_paid`]. Like the real provider, a completed session
/// cannot be expired.
#[derive(Default)]
pub(crate) struct FakeGateway {
    sessions: Mutex<HashMap<String, SessionStatus>>,
    requests: Mutex<Vec<CheckoutRequest>>,
    next_id: AtomicUsize,
    fail_create: AtomicBool,
}

impl FakeGateway {
    pub fn mark_paid(&self, session_id: &str) {
        if let Some(session) = self.sessions.lock().unwrap().get_mut(session_id) {
            session.payment_status = PaymentStatus::Paid;
            session.status = CheckoutState::Complete;
        }
    }

    pub fn state_of(&self, session_id: &str) -> Option<CheckoutState> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .map(|session| session.status)
    }

    pub fn requests(&self) -> Vec<CheckoutRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_session_id(&self) -> Option<String> {
        let n = self.next_id.load(Ordering::SeqCst);
        (n > 0).then(|| format!("cs_test_{}", n))
    }

    pub fn fail_checkout(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, ServiceError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ServiceError::GatewayError("scripted failure".into()));
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("cs_test_{}", n);
        let status = SessionStatus {
            id: id.clone(),
            payment_status: PaymentStatus::Unpaid,
            status: CheckoutState::Open,
            metadata: request
                .metadata
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            amount_total: Some(request.line_items.iter().map(|item| item.total()).sum()),
        };
        self.sessions.lock().unwrap().insert(id.clone(), status);
        self.requests.lock().unwrap().push(request);
        Ok(CheckoutSession {
            url: format!("https://checkout.test/pay/{}", id),
            id,
        })
    }

    async fn retrieve_session(&self, session_id: &str) -> Result<SessionStatus, ServiceError> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| ServiceError::InvalidInput(format!("unknown session {}", session_id)))
    }

    async fn expire_session(&self, session_id: &str) -> Result<(), ServiceError> {
        let mut sessions = self.sessions.lock().unwrap();
        match sessions.get_mut(session_id) {
            Some(session) if session.status == CheckoutState::Open => {
                session.status = CheckoutState::Expired;
                Ok(())
            }
            Some(_) => Err(ServiceError::GatewayError(format!(
                "session {} is not open",
                session_id
            ))),
            None => Err(ServiceError::InvalidInput(format!(
                "unknown session {}",
                session_id
            ))),
        }
    }
}

pub(crate) fn settings() -> LifecycleSettings {
    LifecycleSettings {
        currency: "usd".into(),
        public_base_url: "https://tribute.test".into(),
        checkout_session_ttl: chrono::Duration::minutes(30),
        gateway_timeout: Duration::from_secs(5),
    }
}

/// All services over one fresh in-memory database.
pub(crate) struct Fixture {
    pub db: Arc<DatabaseConnection>,
    pub gateway: Arc<FakeGateway>,
    pub catalog: Arc<PriceCatalog>,
    pub memorials: MemorialService,
    pub contributions: ContributionService,
    pub likes: LikeService,
    pub feed: FeedService,
    pub flags: FlagService,
    events: mpsc::Receiver<Event>,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_settings(settings()).await
    }

    pub async fn with_settings(settings: LifecycleSettings) -> Self {
        let db = Arc::new(crate::db::test_pool().await);
        let (tx, events) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(tx));
        let gateway = Arc::new(FakeGateway::default());
        let catalog = Arc::new(PriceCatalog::new(
            db.clone(),
            Arc::new(InMemoryCache::new()),
            Duration::from_secs(60),
        ));
        catalog.seed_defaults().await.unwrap();

        Self {
            memorials: MemorialService::new(db.clone()),
            contributions: ContributionService::new(
                db.clone(),
                event_sender.clone(),
                catalog.clone(),
                gateway.clone(),
                settings,
            ),
            likes: LikeService::new(db.clone()),
            feed: FeedService::new(db.clone(), 20, 100),
            flags: FlagService::new(db.clone(), event_sender),
            db,
            gateway,
            catalog,
            events,
        }
    }

    /// A published memorial owned by `owner`.
    pub async fn memorial(&self, owner: Uuid) -> memorial::Model {
        let created = self
            .memorials
            .create(
                owner,
                CreateMemorialRequest {
                    name: "Ada Lovelace".into(),
                    slug: None,
                    premium_slug: None,
                },
            )
            .await
            .unwrap();
        self.memorials.publish(owner, created.id).await.unwrap()
    }

    pub async fn draft(
        &self,
        owner: Uuid,
        memorial: &memorial::Model,
        kind: ContributionKind,
        option: Option<PayableOption>,
    ) -> ContributionView {
        self.contributions
            .create(
                owner,
                &memorial.default_slug,
                CreateContributionRequest {
                    kind,
                    content: Some("Forever in our hearts".into()),
                    contribution_date: None,
                    asset_path: None,
                    asset_type: None,
                    payable_option: option,
                    donation_count: None,
                },
            )
            .await
            .unwrap()
    }

    /// A free memory published by `owner`.
    pub async fn published_memory(&self, owner: Uuid, memorial: &memorial::Model) -> ContributionView {
        let draft = self
            .draft(owner, memorial, ContributionKind::Memory, None)
            .await;
        self.contributions.publish(owner, draft.id).await.unwrap();
        self.contributions.get(draft.id, None).await.unwrap()
    }

    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}
