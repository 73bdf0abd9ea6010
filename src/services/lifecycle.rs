//! Contribution lifecycle: drafting, publishing through the free or paid
//! path, and payment reconciliation.

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{
    sea_query::{Expr, SimpleExpr},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbErr,
    EntityTrait, QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::config::AppConfig;
use crate::db::is_unique_violation;
use crate::entities::contribution::{self, ContributionKind, ContributionStatus};
use crate::entities::memorial::{self, MemorialStatus};
use crate::entities::memorial_flag;
use crate::entities::{contribution_like, memorial_transaction};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::gateway::{CheckoutRequest, CheckoutState, PaymentGateway};
use crate::models::{
    descriptor, ContributionPatch, ContributionView, CreateContributionRequest, KindDescriptor,
    PayableOption,
};
use crate::webhooks::PaymentEvent;

use super::basket::{build_basket, Basket};
use super::flags::{flag_raised_event, raise_request_flag};
use super::memorials::{find_by_slug, find_required};
use super::now_micros;
use super::price_catalog::PriceCatalog;

/// Knobs for checkout handling.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub currency: String,
    pub public_base_url: String,
    pub checkout_session_ttl: chrono::Duration,
    pub gateway_timeout: Duration,
}

impl From<&AppConfig> for LifecycleSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            currency: cfg.currency.clone(),
            public_base_url: cfg.public_base_url.clone(),
            checkout_session_ttl: cfg.checkout_session_ttl(),
            gateway_timeout: cfg.gateway_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum PublishOutcome {
    Published,
    NeedsPayment { payment_url: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReconcileResult {
    /// This call moved the contribution to published.
    Published,
    /// Someone else already did; nothing changed.
    AlreadyPublished,
    /// The gateway does not report the session as paid yet.
    Unpaid,
    /// Paid, but the session was replaced before it settled. The payment is
    /// recorded and queued for refund; the contribution is unchanged.
    Superseded,
}

impl ReconcileResult {
    pub fn is_success(self) -> bool {
        matches!(
            self,
            ReconcileResult::Published | ReconcileResult::AlreadyPublished
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseValidation {
    pub success: bool,
    pub redirect_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Reconciled(ReconcileResult),
    Ignored,
}

fn not_found(id: Uuid) -> ServiceError {
    ServiceError::NotFound(format!("Contribution {} not found", id))
}

async fn load<C: ConnectionTrait>(conn: &C, id: Uuid) -> Result<contribution::Model, ServiceError> {
    contribution::Entity::find_by_id(id)
        .one(conn)
        .await?
        .ok_or_else(|| not_found(id))
}

fn stored_option(model: &contribution::Model) -> Result<Option<PayableOption>, ServiceError> {
    model
        .payable_option
        .as_deref()
        .map(str::parse::<PayableOption>)
        .transpose()
}

/// Matches rows whose pending session is still the one we loaded.
fn same_session(model: &contribution::Model) -> SimpleExpr {
    match &model.checkout_session_id {
        Some(id) => contribution::Column::CheckoutSessionId.eq(id.clone()),
        None => contribution::Column::CheckoutSessionId.is_null(),
    }
}

/// Checks the payload rules of a contribution and returns its parsed option.
fn validate_payload(
    kind: &dyn KindDescriptor,
    model: &contribution::Model,
) -> Result<Option<PayableOption>, ServiceError> {
    if model.asset_path.is_some() != model.asset_type.is_some() {
        return Err(ServiceError::ValidationError(
            "asset_path and asset_type must be given together".to_string(),
        ));
    }
    if model.has_asset() && kind.kind() != ContributionKind::Memory {
        return Err(ServiceError::ValidationError(format!(
            "a {} cannot carry media",
            kind.kind()
        )));
    }
    if model.donation_count < 0 {
        return Err(ServiceError::ValidationError(
            "donation_count cannot be negative".to_string(),
        ));
    }
    if model.donation_count > 0 && !kind.allows_donation_trees() {
        return Err(ServiceError::InvalidInput(format!(
            "a {} cannot carry tree donations",
            kind.kind()
        )));
    }
    let option = stored_option(model)?;
    kind.validate_option(option.as_ref(), model.has_asset())?;
    Ok(option)
}

#[derive(Clone)]
pub struct ContributionService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    catalog: Arc<PriceCatalog>,
    gateway: Arc<dyn PaymentGateway>,
    settings: LifecycleSettings,
}

impl ContributionService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        catalog: Arc<PriceCatalog>,
        gateway: Arc<dyn PaymentGateway>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            db,
            event_sender,
            catalog,
            gateway,
            settings,
        }
    }

    /// Bounds a gateway call so a slow provider cannot stall the request.
    async fn call_gateway<T, F>(&self, call: F) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<T, ServiceError>>,
    {
        tokio::time::timeout(self.settings.gateway_timeout, call)
            .await
            .map_err(|_| ServiceError::GatewayTimeout)?
    }

    fn checkout_is_live(&self, model: &contribution::Model, now: DateTime<Utc>) -> bool {
        match (&model.checkout_session_id, model.checkout_session_created_at) {
            (Some(_), Some(created)) => now < created + self.settings.checkout_session_ttl,
            _ => false,
        }
    }

    /// Closes the stored checkout session before it is replaced or dropped,
    /// so an old payment link cannot settle a different basket. A session
    /// that was paid in the meantime is reconciled instead.
    async fn retire_stale_session(
        &self,
        current: &contribution::Model,
    ) -> Result<Option<ReconcileResult>, ServiceError> {
        let session_id = match current.checkout_session_id.as_deref() {
            Some(id) => id,
            None => return Ok(None),
        };
        let session = self
            .call_gateway(self.gateway.retrieve_session(session_id))
            .await?;
        if session.is_paid() {
            info!(contribution_id = %current.id, %session_id, "stale checkout was paid, reconciling");
            return self.reconcile(current.id, session_id).await.map(Some);
        }
        if session.status != CheckoutState::Expired {
            self.call_gateway(self.gateway.expire_session(session_id))
                .await?;
            counter!("tribute.checkout.expired", 1);
            info!(contribution_id = %current.id, %session_id, "stale checkout session expired");
        }
        Ok(None)
    }

    fn memorial_url(&self, memorial: &memorial::Model) -> String {
        format!(
            "{}/memorial/{}",
            self.settings.public_base_url.trim_end_matches('/'),
            memorial.default_slug
        )
    }

    // ---- drafting -------------------------------------------------------

    #[instrument(skip(self, request), fields(kind = %request.kind))]
    pub async fn create(
        &self,
        owner_id: Uuid,
        memorial_slug: &str,
        request: CreateContributionRequest,
    ) -> Result<ContributionView, ServiceError> {
        request.validate()?;

        let memorial = find_by_slug(&*self.db, memorial_slug)
            .await?
            .filter(|m| m.status != MemorialStatus::Removed)
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Memorial '{}' not found", memorial_slug))
            })?;

        let kind = descriptor(request.kind);
        let now = now_micros();
        let mut model = contribution::Model {
            id: Uuid::new_v4(),
            kind: request.kind,
            memorial_id: memorial.id,
            owner_id,
            status: ContributionStatus::Draft,
            payable_option: request.payable_option.map(|o| o.key()),
            donation_count: request.donation_count.unwrap_or(0),
            item_count: None,
            value_minor: None,
            content: request.content,
            contribution_date: request.contribution_date,
            asset_path: request.asset_path,
            asset_type: request.asset_type,
            checkout_session_id: None,
            checkout_session_created_at: None,
            like_count: 0,
            created_at: now,
            updated_at: now,
        };
        let option = validate_payload(kind, &model)?;
        model.item_count = kind.item_count(option.as_ref());

        let created = contribution::ActiveModel::from(model)
            .reset_all()
            .insert(&*self.db)
            .await?;
        info!(contribution_id = %created.id, memorial_id = %memorial.id, "contribution drafted");
        Ok(created.into())
    }

    /// Owner edit. Only drafts without a live checkout can change.
    #[instrument(skip(self, patch))]
    pub async fn update(
        &self,
        owner_id: Uuid,
        id: Uuid,
        patch: ContributionPatch,
    ) -> Result<ContributionView, ServiceError> {
        patch.validate()?;
        let current = load(&*self.db, id).await?;
        if current.owner_id != owner_id {
            return Err(ServiceError::Unauthorized(
                "Only the contributor can edit a contribution".to_string(),
            ));
        }
        let now = now_micros();
        if current.status != ContributionStatus::Draft || self.checkout_is_live(&current, now) {
            return Err(ServiceError::InvalidState(format!(
                "Contribution {} can no longer be edited",
                id
            )));
        }

        if self.retire_stale_session(&current).await?.is_some() {
            return Err(ServiceError::InvalidState(format!(
                "Contribution {} was paid and can no longer be edited",
                id
            )));
        }

        let kind = descriptor(current.kind);
        let mut next = current.clone();
        patch.apply(&mut next);
        // An abandoned checkout no longer matches the edited basket.
        next.checkout_session_id = None;
        next.checkout_session_created_at = None;
        let option = validate_payload(kind, &next)?;
        next.item_count = kind.item_count(option.as_ref());
        next.updated_at = now;

        let updated = contribution::Entity::update(contribution::ActiveModel::from(next).reset_all())
            .filter(contribution::Column::Status.eq(ContributionStatus::Draft))
            .filter(same_session(&current))
            .exec(&*self.db)
            .await
            .map_err(|e| match e {
                DbErr::RecordNotUpdated => ServiceError::PersistenceConflict(format!(
                    "Contribution {} changed concurrently",
                    id
                )),
                other => other.into(),
            })?;
        debug!(contribution_id = %id, "contribution updated");
        Ok(updated.into())
    }

    /// Deletes an unpublished contribution with its likes and flags.
    #[instrument(skip(self))]
    pub async fn delete(&self, owner_id: Uuid, id: Uuid) -> Result<(), ServiceError> {
        let current = load(&*self.db, id).await?;
        if current.owner_id != owner_id {
            return Err(ServiceError::Unauthorized(
                "Only the contributor can delete a contribution".to_string(),
            ));
        }
        if current.is_published() {
            return Err(ServiceError::InvalidState(format!(
                "Contribution {} is published; report it instead",
                id
            )));
        }

        let txn = self.db.begin().await?;
        contribution_like::Entity::delete_many()
            .filter(contribution_like::Column::ContributionId.eq(id))
            .exec(&txn)
            .await?;
        memorial_flag::Entity::delete_many()
            .filter(memorial_flag::Column::ReferenceId.eq(id))
            .exec(&txn)
            .await?;
        let deleted = contribution::Entity::delete_many()
            .filter(contribution::Column::Id.eq(id))
            .filter(contribution::Column::Status.ne(ContributionStatus::Published))
            .exec(&txn)
            .await?;
        if deleted.rows_affected == 0 {
            return Err(ServiceError::PersistenceConflict(format!(
                "Contribution {} changed concurrently",
                id
            )));
        }
        txn.commit().await?;
        info!(contribution_id = %id, "contribution deleted");
        Ok(())
    }

    /// Published contributions are public; others are visible to their
    /// contributor and the memorial owner only.
    #[instrument(skip(self))]
    pub async fn get(&self, id: Uuid, viewer: Option<Uuid>) -> Result<ContributionView, ServiceError> {
        let current = load(&*self.db, id).await?;
        if !current.is_published() {
            let memorial = find_required(&*self.db, current.memorial_id).await?;
            let allowed = viewer
                .map(|v| v == current.owner_id || v == memorial.owner_id)
                .unwrap_or(false);
            if !allowed {
                return Err(not_found(id));
            }
        }

        let liked = match viewer {
            Some(v) => Some(
                contribution_like::Entity::find_by_id((v, id))
                    .one(&*self.db)
                    .await?
                    .is_some(),
            ),
            None => None,
        };
        let mut view = ContributionView::from(current);
        view.liked_by_viewer = liked;
        Ok(view)
    }

    /// Shows the contribution with `overrides` applied, without saving.
    #[instrument(skip(self, overrides))]
    pub async fn preview(
        &self,
        caller_id: Uuid,
        id: Uuid,
        overrides: ContributionPatch,
    ) -> Result<ContributionView, ServiceError> {
        overrides.validate()?;
        let current = load(&*self.db, id).await?;
        let memorial = find_required(&*self.db, current.memorial_id).await?;
        if caller_id != current.owner_id && caller_id != memorial.owner_id {
            return Err(ServiceError::Unauthorized(
                "Not allowed to preview this contribution".to_string(),
            ));
        }
        let kind = descriptor(current.kind);
        let mut preview = current;
        overrides.apply(&mut preview);
        let option = validate_payload(kind, &preview)?;
        preview.item_count = kind.item_count(option.as_ref());
        Ok(preview.into())
    }

    // ---- publishing -----------------------------------------------------

    fn guard_publishable(
        &self,
        model: &contribution::Model,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        match model.status {
            ContributionStatus::Published => Err(ServiceError::AlreadyPublished(model.id)),
            ContributionStatus::InReview => Err(ServiceError::UnderReview(model.id)),
            ContributionStatus::Rejected | ContributionStatus::Removed => {
                Err(ServiceError::InvalidState(format!(
                    "Contribution {} was {} and cannot be republished",
                    model.id, model.status
                )))
            }
            ContributionStatus::Draft if self.checkout_is_live(model, now) => {
                Err(ServiceError::UnderReview(model.id))
            }
            ContributionStatus::Draft => Ok(()),
        }
    }

    /// Publishes a draft. An empty basket publishes immediately; otherwise a
    /// checkout session is created and its payment URL returned.
    #[instrument(skip(self))]
    pub async fn publish(&self, actor_id: Uuid, id: Uuid) -> Result<PublishOutcome, ServiceError> {
        let current = load(&*self.db, id).await?;
        if current.owner_id != actor_id {
            return Err(ServiceError::Unauthorized(
                "Only the contributor can publish a contribution".to_string(),
            ));
        }
        let now = now_micros();
        self.guard_publishable(&current, now)?;

        let memorial = find_required(&*self.db, current.memorial_id).await?;
        if memorial.status == MemorialStatus::Removed {
            return Err(ServiceError::InvalidState(format!(
                "Memorial {} has been removed",
                memorial.id
            )));
        }

        match self.retire_stale_session(&current).await? {
            None => {}
            Some(ReconcileResult::Published) => return Ok(PublishOutcome::Published),
            Some(ReconcileResult::AlreadyPublished) => {
                return Err(ServiceError::AlreadyPublished(id))
            }
            Some(_) => {
                return Err(ServiceError::PersistenceConflict(format!(
                    "Contribution {} changed while closing its checkout",
                    id
                )))
            }
        }

        let kind = descriptor(current.kind);
        let option = validate_payload(kind, &current)?;
        let prices = self.catalog.prices().await?;
        let basket = build_basket(kind, option.as_ref(), current.donation_count, &prices)?;

        if basket.is_empty() {
            return self.publish_free(kind, &current, &memorial, now).await;
        }

        let total = basket.total();
        let request = self.checkout_request(&current, &memorial, basket, now);
        let session = self
            .call_gateway(self.gateway.create_checkout_session(request))
            .await?;

        // Gateway call is done before touching the row; a crash here only
        // leaves an abandoned session behind.
        let stored = contribution::Entity::update_many()
            .col_expr(
                contribution::Column::CheckoutSessionId,
                Expr::value(Some(session.id.clone())),
            )
            .col_expr(
                contribution::Column::CheckoutSessionCreatedAt,
                Expr::value(Some(now)),
            )
            .col_expr(contribution::Column::UpdatedAt, Expr::value(now))
            .filter(contribution::Column::Id.eq(id))
            .filter(contribution::Column::Status.eq(ContributionStatus::Draft))
            .filter(same_session(&current))
            .exec(&*self.db)
            .await?;
        if stored.rows_affected == 0 {
            return Err(ServiceError::PersistenceConflict(format!(
                "Contribution {} changed while creating checkout",
                id
            )));
        }

        counter!("tribute.publish.checkout", 1);
        info!(contribution_id = %id, session_id = %session.id, total, "checkout session stored");
        self.event_sender
            .send_or_log(Event::CheckoutSessionCreated {
                contribution_id: id,
                session_id: session.id,
            });

        Ok(PublishOutcome::NeedsPayment {
            payment_url: session.url,
        })
    }

    async fn publish_free(
        &self,
        kind: &dyn KindDescriptor,
        current: &contribution::Model,
        memorial: &memorial::Model,
        now: DateTime<Utc>,
    ) -> Result<PublishOutcome, ServiceError> {
        let txn = self.db.begin().await?;
        let flipped = contribution::Entity::update_many()
            .col_expr(
                contribution::Column::Status,
                Expr::value(ContributionStatus::Published),
            )
            .col_expr(
                contribution::Column::CheckoutSessionId,
                Expr::value(Option::<String>::None),
            )
            .col_expr(
                contribution::Column::CheckoutSessionCreatedAt,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .col_expr(contribution::Column::UpdatedAt, Expr::value(now))
            .filter(contribution::Column::Id.eq(current.id))
            .filter(contribution::Column::Status.eq(ContributionStatus::Draft))
            .filter(same_session(current))
            .exec(&txn)
            .await?;
        if flipped.rows_affected == 0 {
            return Err(ServiceError::PersistenceConflict(format!(
                "Contribution {} changed while publishing",
                current.id
            )));
        }

        let published = load(&txn, current.id).await?;
        let flag = raise_request_flag(&txn, memorial, &published, kind.request_flag()).await?;
        txn.commit().await?;

        counter!("tribute.publish.free", 1);
        info!(contribution_id = %current.id, "contribution published without payment");
        self.after_publish(&published, memorial, flag.as_ref(), false);
        Ok(PublishOutcome::Published)
    }

    fn after_publish(
        &self,
        published: &contribution::Model,
        memorial: &memorial::Model,
        flag: Option<&memorial_flag::Model>,
        paid: bool,
    ) {
        self.event_sender
            .send_or_log(Event::ContributionPublished {
                contribution_id: published.id,
                memorial_id: published.memorial_id,
                kind: published.kind,
                paid,
            });
        if let Some(flag) = flag {
            self.event_sender.send_or_log(flag_raised_event(flag, memorial));
        }
    }

    fn checkout_request(
        &self,
        current: &contribution::Model,
        memorial: &memorial::Model,
        basket: Basket,
        now: DateTime<Utc>,
    ) -> CheckoutRequest {
        let return_url = format!(
            "{}?session_id={{CHECKOUT_SESSION_ID}}&type={}",
            self.memorial_url(memorial),
            current.kind
        );
        let mut metadata = BTreeMap::new();
        metadata.insert("user_id".to_string(), current.owner_id.to_string());
        metadata.insert("memorial_id".to_string(), memorial.id.to_string());
        metadata.insert("memorial_slug".to_string(), memorial.default_slug.clone());
        metadata.insert("contribution_id".to_string(), current.id.to_string());
        metadata.insert("kind".to_string(), current.kind.to_string());

        CheckoutRequest {
            line_items: basket.items,
            currency: self.settings.currency.clone(),
            success_url: return_url.clone(),
            cancel_url: return_url,
            metadata,
            expires_at: now + self.settings.checkout_session_ttl,
        }
    }

    // ---- reconciliation -------------------------------------------------

    /// Confirms a checkout session and publishes its contribution. Safe to
    /// call any number of times, from polling and webhooks alike.
    #[instrument(skip(self))]
    pub async fn reconcile(
        &self,
        id: Uuid,
        session_id: &str,
    ) -> Result<ReconcileResult, ServiceError> {
        let current = load(&*self.db, id).await?;
        let session = self
            .call_gateway(self.gateway.retrieve_session(session_id))
            .await?;

        let belongs = session
            .metadata_value("contribution_id")
            .and_then(|raw| Uuid::parse_str(raw).ok())
            == Some(id);
        if !belongs {
            return Err(ServiceError::InvalidInput(format!(
                "Checkout session {} does not belong to contribution {}",
                session_id, id
            )));
        }

        if !session.is_paid() {
            counter!("tribute.reconcile.unpaid", 1);
            info!(contribution_id = %id, %session_id, "checkout session not paid yet");
            return Ok(ReconcileResult::Unpaid);
        }

        let kind = descriptor(current.kind);
        let value_minor = match session.amount_total {
            Some(amount) => amount,
            None => {
                let option = stored_option(&current)?;
                let prices = self.catalog.prices().await?;
                build_basket(kind, option.as_ref(), current.donation_count, &prices)?.total()
            }
        };

        let pending = matches!(
            current.status,
            ContributionStatus::Draft | ContributionStatus::InReview
        ) && current.checkout_session_id.as_deref() == Some(session_id);
        if !pending {
            return self
                .settle_unmatched(&current, session_id, value_minor)
                .await;
        }

        let memorial = find_required(&*self.db, current.memorial_id).await?;
        let now = now_micros();
        let txn = self.db.begin().await?;
        let mut flip = contribution::Entity::update_many()
            .col_expr(
                contribution::Column::Status,
                Expr::value(ContributionStatus::Published),
            )
            .col_expr(
                contribution::Column::CheckoutSessionId,
                Expr::value(Option::<String>::None),
            )
            .col_expr(
                contribution::Column::CheckoutSessionCreatedAt,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .col_expr(contribution::Column::UpdatedAt, Expr::value(now));
        if current.kind == ContributionKind::Donation {
            flip = flip.col_expr(
                contribution::Column::ValueMinor,
                Expr::value(Some(value_minor)),
            );
        }
        let flipped = flip
            .filter(contribution::Column::Id.eq(id))
            .filter(
                contribution::Column::Status
                    .is_in([ContributionStatus::Draft, ContributionStatus::InReview]),
            )
            .filter(contribution::Column::CheckoutSessionId.eq(session_id))
            .exec(&txn)
            .await?;

        if flipped.rows_affected == 0 {
            txn.rollback().await?;
            debug!(contribution_id = %id, "contribution changed during reconciliation");
            return self
                .settle_unmatched(&current, session_id, value_minor)
                .await;
        }

        self.record_transaction(&txn, &current, session_id, value_minor, now)
            .await?;
        let published = load(&txn, id).await?;
        let flag = raise_request_flag(&txn, &memorial, &published, kind.request_flag()).await?;
        txn.commit().await?;

        counter!("tribute.reconcile.published", 1);
        info!(contribution_id = %id, %session_id, value_minor, "payment reconciled, contribution published");
        self.after_publish(&published, &memorial, flag.as_ref(), true);
        Ok(ReconcileResult::Published)
    }

    /// Handles a paid session that is not the contribution's pending checkout.
    /// Redelivery of the settling session changes nothing; any other payment
    /// is kept on record and queued for refund.
    async fn settle_unmatched(
        &self,
        current: &contribution::Model,
        session_id: &str,
        value_minor: i64,
    ) -> Result<ReconcileResult, ServiceError> {
        let txn = self.db.begin().await?;
        let recorded = self
            .record_transaction(&txn, current, session_id, value_minor, now_micros())
            .await?;
        txn.commit().await?;

        let latest = load(&*self.db, current.id).await?;
        let result = if latest.status == ContributionStatus::Draft {
            ReconcileResult::Superseded
        } else {
            ReconcileResult::AlreadyPublished
        };

        if recorded {
            counter!("tribute.reconcile.refund", 1);
            warn!(
                contribution_id = %current.id,
                %session_id,
                value_minor,
                status = %latest.status,
                "payment does not settle the contribution, refund required"
            );
            self.event_sender.send_or_log(Event::PaymentNeedsRefund {
                contribution_id: current.id,
                session_id: session_id.to_string(),
                value_minor,
            });
        } else {
            counter!("tribute.reconcile.replay", 1);
            info!(contribution_id = %current.id, %session_id, "reconciliation replay ignored");
        }
        Ok(result)
    }

    /// Inserts the payment record; `false` if this session was already recorded.
    async fn record_transaction(
        &self,
        txn: &DatabaseTransaction,
        contribution: &contribution::Model,
        session_id: &str,
        value_minor: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let savepoint = txn.begin().await?;
        let inserted = memorial_transaction::ActiveModel {
            payment_id: Set(session_id.to_string()),
            memorial_id: Set(contribution.memorial_id),
            user_id: Set(contribution.owner_id),
            contribution_id: Set(contribution.id),
            kind: Set(contribution.kind),
            value_minor: Set(value_minor),
            created_at: Set(now),
        }
        .insert(&savepoint)
        .await;
        match inserted {
            Ok(_) => {
                savepoint.commit().await?;
                Ok(true)
            }
            Err(e) if is_unique_violation(&e) => {
                savepoint.rollback().await?;
                debug!(%session_id, "transaction already recorded");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Client return path after checkout.
    #[instrument(skip(self))]
    pub async fn validate_purchase(
        &self,
        id: Uuid,
        session_id: &str,
    ) -> Result<PurchaseValidation, ServiceError> {
        let current = load(&*self.db, id).await?;
        let memorial = find_required(&*self.db, current.memorial_id).await?;
        let result = self.reconcile(id, session_id).await?;

        let mut redirect_url = format!(
            "{}?session_id={}&type={}",
            self.memorial_url(&memorial),
            session_id,
            current.kind
        );
        if result.is_success() {
            redirect_url.push_str(&format!("&active_tab={}s", current.kind));
        }
        Ok(PurchaseValidation {
            success: result.is_success(),
            redirect_url,
        })
    }

    /// Applies a verified webhook event. Anything that cannot or need not be
    /// acted on is reported as ignored so the gateway stops retrying.
    #[instrument(skip(self))]
    pub async fn handle_payment_event(
        &self,
        event: PaymentEvent,
    ) -> Result<WebhookOutcome, ServiceError> {
        match event {
            PaymentEvent::Ignored { event_type } => {
                debug!(%event_type, "unhandled payment event");
                Ok(WebhookOutcome::Ignored)
            }
            PaymentEvent::SessionPaid {
                session_id,
                contribution_id: Some(id),
                ..
            } => self.reconcile_from_webhook(id, &session_id).await,
            PaymentEvent::PaymentIntentSucceeded {
                contribution_id: Some(id),
                ..
            } => {
                let stored = contribution::Entity::find_by_id(id)
                    .one(&*self.db)
                    .await?
                    .and_then(|c| c.checkout_session_id);
                match stored {
                    Some(session_id) => self.reconcile_from_webhook(id, &session_id).await,
                    None => {
                        info!(contribution_id = %id, "no pending session for payment intent");
                        Ok(WebhookOutcome::Ignored)
                    }
                }
            }
            PaymentEvent::SessionPaid {
                contribution_id: None,
                ..
            }
            | PaymentEvent::PaymentIntentSucceeded {
                contribution_id: None,
                ..
            } => {
                info!("payment event without contribution reference");
                Ok(WebhookOutcome::Ignored)
            }
        }
    }

    async fn reconcile_from_webhook(
        &self,
        id: Uuid,
        session_id: &str,
    ) -> Result<WebhookOutcome, ServiceError> {
        match self.reconcile(id, session_id).await {
            Ok(result) => Ok(WebhookOutcome::Reconciled(result)),
            Err(ServiceError::NotFound(msg)) => {
                info!(%msg, "webhook for a contribution that no longer exists");
                Ok(WebhookOutcome::Ignored)
            }
            Err(ServiceError::InvalidInput(msg)) => {
                warn!(%msg, "webhook session does not match contribution");
                Ok(WebhookOutcome::Ignored)
            }
            Err(e) => Err(e),
        }
    }
}
