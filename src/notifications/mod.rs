use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::entities::memorial_flag::FlagStatus;
use crate::entities::notification::{self, NotificationKind};
use crate::errors::ServiceError;
use crate::events::{Event, EventHandler};
use crate::models::{descriptor, FlagKind};

/// Most recent notifications returned per listing.
pub const NOTIFICATION_PAGE_LIMIT: u64 = 50;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("Notification not found: {0}")]
    NotFound(Uuid),
}

impl From<NotificationError> for ServiceError {
    fn from(err: NotificationError) -> Self {
        match err {
            NotificationError::Database(e) => ServiceError::DatabaseError(e),
            NotificationError::NotFound(id) => {
                ServiceError::NotFound(format!("Notification {} not found", id))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewNotification {
    pub user_id: Uuid,
    pub actor_id: Uuid,
    pub reference_id: Uuid,
    pub kind: NotificationKind,
    pub redirect_url: Option<String>,
}

/// Delivery target for user notifications. Fire-and-forget from the
/// caller's point of view.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: NewNotification) -> Result<(), NotificationError>;
}

/// Stores notifications in the `notifications` table.
#[derive(Clone)]
pub struct DbNotificationSink {
    db: Arc<DatabaseConnection>,
}

impl DbNotificationSink {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl NotificationSink for DbNotificationSink {
    async fn notify(&self, n: NewNotification) -> Result<(), NotificationError> {
        notification::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(n.user_id),
            actor_id: Set(n.actor_id),
            reference_id: Set(n.reference_id),
            kind: Set(n.kind),
            redirect_url: Set(n.redirect_url),
            is_read: Set(false),
            read_at: Set(None),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await?;
        Ok(())
    }
}

/// Turns flag events into notifications.
pub struct NotificationDispatcher {
    sink: Arc<dyn NotificationSink>,
}

impl NotificationDispatcher {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }
}

/// Notification owed for an event, if any.
pub fn notification_for(event: &Event) -> Option<NewNotification> {
    match event {
        Event::FlagRaised {
            flag_type,
            reference_id,
            actor_id,
            addressee,
            redirect_url,
            ..
        } => {
            let user_id = (*addressee)?;
            if user_id == *actor_id {
                return None;
            }
            Some(NewNotification {
                user_id,
                actor_id: *actor_id,
                reference_id: *reference_id,
                kind: flag_type.notification_kind(),
                redirect_url: redirect_url.clone(),
            })
        }
        Event::FlagResolved {
            flag_type,
            reference_id,
            actor_id,
            resolved_by,
            status,
            redirect_url,
            ..
        } => {
            if actor_id == resolved_by {
                return None;
            }
            let kind = match (flag_type.classify(), status) {
                (FlagKind::Request { kind }, FlagStatus::Approved) => {
                    descriptor(kind).approved_notification()
                }
                (FlagKind::Request { kind }, FlagStatus::Rejected) => {
                    descriptor(kind).rejected_notification()
                }
                (FlagKind::Report { .. }, _) => NotificationKind::ReportResolved,
                (_, FlagStatus::Open) => return None,
            };
            Some(NewNotification {
                user_id: *actor_id,
                actor_id: *resolved_by,
                reference_id: *reference_id,
                kind,
                redirect_url: redirect_url.clone(),
            })
        }
        Event::ContributionPublished { .. }
        | Event::CheckoutSessionCreated { .. }
        | Event::PaymentNeedsRefund { .. } => None,
    }
}

#[async_trait]
impl EventHandler for NotificationDispatcher {
    async fn handle_event(&self, event: &Event) -> Result<(), String> {
        match notification_for(event) {
            Some(n) => self.sink.notify(n).await.map_err(|e| e.to_string()),
            None => Ok(()),
        }
    }
}

/// Read side of the notification inbox.
#[derive(Clone)]
pub struct NotificationService {
    db: Arc<DatabaseConnection>,
}

impl NotificationService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn list(&self, user_id: Uuid) -> Result<Vec<notification::Model>, ServiceError> {
        let rows = notification::Entity::find()
            .filter(notification::Column::UserId.eq(user_id))
            .order_by_desc(notification::Column::CreatedAt)
            .order_by_desc(notification::Column::Id)
            .limit(NOTIFICATION_PAGE_LIMIT)
            .all(&*self.db)
            .await?;
        Ok(rows)
    }

    #[instrument(skip(self))]
    pub async fn mark_read(
        &self,
        user_id: Uuid,
        notification_id: Uuid,
    ) -> Result<notification::Model, ServiceError> {
        let existing = notification::Entity::find_by_id(notification_id)
            .filter(notification::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await
            .map_err(NotificationError::from)?
            .ok_or(NotificationError::NotFound(notification_id))?;

        if existing.is_read {
            debug!(%notification_id, "notification already read");
            return Ok(existing);
        }

        let mut active: notification::ActiveModel = existing.into();
        active.is_read = Set(true);
        active.read_at = Set(Some(Utc::now()));
        Ok(active.update(&*self.db).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::memorial_flag::FlagType;

    fn raised(addressee: Option<Uuid>, actor: Uuid) -> Event {
        Event::FlagRaised {
            flag_id: Uuid::new_v4(),
            flag_type: FlagType::MemoryRequest,
            memorial_id: Uuid::new_v4(),
            reference_id: Uuid::new_v4(),
            actor_id: actor,
            addressee,
            redirect_url: None,
        }
    }

    fn resolved(flag_type: FlagType, status: FlagStatus, actor: Uuid, by: Uuid) -> Event {
        Event::FlagResolved {
            flag_id: Uuid::new_v4(),
            flag_type,
            reference_id: Uuid::new_v4(),
            actor_id: actor,
            resolved_by: by,
            status,
            redirect_url: None,
        }
    }

    #[test]
    fn raised_flag_notifies_addressee_only() {
        let actor = Uuid::new_v4();
        let owner = Uuid::new_v4();
        let n = notification_for(&raised(Some(owner), actor)).unwrap();
        assert_eq!(n.user_id, owner);
        assert_eq!(n.kind, NotificationKind::MemoryRequest);

        assert!(notification_for(&raised(None, actor)).is_none());
        assert!(notification_for(&raised(Some(actor), actor)).is_none());
    }

    #[test]
    fn resolution_notifies_actor() {
        let actor = Uuid::new_v4();
        let owner = Uuid::new_v4();

        let n = notification_for(&resolved(
            FlagType::CondolenceRequest,
            FlagStatus::Rejected,
            actor,
            owner,
        ))
        .unwrap();
        assert_eq!(n.user_id, actor);
        assert_eq!(n.kind, NotificationKind::CondolenceRejected);

        let n = notification_for(&resolved(
            FlagType::MemorialReport,
            FlagStatus::Approved,
            actor,
            owner,
        ))
        .unwrap();
        assert_eq!(n.kind, NotificationKind::ReportResolved);

        assert!(notification_for(&resolved(
            FlagType::MemoryRequest,
            FlagStatus::Approved,
            actor,
            actor
        ))
        .is_none());
    }

    #[tokio::test]
    async fn inbox_lists_and_marks_read() {
        let db = Arc::new(crate::db::test_pool().await);
        let sink = DbNotificationSink::new(db.clone());
        let user = Uuid::new_v4();
        sink.notify(NewNotification {
            user_id: user,
            actor_id: Uuid::new_v4(),
            reference_id: Uuid::new_v4(),
            kind: NotificationKind::DonationApproved,
            redirect_url: Some("/memorial/jane".into()),
        })
        .await
        .unwrap();

        let service = NotificationService::new(db);
        let inbox = service.list(user).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert!(!inbox[0].is_read);

        let read = service.mark_read(user, inbox[0].id).await.unwrap();
        assert!(read.is_read);

        let other = service.mark_read(Uuid::new_v4(), inbox[0].id).await;
        assert!(matches!(other, Err(ServiceError::NotFound(_))));
    }
}
