use chrono::{SubsecRound, Utc};
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::db::is_unique_violation;
use crate::entities::contribution::{self, ContributionStatus};
use crate::entities::memorial::{self, MemorialStatus};
use crate::entities::memorial_flag::{self, FlagReason, FlagStatus, FlagType};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::{FlagKind, FlagTarget};

use super::memorials::{find_by_slug, find_required};

/// Flag about to be stored.
#[derive(Debug, Clone)]
pub(crate) struct NewFlag {
    pub memorial_id: Uuid,
    pub flag_type: FlagType,
    pub reference_id: Uuid,
    pub actor_id: Uuid,
    pub addressee: Option<Uuid>,
    pub reason: Option<FlagReason>,
}

/// Decision on an open flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlagDecision {
    Approved,
    Rejected,
}

impl From<FlagDecision> for FlagStatus {
    fn from(decision: FlagDecision) -> Self {
        match decision {
            FlagDecision::Approved => FlagStatus::Approved,
            FlagDecision::Rejected => FlagStatus::Rejected,
        }
    }
}

pub(crate) fn memorial_path(memorial: &memorial::Model) -> String {
    format!("/memorial/{}", memorial.slug())
}

/// Stores an open flag unless an identical one is already open.
///
/// Runs inside the caller's transaction; the insert goes through a savepoint
/// so a concurrent duplicate only rolls back the savepoint.
pub(crate) async fn insert_open_flag(
    txn: &DatabaseTransaction,
    flag: NewFlag,
) -> Result<Option<memorial_flag::Model>, ServiceError> {
    let existing = memorial_flag::Entity::find()
        .filter(memorial_flag::Column::MemorialId.eq(flag.memorial_id))
        .filter(memorial_flag::Column::ActorId.eq(flag.actor_id))
        .filter(memorial_flag::Column::FlagType.eq(flag.flag_type))
        .filter(memorial_flag::Column::ReferenceId.eq(flag.reference_id))
        .filter(memorial_flag::Column::Status.eq(FlagStatus::Open))
        .one(txn)
        .await?;
    if let Some(existing) = existing {
        debug!(flag_id = %existing.id, "open flag already exists, skipping");
        counter!("tribute.flags.skipped", 1);
        return Ok(None);
    }

    let savepoint = txn.begin().await?;
    let inserted = memorial_flag::ActiveModel {
        id: Set(Uuid::new_v4()),
        memorial_id: Set(flag.memorial_id),
        flag_type: Set(flag.flag_type),
        reference_id: Set(flag.reference_id),
        actor_id: Set(flag.actor_id),
        user_id: Set(flag.addressee),
        status: Set(FlagStatus::Open),
        reason: Set(flag.reason),
        created_at: Set(Utc::now().trunc_subsecs(6)),
        status_updated_at: Set(None),
    }
    .insert(&savepoint)
    .await;

    match inserted {
        Ok(model) => {
            savepoint.commit().await?;
            counter!("tribute.flags.created", 1);
            Ok(Some(model))
        }
        Err(e) if is_unique_violation(&e) => {
            savepoint.rollback().await?;
            debug!("concurrent open flag won the race, skipping");
            counter!("tribute.flags.skipped", 1);
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Owner review flag for a contribution that just went live. Skipped when
/// the contributor owns the memorial.
pub(crate) async fn raise_request_flag(
    txn: &DatabaseTransaction,
    memorial: &memorial::Model,
    contribution: &contribution::Model,
    flag_type: FlagType,
) -> Result<Option<memorial_flag::Model>, ServiceError> {
    if contribution.owner_id == memorial.owner_id {
        debug!(contribution_id = %contribution.id, "contributor owns the memorial, no review flag");
        counter!("tribute.flags.skipped", 1);
        return Ok(None);
    }
    insert_open_flag(
        txn,
        NewFlag {
            memorial_id: memorial.id,
            flag_type,
            reference_id: contribution.id,
            actor_id: contribution.owner_id,
            addressee: Some(memorial.owner_id),
            reason: None,
        },
    )
    .await
}

pub(crate) fn flag_raised_event(
    flag: &memorial_flag::Model,
    memorial: &memorial::Model,
) -> Event {
    Event::FlagRaised {
        flag_id: flag.id,
        flag_type: flag.flag_type,
        memorial_id: flag.memorial_id,
        reference_id: flag.reference_id,
        actor_id: flag.actor_id,
        addressee: flag.user_id,
        redirect_url: Some(memorial_path(memorial)),
    }
}

/// Moderation flag workflow.
#[derive(Clone)]
pub struct FlagService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl FlagService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Resolves the memorial a flag belongs to, checking the reference
    /// matches the flag's target.
    async fn resolve_memorial(
        &self,
        txn: &DatabaseTransaction,
        flag_type: FlagType,
        reference_id: Uuid,
    ) -> Result<memorial::Model, ServiceError> {
        let invalid = || ServiceError::InvalidReference(format!("{} {}", flag_type, reference_id));
        let memorial_id = match flag_type.classify() {
            FlagKind::Report {
                target: FlagTarget::Memorial,
            } => reference_id,
            FlagKind::Report {
                target: FlagTarget::Contribution(kind),
            }
            | FlagKind::Request { kind } => {
                let target = contribution::Entity::find_by_id(reference_id)
                    .one(txn)
                    .await?
                    .ok_or_else(invalid)?;
                if target.kind != kind {
                    return Err(invalid());
                }
                target.memorial_id
            }
        };
        memorial::Entity::find_by_id(memorial_id)
            .one(txn)
            .await?
            .ok_or_else(invalid)
    }

    /// Raises a flag. Only report types are accepted here; review requests
    /// are raised by the contribution lifecycle. Returns `None` when the
    /// flag was skipped as a duplicate.
    #[instrument(skip(self))]
    pub async fn create_flag(
        &self,
        actor_id: Uuid,
        flag_type: FlagType,
        reference_id: Uuid,
        reason: Option<FlagReason>,
    ) -> Result<Option<memorial_flag::Model>, ServiceError> {
        if !flag_type.is_report() {
            return Err(ServiceError::ValidationError(
                "Invalid flag type".to_string(),
            ));
        }

        let txn = self.db.begin().await?;
        let memorial = self.resolve_memorial(&txn, flag_type, reference_id).await?;
        let addressee = match flag_type.classify() {
            FlagKind::Report {
                target: FlagTarget::Memorial,
            } => None,
            _ => Some(memorial.owner_id),
        };

        let created = insert_open_flag(
            &txn,
            NewFlag {
                memorial_id: memorial.id,
                flag_type,
                reference_id,
                actor_id,
                addressee,
                reason,
            },
        )
        .await?;
        txn.commit().await?;

        match &created {
            Some(flag) => {
                info!(flag_id = %flag.id, %flag_type, "flag created");
                self.event_sender.send_or_log(flag_raised_event(flag, &memorial));
            }
            None => info!(%flag_type, %reference_id, "duplicate flag skipped"),
        }
        Ok(created)
    }

    /// Approves or rejects an open flag and cascades the decision into the
    /// flagged contribution or memorial, atomically.
    #[instrument(skip(self))]
    pub async fn resolve_flag(
        &self,
        caller_id: Uuid,
        caller_is_admin: bool,
        flag_id: Uuid,
        decision: FlagDecision,
    ) -> Result<memorial_flag::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let flag = memorial_flag::Entity::find_by_id(flag_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Flag {} not found", flag_id)))?;

        let kind = flag.flag_type.classify();
        let is_addressee = flag.user_id == Some(caller_id);
        let memorial_report = matches!(
            kind,
            FlagKind::Report {
                target: FlagTarget::Memorial
            }
        );
        if (memorial_report || !is_addressee) && !caller_is_admin {
            return Err(ServiceError::Unauthorized(
                "Not allowed to handle this flag".to_string(),
            ));
        }
        if flag.status != FlagStatus::Open {
            return Err(ServiceError::AlreadyHandled(flag_id));
        }

        let status: FlagStatus = decision.into();
        let now = Utc::now().trunc_subsecs(6);
        let claimed = memorial_flag::Entity::update_many()
            .col_expr(memorial_flag::Column::Status, Expr::value(status))
            .col_expr(memorial_flag::Column::StatusUpdatedAt, Expr::value(now))
            .filter(memorial_flag::Column::Id.eq(flag_id))
            .filter(memorial_flag::Column::Status.eq(FlagStatus::Open))
            .exec(&txn)
            .await?;
        if claimed.rows_affected == 0 {
            return Err(ServiceError::AlreadyHandled(flag_id));
        }

        match (kind, decision) {
            (FlagKind::Request { .. }, FlagDecision::Approved) => {
                set_contribution_status(
                    &txn,
                    flag.reference_id,
                    &[ContributionStatus::InReview, ContributionStatus::Published],
                    ContributionStatus::Published,
                )
                .await?;
            }
            (FlagKind::Request { .. }, FlagDecision::Rejected) => {
                set_contribution_status(
                    &txn,
                    flag.reference_id,
                    &[ContributionStatus::InReview, ContributionStatus::Published],
                    ContributionStatus::Rejected,
                )
                .await?;
            }
            (
                FlagKind::Report {
                    target: FlagTarget::Contribution(_),
                },
                FlagDecision::Approved,
            ) => {
                set_contribution_status(
                    &txn,
                    flag.reference_id,
                    &[ContributionStatus::Published, ContributionStatus::InReview],
                    ContributionStatus::Removed,
                )
                .await?;
            }
            (
                FlagKind::Report {
                    target: FlagTarget::Memorial,
                },
                FlagDecision::Approved,
            ) => {
                memorial::Entity::update_many()
                    .col_expr(
                        memorial::Column::Status,
                        Expr::value(MemorialStatus::Removed),
                    )
                    .filter(memorial::Column::Id.eq(flag.memorial_id))
                    .exec(&txn)
                    .await?;
                info!(memorial_id = %flag.memorial_id, "memorial removed by report");
            }
            (FlagKind::Report { .. }, FlagDecision::Rejected) => {}
        }

        let memorial = find_required(&txn, flag.memorial_id).await?;
        let resolved = memorial_flag::Entity::find_by_id(flag_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Flag {} not found", flag_id)))?;

        txn.commit().await.map_err(|e| {
            error!("Failed to commit flag resolution: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        info!(%flag_id, %status, by = %caller_id, "flag resolved");
        self.event_sender
            .send_or_log(Event::FlagResolved {
                flag_id,
                flag_type: resolved.flag_type,
                reference_id: resolved.reference_id,
                actor_id: resolved.actor_id,
                resolved_by: caller_id,
                status,
                redirect_url: Some(memorial_path(&memorial)),
            });

        Ok(resolved)
    }

    /// Open flags addressed to the owner of the memorial behind `slug`.
    #[instrument(skip(self))]
    pub async fn list_open_for_owner(
        &self,
        caller_id: Uuid,
        slug: &str,
    ) -> Result<Vec<memorial_flag::Model>, ServiceError> {
        let memorial = find_by_slug(&*self.db, slug)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Memorial '{}' not found", slug)))?;
        if memorial.owner_id != caller_id {
            return Err(ServiceError::Forbidden(
                "Only the memorial owner can list its flags".to_string(),
            ));
        }
        Ok(memorial_flag::Entity::find()
            .filter(memorial_flag::Column::MemorialId.eq(memorial.id))
            .filter(memorial_flag::Column::UserId.eq(caller_id))
            .filter(memorial_flag::Column::Status.eq(FlagStatus::Open))
            .order_by_desc(memorial_flag::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    /// Every open report flag, for admin triage.
    #[instrument(skip(self))]
    pub async fn list_open_reports(
        &self,
        caller_is_admin: bool,
    ) -> Result<Vec<memorial_flag::Model>, ServiceError> {
        if !caller_is_admin {
            return Err(ServiceError::Forbidden("Admin access required".to_string()));
        }
        Ok(memorial_flag::Entity::find()
            .filter(memorial_flag::Column::Status.eq(FlagStatus::Open))
            .filter(memorial_flag::Column::FlagType.is_in([
                FlagType::MemoryReport,
                FlagType::CondolenceReport,
                FlagType::DonationReport,
                FlagType::MemorialReport,
            ]))
            .order_by_asc(memorial_flag::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }
}

/// Conditional status change; a contribution outside `from` is left alone.
async fn set_contribution_status<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
    from: &[ContributionStatus],
    to: ContributionStatus,
) -> Result<bool, ServiceError> {
    let result = contribution::Entity::update_many()
        .col_expr(contribution::Column::Status, Expr::value(to))
        .col_expr(
            contribution::Column::UpdatedAt,
            Expr::value(Utc::now().trunc_subsecs(6)),
        )
        .filter(contribution::Column::Id.eq(id))
        .filter(contribution::Column::Status.is_in(from.iter().copied()))
        .exec(conn)
        .await?;
    if result.rows_affected == 0 {
        debug!(contribution_id = %id, %to, "contribution not in a state the decision applies to");
    } else {
        info!(contribution_id = %id, %to, "contribution status changed by moderation");
    }
    Ok(result.rows_affected > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::contribution::ContributionKind;
    use crate::services::feed::FeedQuery;
    use crate::services::testing::Fixture;
    use assert_matches::assert_matches;

    async fn status_of(fx: &Fixture, id: Uuid) -> ContributionStatus {
        contribution::Entity::find_by_id(id)
            .one(&*fx.db)
            .await
            .unwrap()
            .unwrap()
            .status
    }

    #[tokio::test]
    async fn report_is_addressed_to_owner_and_deduplicated() {
        let mut fx = Fixture::new().await;
        let owner = Uuid::new_v4();
        let reporter = Uuid::new_v4();
        let memorial = fx.memorial(owner).await;
        let memory = fx.published_memory(owner, &memorial).await;
        fx.drain_events();

        let flag = fx
            .flags
            .create_flag(reporter, FlagType::MemoryReport, memory.id, Some(FlagReason::Scam))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(flag.user_id, Some(owner));
        assert_eq!(flag.status, FlagStatus::Open);

        let again = fx
            .flags
            .create_flag(reporter, FlagType::MemoryReport, memory.id, None)
            .await
            .unwrap();
        assert!(again.is_none());

        let events = fx.drain_events();
        assert_eq!(events.len(), 1);
        assert_matches!(&events[0], Event::FlagRaised { flag_id, .. } if *flag_id == flag.id);
    }

    #[tokio::test]
    async fn create_flag_validates_type_and_reference() {
        let fx = Fixture::new().await;
        let owner = Uuid::new_v4();
        let memorial = fx.memorial(owner).await;
        let memory = fx.published_memory(owner, &memorial).await;

        assert_matches!(
            fx.flags
                .create_flag(owner, FlagType::MemoryRequest, memory.id, None)
                .await,
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            fx.flags
                .create_flag(owner, FlagType::CondolenceReport, memory.id, None)
                .await,
            Err(ServiceError::InvalidReference(_))
        );
        assert_matches!(
            fx.flags
                .create_flag(owner, FlagType::MemorialReport, Uuid::new_v4(), None)
                .await,
            Err(ServiceError::InvalidReference(_))
        );
    }

    #[tokio::test]
    async fn approving_a_report_removes_the_contribution() {
        let fx = Fixture::new().await;
        let owner = Uuid::new_v4();
        let memorial = fx.memorial(owner).await;
        let memory = fx.published_memory(owner, &memorial).await;
        let flag = fx
            .flags
            .create_flag(Uuid::new_v4(), FlagType::MemoryReport, memory.id, None)
            .await
            .unwrap()
            .unwrap();

        assert_matches!(
            fx.flags
                .resolve_flag(Uuid::new_v4(), false, flag.id, FlagDecision::Approved)
                .await,
            Err(ServiceError::Unauthorized(_))
        );

        let resolved = fx
            .flags
            .resolve_flag(owner, false, flag.id, FlagDecision::Approved)
            .await
            .unwrap();
        assert_eq!(resolved.status, FlagStatus::Approved);
        assert!(resolved.status_updated_at.is_some());
        assert_eq!(status_of(&fx, memory.id).await, ContributionStatus::Removed);

        assert_matches!(
            fx.flags
                .resolve_flag(owner, false, flag.id, FlagDecision::Rejected)
                .await,
            Err(ServiceError::AlreadyHandled(id)) if id == flag.id
        );
    }

    #[tokio::test]
    async fn rejecting_a_request_rejects_the_contribution() {
        let mut fx = Fixture::new().await;
        let owner = Uuid::new_v4();
        let guest = Uuid::new_v4();
        let memorial = fx.memorial(owner).await;
        let draft = fx
            .draft(guest, &memorial, ContributionKind::Condolence, None)
            .await;
        fx.contributions.publish(guest, draft.id).await.unwrap();

        let open = fx
            .flags
            .list_open_for_owner(owner, &memorial.default_slug)
            .await
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].flag_type, FlagType::CondolenceRequest);
        assert_matches!(
            fx.flags
                .list_open_for_owner(guest, &memorial.default_slug)
                .await,
            Err(ServiceError::Forbidden(_))
        );
        fx.drain_events();

        fx.flags
            .resolve_flag(owner, false, open[0].id, FlagDecision::Rejected)
            .await
            .unwrap();
        assert_eq!(status_of(&fx, draft.id).await, ContributionStatus::Rejected);
        assert_matches!(
            fx.contributions.publish(guest, draft.id).await,
            Err(ServiceError::InvalidState(_))
        );

        let events = fx.drain_events();
        assert_matches!(
            &events[..],
            [Event::FlagResolved { status: FlagStatus::Rejected, actor_id, .. }] if *actor_id == guest
        );
    }

    #[tokio::test]
    async fn memorial_reports_need_an_admin() {
        let fx = Fixture::new().await;
        let owner = Uuid::new_v4();
        let memorial = fx.memorial(owner).await;
        let flag = fx
            .flags
            .create_flag(Uuid::new_v4(), FlagType::MemorialReport, memorial.id, Some(FlagReason::Harmful))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(flag.user_id, None);

        assert_matches!(
            fx.flags.list_open_reports(false).await,
            Err(ServiceError::Forbidden(_))
        );
        assert_eq!(fx.flags.list_open_reports(true).await.unwrap().len(), 1);

        assert_matches!(
            fx.flags
                .resolve_flag(owner, false, flag.id, FlagDecision::Approved)
                .await,
            Err(ServiceError::Unauthorized(_))
        );
        fx.flags
            .resolve_flag(Uuid::new_v4(), true, flag.id, FlagDecision::Approved)
            .await
            .unwrap();

        assert_matches!(
            fx.feed
                .list_published(&memorial.default_slug, &FeedQuery::new(ContributionKind::Memory), None)
                .await,
            Err(ServiceError::NotFound(_))
        );
    }

    #[tokio::test]
    async fn unknown_flag_is_not_found() {
        let fx = Fixture::new().await;
        assert_matches!(
            fx.flags
                .resolve_flag(Uuid::new_v4(), true, Uuid::new_v4(), FlagDecision::Approved)
                .await,
            Err(ServiceError::NotFound(_))
        );
    }
}
