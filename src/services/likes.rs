use chrono::{SubsecRound, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::is_unique_violation;
use crate::entities::{contribution, contribution_like};
use crate::errors::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikeState {
    pub contribution_id: Uuid,
    pub liked: bool,
    pub total_likes: i64,
}

/// Per-user like membership. `like_count` on the contribution moves in the
/// same transaction as the ledger row and only when the row changed.
#[derive(Clone)]
pub struct LikeService {
    db: Arc<DatabaseConnection>,
}

async fn load(
    txn: &DatabaseTransaction,
    contribution_id: Uuid,
) -> Result<contribution::Model, ServiceError> {
    contribution::Entity::find_by_id(contribution_id)
        .one(txn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Contribution {} not found", contribution_id)))
}

async fn bump(txn: &DatabaseTransaction, contribution_id: Uuid, delta: i64) -> Result<(), ServiceError> {
    contribution::Entity::update_many()
        .col_expr(
            contribution::Column::LikeCount,
            Expr::col(contribution::Column::LikeCount).add(delta),
        )
        .filter(contribution::Column::Id.eq(contribution_id))
        .exec(txn)
        .await?;
    Ok(())
}

impl LikeService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Idempotent like. Only published contributions can be liked.
    #[instrument(skip(self))]
    pub async fn like(&self, user_id: Uuid, contribution_id: Uuid) -> Result<LikeState, ServiceError> {
        let txn = self.db.begin().await?;
        let target = load(&txn, contribution_id).await?;
        if !target.is_published() {
            return Err(ServiceError::NotFound(format!(
                "Contribution {} not found",
                contribution_id
            )));
        }

        let already = contribution_like::Entity::find_by_id((user_id, contribution_id))
            .one(&txn)
            .await?
            .is_some();

        let mut inserted = false;
        if !already {
            let savepoint = txn.begin().await?;
            let result = contribution_like::ActiveModel {
                user_id: Set(user_id),
                contribution_id: Set(contribution_id),
                created_at: Set(Utc::now().trunc_subsecs(6)),
            }
            .insert(&savepoint)
            .await;
            match result {
                Ok(_) => {
                    savepoint.commit().await?;
                    inserted = true;
                }
                Err(e) if is_unique_violation(&e) => savepoint.rollback().await?,
                Err(e) => return Err(e.into()),
            }
        }

        if inserted {
            bump(&txn, contribution_id, 1).await?;
        } else {
            debug!(%contribution_id, "already liked");
        }
        let total_likes = load(&txn, contribution_id).await?.like_count;
        txn.commit().await?;

        Ok(LikeState {
            contribution_id,
            liked: true,
            total_likes,
        })
    }

    /// Idempotent unlike; allowed whatever the contribution's status.
    #[instrument(skip(self))]
    pub async fn unlike(
        &self,
        user_id: Uuid,
        contribution_id: Uuid,
    ) -> Result<LikeState, ServiceError> {
        let txn = self.db.begin().await?;
        load(&txn, contribution_id).await?;

        let deleted = contribution_like::Entity::delete_many()
            .filter(contribution_like::Column::UserId.eq(user_id))
            .filter(contribution_like::Column::ContributionId.eq(contribution_id))
            .exec(&txn)
            .await?;
        if deleted.rows_affected > 0 {
            bump(&txn, contribution_id, -1).await?;
        } else {
            debug!(%contribution_id, "not liked, nothing to remove");
        }
        let total_likes = load(&txn, contribution_id).await?.like_count;
        txn.commit().await?;

        Ok(LikeState {
            contribution_id,
            liked: false,
            total_likes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::contribution::ContributionKind;
    use crate::services::testing::Fixture;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn like_and_unlike_are_idempotent() {
        let fx = Fixture::new().await;
        let owner = Uuid::new_v4();
        let fan = Uuid::new_v4();
        let memorial = fx.memorial(owner).await;
        let memory = fx.published_memory(owner, &memorial).await;

        let first = fx.likes.like(fan, memory.id).await.unwrap();
        let second = fx.likes.like(fan, memory.id).await.unwrap();
        assert!(first.liked && second.liked);
        assert_eq!(second.total_likes, 1);

        let other = fx.likes.like(owner, memory.id).await.unwrap();
        assert_eq!(other.total_likes, 2);

        let removed = fx.likes.unlike(fan, memory.id).await.unwrap();
        assert!(!removed.liked);
        assert_eq!(removed.total_likes, 1);
        assert_eq!(fx.likes.unlike(fan, memory.id).await.unwrap().total_likes, 1);

        let view = fx.contributions.get(memory.id, Some(owner)).await.unwrap();
        assert_eq!(view.total_likes, 1);
        assert_eq!(view.liked_by_viewer, Some(true));
    }

    #[tokio::test]
    async fn drafts_cannot_be_liked() {
        let fx = Fixture::new().await;
        let owner = Uuid::new_v4();
        let memorial = fx.memorial(owner).await;
        let draft = fx
            .draft(owner, &memorial, ContributionKind::Memory, None)
            .await;

        assert_matches!(
            fx.likes.like(Uuid::new_v4(), draft.id).await,
            Err(ServiceError::NotFound(_))
        );
        assert_matches!(
            fx.likes.like(Uuid::new_v4(), Uuid::new_v4()).await,
            Err(ServiceError::NotFound(_))
        );
    }
}
