//! Keyset-paginated contribution feeds.

use sea_orm::{
    sea_query::Query, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, RelationTrait, Select,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::entities::contribution::{self, ContributionKind, ContributionStatus};
use crate::entities::contribution_like;
use crate::entities::memorial::{self, MemorialStatus};
use crate::errors::ServiceError;
use crate::models::ContributionView;

use super::memorials::find_by_slug;
use super::pagination::{clamp_page_size, paginate, Cursor, Page, SortField, SortKey, SortOrder};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedQuery {
    pub kind: ContributionKind,
    #[serde(default)]
    pub sort: SortField,
    #[serde(default)]
    pub order: SortOrder,
    pub cursor: Option<String>,
    pub page_size: Option<u64>,
}

impl FeedQuery {
    pub fn new(kind: ContributionKind) -> Self {
        Self {
            kind,
            sort: SortField::default(),
            order: SortOrder::default(),
            cursor: None,
            page_size: None,
        }
    }
}

/// Strictly-after condition on the composite `(primary, id)` key.
fn after(cursor: &Cursor) -> Condition {
    use contribution::Column;
    match (cursor.key, cursor.order) {
        (SortKey::Date(ts), SortOrder::Desc) => Condition::any()
            .add(Column::CreatedAt.lt(ts))
            .add(
                Condition::all()
                    .add(Column::CreatedAt.eq(ts))
                    .add(Column::Id.lt(cursor.id)),
            ),
        (SortKey::Date(ts), SortOrder::Asc) => Condition::any()
            .add(Column::CreatedAt.gt(ts))
            .add(
                Condition::all()
                    .add(Column::CreatedAt.eq(ts))
                    .add(Column::Id.gt(cursor.id)),
            ),
        (SortKey::Likes(n), SortOrder::Desc) => Condition::any()
            .add(Column::LikeCount.lt(n))
            .add(
                Condition::all()
                    .add(Column::LikeCount.eq(n))
                    .add(Column::Id.lt(cursor.id)),
            ),
        (SortKey::Likes(n), SortOrder::Asc) => Condition::any()
            .add(Column::LikeCount.gt(n))
            .add(
                Condition::all()
                    .add(Column::LikeCount.eq(n))
                    .add(Column::Id.gt(cursor.id)),
            ),
    }
}

fn ordered(
    select: Select<contribution::Entity>,
    sort: SortField,
    order: SortOrder,
) -> Select<contribution::Entity> {
    let primary = match sort {
        SortField::Date => contribution::Column::CreatedAt,
        SortField::Likes => contribution::Column::LikeCount,
    };
    match order {
        SortOrder::Asc => select
            .order_by_asc(primary)
            .order_by_asc(contribution::Column::Id),
        SortOrder::Desc => select
            .order_by_desc(primary)
            .order_by_desc(contribution::Column::Id),
    }
}

fn cursor_of(sort: SortField, order: SortOrder) -> impl Fn(&contribution::Model) -> Cursor {
    move |row| {
        let key = match sort {
            SortField::Date => SortKey::Date(row.created_at),
            SortField::Likes => SortKey::Likes(row.like_count),
        };
        Cursor::new(key, row.id, order)
    }
}

#[derive(Clone)]
pub struct FeedService {
    db: Arc<DatabaseConnection>,
    default_page_size: u64,
    max_page_size: u64,
}

impl FeedService {
    pub fn new(db: Arc<DatabaseConnection>, default_page_size: u64, max_page_size: u64) -> Self {
        Self {
            db,
            default_page_size,
            max_page_size,
        }
    }

    /// Runs one keyset page over an already-filtered selection.
    async fn page(
        &self,
        base: Select<contribution::Entity>,
        query: &FeedQuery,
        viewer: Option<Uuid>,
    ) -> Result<Page<ContributionView>, ServiceError> {
        let page_size = clamp_page_size(query.page_size, self.default_page_size, self.max_page_size);
        let mut select = base
            .filter(contribution::Column::Kind.eq(query.kind))
            .filter(contribution::Column::Status.eq(ContributionStatus::Published));

        if let Some(raw) = query.cursor.as_deref() {
            let cursor = Cursor::decode(raw, query.sort, query.order)?;
            select = select.filter(after(&cursor));
        }

        let rows = ordered(select, query.sort, query.order)
            .limit(page_size + 1)
            .all(&*self.db)
            .await?;

        let page = paginate(rows, page_size, cursor_of(query.sort, query.order))?;
        let liked = match viewer {
            Some(viewer) => Some(self.liked_among(viewer, &page.items).await?),
            None => None,
        };

        let items = page
            .items
            .into_iter()
            .map(|row| {
                let id = row.id;
                let mut view = ContributionView::from(row);
                view.liked_by_viewer = liked.as_ref().map(|set| set.contains(&id));
                view
            })
            .collect();

        Ok(Page {
            items,
            next_cursor: page.next_cursor,
        })
    }

    async fn liked_among(
        &self,
        viewer: Uuid,
        rows: &[contribution::Model],
    ) -> Result<HashSet<Uuid>, ServiceError> {
        if rows.is_empty() {
            return Ok(HashSet::new());
        }
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        Ok(contribution_like::Entity::find()
            .filter(contribution_like::Column::UserId.eq(viewer))
            .filter(contribution_like::Column::ContributionId.is_in(ids))
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|like| like.contribution_id)
            .collect())
    }

    fn on_published_memorials() -> Select<contribution::Entity> {
        contribution::Entity::find()
            .join(
                sea_orm::JoinType::InnerJoin,
                contribution::Relation::Memorial.def(),
            )
            .filter(memorial::Column::Status.eq(MemorialStatus::Published))
    }

    /// Published contributions of one kind on a published memorial.
    #[instrument(skip(self, query), fields(kind = %query.kind, sort = %query.sort, order = %query.order))]
    pub async fn list_published(
        &self,
        slug: &str,
        query: &FeedQuery,
        viewer: Option<Uuid>,
    ) -> Result<Page<ContributionView>, ServiceError> {
        let memorial = find_by_slug(&*self.db, slug)
            .await?
            .filter(|m| m.is_published())
            .ok_or_else(|| ServiceError::NotFound(format!("Memorial '{}' not found", slug)))?;

        let base =
            contribution::Entity::find().filter(contribution::Column::MemorialId.eq(memorial.id));
        self.page(base, query, viewer).await
    }

    /// The viewer's own published contributions.
    #[instrument(skip(self, query), fields(kind = %query.kind))]
    pub async fn list_owned(
        &self,
        viewer: Uuid,
        query: &FeedQuery,
    ) -> Result<Page<ContributionView>, ServiceError> {
        let base =
            Self::on_published_memorials().filter(contribution::Column::OwnerId.eq(viewer));
        self.page(base, query, Some(viewer)).await
    }

    /// Published contributions the viewer liked.
    #[instrument(skip(self, query), fields(kind = %query.kind))]
    pub async fn list_liked(
        &self,
        viewer: Uuid,
        query: &FeedQuery,
    ) -> Result<Page<ContributionView>, ServiceError> {
        let liked_ids = Query::select()
            .column(contribution_like::Column::ContributionId)
            .from(contribution_like::Entity)
            .and_where(contribution_like::Column::UserId.eq(viewer))
            .to_owned();
        let base = Self::on_published_memorials()
            .filter(contribution::Column::Id.in_subquery(liked_ids));
        self.page(base, query, Some(viewer)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::Fixture;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn pages_through_published_contributions() {
        let fx = Fixture::new().await;
        let owner = Uuid::new_v4();
        let memorial = fx.memorial(owner).await;
        for _ in 0..25 {
            fx.published_memory(owner, &memorial).await;
        }
        fx.draft(owner, &memorial, ContributionKind::Memory, None)
            .await;

        let mut query = FeedQuery::new(ContributionKind::Memory);
        let first = fx
            .feed
            .list_published(&memorial.default_slug, &query, None)
            .await
            .unwrap();
        assert_eq!(first.items.len(), 20);
        assert!(first.next_cursor.is_some());
        assert!(first
            .items
            .windows(2)
            .all(|w| (w[0].created_at, w[0].id) > (w[1].created_at, w[1].id)));

        query.cursor = first.next_cursor.clone();
        let second = fx
            .feed
            .list_published(&memorial.default_slug, &query, None)
            .await
            .unwrap();
        assert_eq!(second.items.len(), 5);
        assert!(second.next_cursor.is_none());

        let mut seen: HashSet<Uuid> = first.items.iter().map(|c| c.id).collect();
        seen.extend(second.items.iter().map(|c| c.id));
        assert_eq!(seen.len(), 25);
    }

    #[tokio::test]
    async fn likes_order_breaks_ties_by_id() {
        let fx = Fixture::new().await;
        let owner = Uuid::new_v4();
        let memorial = fx.memorial(owner).await;
        let mut ids = Vec::new();
        for _ in 0..4 {
            ids.push(fx.published_memory(owner, &memorial).await.id);
        }
        fx.likes.like(Uuid::new_v4(), ids[2]).await.unwrap();

        let mut query = FeedQuery::new(ContributionKind::Memory);
        query.sort = SortField::Likes;
        query.page_size = Some(2);

        let mut collected = Vec::new();
        loop {
            let page = fx
                .feed
                .list_published(&memorial.default_slug, &query, Some(owner))
                .await
                .unwrap();
            collected.extend(page.items);
            match page.next_cursor {
                Some(next) => query.cursor = Some(next),
                None => break,
            }
        }

        assert_eq!(collected.len(), 4);
        assert_eq!(collected[0].id, ids[2]);
        let mut tied: Vec<Uuid> = ids.iter().copied().filter(|id| *id != ids[2]).collect();
        tied.sort();
        tied.reverse();
        let rest: Vec<Uuid> = collected[1..].iter().map(|c| c.id).collect();
        assert_eq!(rest, tied);
        assert!(collected.iter().all(|c| c.liked_by_viewer == Some(false)));
    }

    async fn walk(
        fx: &Fixture,
        slug: &str,
        order: SortOrder,
    ) -> Vec<(chrono::DateTime<chrono::Utc>, Uuid)> {
        let mut query = FeedQuery::new(ContributionKind::Memory);
        query.order = order;
        query.page_size = Some(2);
        let mut collected = Vec::new();
        loop {
            let page = fx.feed.list_published(slug, &query, None).await.unwrap();
            collected.extend(page.items.iter().map(|c| (c.created_at, c.id)));
            match page.next_cursor {
                Some(next) => query.cursor = Some(next),
                None => break,
            }
        }
        collected
    }

    #[tokio::test]
    async fn equal_timestamps_page_in_id_order_both_ways() {
        let fx = Fixture::new().await;
        let owner = Uuid::new_v4();
        let memorial = fx.memorial(owner).await;
        let mut rows = Vec::new();
        for _ in 0..7 {
            rows.push(fx.published_memory(owner, &memorial).await);
        }

        let shared = rows[0].created_at;
        let tied: Vec<Uuid> = rows[1..5].iter().map(|c| c.id).collect();
        contribution::Entity::update_many()
            .col_expr(
                contribution::Column::CreatedAt,
                sea_orm::sea_query::Expr::value(shared),
            )
            .filter(contribution::Column::Id.is_in(tied))
            .exec(&*fx.db)
            .await
            .unwrap();

        let mut expected: Vec<_> = rows
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let at = if (1..5).contains(&i) { shared } else { c.created_at };
                (at, c.id)
            })
            .collect();
        expected.sort();

        let ascending = walk(&fx, &memorial.default_slug, SortOrder::Asc).await;
        assert_eq!(ascending, expected);

        expected.reverse();
        let descending = walk(&fx, &memorial.default_slug, SortOrder::Desc).await;
        assert_eq!(descending, expected);

        let unique: HashSet<Uuid> = descending.iter().map(|(_, id)| *id).collect();
        assert_eq!(unique.len(), 7);
    }

    #[tokio::test]
    async fn cursor_from_another_sort_is_rejected() {
        let fx = Fixture::new().await;
        let owner = Uuid::new_v4();
        let memorial = fx.memorial(owner).await;
        for _ in 0..3 {
            fx.published_memory(owner, &memorial).await;
        }
        let mut query = FeedQuery::new(ContributionKind::Memory);
        query.page_size = Some(1);
        let page = fx
            .feed
            .list_published(&memorial.default_slug, &query, None)
            .await
            .unwrap();

        query.cursor = page.next_cursor;
        query.sort = SortField::Likes;
        assert_matches!(
            fx.feed
                .list_published(&memorial.default_slug, &query, None)
                .await,
            Err(ServiceError::InvalidCursor)
        );

        query.cursor = Some("not-a-cursor".into());
        assert_matches!(
            fx.feed
                .list_published(&memorial.default_slug, &query, None)
                .await,
            Err(ServiceError::InvalidCursor)
        );
    }

    #[tokio::test]
    async fn owned_and_liked_views() {
        let fx = Fixture::new().await;
        let owner = Uuid::new_v4();
        let fan = Uuid::new_v4();
        let memorial = fx.memorial(owner).await;
        let liked = fx.published_memory(owner, &memorial).await;
        fx.published_memory(owner, &memorial).await;
        fx.likes.like(fan, liked.id).await.unwrap();

        let query = FeedQuery::new(ContributionKind::Memory);
        let owned = fx.feed.list_owned(owner, &query).await.unwrap();
        assert_eq!(owned.items.len(), 2);

        let liked_page = fx.feed.list_liked(fan, &query).await.unwrap();
        assert_eq!(liked_page.items.len(), 1);
        assert_eq!(liked_page.items[0].id, liked.id);
        assert_eq!(liked_page.items[0].liked_by_viewer, Some(true));

        let condolences = fx
            .feed
            .list_owned(owner, &FeedQuery::new(ContributionKind::Condolence))
            .await
            .unwrap();
        assert!(condolences.items.is_empty());
    }

    #[tokio::test]
    async fn unpublished_memorial_has_no_feed() {
        let fx = Fixture::new().await;
        let created = fx
            .memorials
            .create(
                Uuid::new_v4(),
                crate::services::memorials::CreateMemorialRequest {
                    name: "Hidden".into(),
                    slug: None,
                    premium_slug: None,
                },
            )
            .await
            .unwrap();
        assert_matches!(
            fx.feed
                .list_published(&created.default_slug, &FeedQuery::new(ContributionKind::Memory), None)
                .await,
            Err(ServiceError::NotFound(_))
        );
    }
}
