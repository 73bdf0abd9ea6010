use chrono::{SubsecRound, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait,
    QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::db::is_unique_violation;
use crate::entities::memorial::{self, MemorialStatus};
use crate::errors::ServiceError;

fn validate_slug(slug: &str) -> Result<(), ValidationError> {
    let well_formed = (3..=64).contains(&slug.len())
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !slug.starts_with('-')
        && !slug.ends_with('-');
    if well_formed {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_slug"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateMemorialRequest {
    #[validate(length(min = 1, max = 200, message = "Name must be between 1 and 200 characters"))]
    pub name: String,
    #[validate(custom = "validate_slug")]
    pub slug: Option<String>,
    #[validate(custom = "validate_slug")]
    pub premium_slug: Option<String>,
}

/// Lowercase ascii slug derived from a display name.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let trimmed = slug.trim_end_matches('-');
    trimmed.chars().take(48).collect::<String>().trim_end_matches('-').to_string()
}

/// Looks a memorial up by either of its slugs.
pub(crate) async fn find_by_slug<C: ConnectionTrait>(
    conn: &C,
    slug: &str,
) -> Result<Option<memorial::Model>, ServiceError> {
    Ok(memorial::Entity::find()
        .filter(
            Condition::any()
                .add(memorial::Column::PremiumSlug.eq(slug))
                .add(memorial::Column::DefaultSlug.eq(slug)),
        )
        .one(conn)
        .await?)
}

pub(crate) async fn find_required<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
) -> Result<memorial::Model, ServiceError> {
    memorial::Entity::find_by_id(id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Memorial {} not found", id)))
}

/// Minimal memorial management so contributions have a home.
#[derive(Clone)]
pub struct MemorialService {
    db: Arc<DatabaseConnection>,
}

impl MemorialService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create(
        &self,
        owner_id: Uuid,
        request: CreateMemorialRequest,
    ) -> Result<memorial::Model, ServiceError> {
        request.validate()?;

        let id = Uuid::new_v4();
        let default_slug = match request.slug {
            Some(slug) => slug,
            None => {
                let base = slugify(&request.name);
                let suffix = &id.simple().to_string()[..8];
                if base.is_empty() {
                    format!("memorial-{}", suffix)
                } else {
                    format!("{}-{}", base, suffix)
                }
            }
        };

        let model = memorial::ActiveModel {
            id: Set(id),
            owner_id: Set(owner_id),
            default_slug: Set(default_slug),
            premium_slug: Set(request.premium_slug),
            name: Set(request.name),
            status: Set(MemorialStatus::Draft),
            created_at: Set(Utc::now().trunc_subsecs(6)),
        };

        let created = model.insert(&*self.db).await.map_err(|e| {
            if is_unique_violation(&e) {
                ServiceError::InvalidInput("Slug is already taken".to_string())
            } else {
                ServiceError::DatabaseError(e)
            }
        })?;

        info!(memorial_id = %created.id, slug = %created.default_slug, "memorial created");
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn publish(&self, owner_id: Uuid, id: Uuid) -> Result<memorial::Model, ServiceError> {
        let existing = find_required(&*self.db, id).await?;
        if existing.owner_id != owner_id {
            return Err(ServiceError::Unauthorized(
                "Only the memorial owner can publish it".to_string(),
            ));
        }
        match existing.status {
            MemorialStatus::Published => Ok(existing),
            MemorialStatus::Removed => Err(ServiceError::InvalidState(format!(
                "Memorial {} has been removed",
                id
            ))),
            MemorialStatus::Draft => {
                let mut active: memorial::ActiveModel = existing.into();
                active.status = Set(MemorialStatus::Published);
                let updated = active.update(&*self.db).await?;
                info!(memorial_id = %id, "memorial published");
                Ok(updated)
            }
        }
    }

    pub async fn get_by_slug(&self, slug: &str) -> Result<memorial::Model, ServiceError> {
        find_by_slug(&*self.db, slug)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Memorial '{}' not found", slug)))
    }
}
