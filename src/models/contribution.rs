use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::entities::contribution::{self, AssetType, ContributionKind, ContributionStatus};

use super::options::PayableOption;

/// Payload of a new contribution.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateContributionRequest {
    pub kind: ContributionKind,
    #[validate(length(max = 10000, message = "Content must be at most 10000 characters"))]
    pub content: Option<String>,
    pub contribution_date: Option<NaiveDate>,
    #[validate(length(min = 1, max = 512))]
    pub asset_path: Option<String>,
    pub asset_type: Option<AssetType>,
    pub payable_option: Option<PayableOption>,
    #[validate(range(min = 0, max = 10000, message = "Donation count must be between 0 and 10000"))]
    pub donation_count: Option<i32>,
}

/// Owner edit while the contribution is a draft. Also used for previews.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct ContributionPatch {
    #[validate(length(max = 10000, message = "Content must be at most 10000 characters"))]
    pub content: Option<String>,
    pub contribution_date: Option<NaiveDate>,
    #[validate(length(min = 1, max = 512))]
    pub asset_path: Option<String>,
    pub asset_type: Option<AssetType>,
    /// Drops the asset; wins over `asset_path`.
    #[serde(default)]
    pub clear_asset: bool,
    pub payable_option: Option<PayableOption>,
    /// Drops the payable option; wins over `payable_option`.
    #[serde(default)]
    pub clear_payable_option: bool,
    #[validate(range(min = 0, max = 10000, message = "Donation count must be between 0 and 10000"))]
    pub donation_count: Option<i32>,
}

impl ContributionPatch {
    /// Applies the patch to a model in memory.
    pub fn apply(&self, model: &mut contribution::Model) {
        if let Some(content) = &self.content {
            model.content = Some(content.clone());
        }
        if let Some(date) = self.contribution_date {
            model.contribution_date = Some(date);
        }
        if self.clear_asset {
            model.asset_path = None;
            model.asset_type = None;
        } else {
            if let Some(path) = &self.asset_path {
                model.asset_path = Some(path.clone());
            }
            if let Some(asset_type) = self.asset_type {
                model.asset_type = Some(asset_type);
            }
        }
        if self.clear_payable_option {
            model.payable_option = None;
        } else if let Some(option) = self.payable_option {
            model.payable_option = Some(option.key());
        }
        if let Some(count) = self.donation_count {
            model.donation_count = count;
        }
    }
}

/// Contribution as returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributionView {
    pub id: Uuid,
    pub kind: ContributionKind,
    pub memorial_id: Uuid,
    pub owner_id: Uuid,
    pub status: ContributionStatus,
    pub needs_payment: bool,
    pub payable_option: Option<String>,
    pub donation_count: i32,
    pub item_count: Option<i32>,
    pub value_minor: Option<i64>,
    pub content: Option<String>,
    pub contribution_date: Option<NaiveDate>,
    pub asset_path: Option<String>,
    pub asset_type: Option<AssetType>,
    pub total_likes: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub liked_by_viewer: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<contribution::Model> for ContributionView {
    fn from(model: contribution::Model) -> Self {
        Self {
            needs_payment: model.has_pending_checkout(),
            id: model.id,
            kind: model.kind,
            memorial_id: model.memorial_id,
            owner_id: model.owner_id,
            status: model.status,
            payable_option: model.payable_option,
            donation_count: model.donation_count,
            item_count: model.item_count,
            value_minor: model.value_minor,
            content: model.content,
            contribution_date: model.contribution_date,
            asset_path: model.asset_path,
            asset_type: model.asset_type,
            total_likes: model.like_count,
            liked_by_viewer: None,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}
