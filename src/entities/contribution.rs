use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// The three contribution variants sharing one lifecycle.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ContributionKind {
    #[sea_orm(string_value = "memory")]
    Memory,
    #[sea_orm(string_value = "condolence")]
    Condolence,
    #[sea_orm(string_value = "donation")]
    Donation,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ContributionStatus {
    #[sea_orm(string_value = "draft")]
    Draft,
    #[sea_orm(string_value = "in-review")]
    InReview,
    #[sea_orm(string_value = "published")]
    Published,
    #[sea_orm(string_value = "rejected")]
    Rejected,
    #[sea_orm(string_value = "removed")]
    Removed,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum AssetType {
    #[sea_orm(string_value = "image")]
    Image,
    #[sea_orm(string_value = "video")]
    Video,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "contributions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub kind: ContributionKind,
    pub memorial_id: Uuid,
    pub owner_id: Uuid,
    pub status: ContributionStatus,
    /// `family:value`, also the price catalog key.
    pub payable_option: Option<String>,
    pub donation_count: i32,
    pub item_count: Option<i32>,
    pub value_minor: Option<i64>,
    #[sea_orm(column_type = "Text", nullable)]
    pub content: Option<String>,
    pub contribution_date: Option<NaiveDate>,
    pub asset_path: Option<String>,
    pub asset_type: Option<AssetType>,
    pub checkout_session_id: Option<String>,
    pub checkout_session_created_at: Option<DateTime<Utc>>,
    pub like_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::memorial::Entity",
        from = "Column::MemorialId",
        to = "super::memorial::Column::Id",
        on_delete = "Cascade"
    )]
    Memorial,
    #[sea_orm(has_many = "super::contribution_like::Entity")]
    Likes,
}

impl Related<super::memorial::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Memorial.def()
    }
}

impl Related<super::contribution_like::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Likes.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_published(&self) -> bool {
        self.status == ContributionStatus::Published
    }

    /// A checkout session is waiting for payment.
    pub fn has_pending_checkout(&self) -> bool {
        self.status == ContributionStatus::Draft && self.checkout_session_id.is_some()
    }

    pub fn has_asset(&self) -> bool {
        self.asset_path.is_some()
    }
}
