use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

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
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum FlagType {
    #[sea_orm(string_value = "memory-request")]
    MemoryRequest,
    #[sea_orm(string_value = "condolence-request")]
    CondolenceRequest,
    #[sea_orm(string_value = "donation-request")]
    DonationRequest,
    #[sea_orm(string_value = "memory-report")]
    MemoryReport,
    #[sea_orm(string_value = "condolence-report")]
    CondolenceReport,
    #[sea_orm(string_value = "donation-report")]
    DonationReport,
    #[sea_orm(string_value = "memorial-report")]
    MemorialReport,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum FlagStatus {
    #[sea_orm(string_value = "open")]
    Open,
    #[sea_orm(string_value = "approved")]
    Approved,
    #[sea_orm(string_value = "rejected")]
    Rejected,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum FlagReason {
    #[sea_orm(string_value = "dislike")]
    Dislike,
    #[sea_orm(string_value = "bullying")]
    Bullying,
    #[sea_orm(string_value = "harmful")]
    Harmful,
    #[sea_orm(string_value = "violence")]
    Violence,
    #[sea_orm(string_value = "promoting")]
    Promoting,
    #[sea_orm(string_value = "explicit")]
    Explicit,
    #[sea_orm(string_value = "scam")]
    Scam,
    #[sea_orm(string_value = "false-info")]
    FalseInfo,
    #[sea_orm(string_value = "copyright")]
    Copyright,
    #[sea_orm(string_value = "illegal")]
    Illegal,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "memorial_flags")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub memorial_id: Uuid,
    pub flag_type: FlagType,
    /// Flagged contribution, or the memorial itself for memorial reports.
    pub reference_id: Uuid,
    pub actor_id: Uuid,
    /// Addressee; `None` means only admins resolve it.
    pub user_id: Option<Uuid>,
    pub status: FlagStatus,
    pub reason: Option<FlagReason>,
    pub created_at: DateTime<Utc>,
    pub status_updated_at: Option<DateTime<Utc>>,
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
}

impl Related<super::memorial::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Memorial.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
