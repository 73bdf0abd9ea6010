use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum NotificationKind {
    #[sea_orm(string_value = "memory-report")]
    MemoryReport,
    #[sea_orm(string_value = "condolence-report")]
    CondolenceReport,
    #[sea_orm(string_value = "donation-report")]
    DonationReport,
    #[sea_orm(string_value = "memorial-report")]
    MemorialReport,
    #[sea_orm(string_value = "memory-request")]
    MemoryRequest,
    #[sea_orm(string_value = "condolence-request")]
    CondolenceRequest,
    #[sea_orm(string_value = "donation-request")]
    DonationRequest,
    #[sea_orm(string_value = "memory-approved")]
    MemoryApproved,
    #[sea_orm(string_value = "condolence-approved")]
    CondolenceApproved,
    #[sea_orm(string_value = "donation-approved")]
    DonationApproved,
    #[sea_orm(string_value = "memory-rejected")]
    MemoryRejected,
    #[sea_orm(string_value = "condolence-rejected")]
    CondolenceRejected,
    #[sea_orm(string_value = "donation-rejected")]
    DonationRejected,
    #[sea_orm(string_value = "report-resolved")]
    ReportResolved,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "notifications")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    pub actor_id: Uuid,
    pub reference_id: Uuid,
    pub kind: NotificationKind,
    pub redirect_url: Option<String>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
