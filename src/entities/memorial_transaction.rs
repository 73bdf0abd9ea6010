use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::contribution::ContributionKind;

/// Record of a confirmed payment, keyed by the gateway session id.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "memorial_transactions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub payment_id: String,
    pub memorial_id: Uuid,
    pub user_id: Uuid,
    pub contribution_id: Uuid,
    pub kind: ContributionKind,
    pub value_minor: i64,
    pub created_at: DateTime<Utc>,
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
