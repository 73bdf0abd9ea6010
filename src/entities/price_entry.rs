use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One row per payable option. `is_free` is the explicit free sentinel;
/// `price_minor = NULL` without it means the price was never configured.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "price_entries")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub option_key: String,
    pub price_minor: Option<i64>,
    pub is_free: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
