use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Course entity for the catalog. Read-only to the fulfillment pipeline;
/// the CMS editor owns writes.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "courses")]
pub struct Model {
    /// Catalog identifier (slug-like, e.g. "react-fundamentals")
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub title: String,
    #[sea_orm(column_type = "Text")]
    pub description: String,
    pub image: Option<String>,
    /// List price, in major currency units
    pub price: Decimal,
    /// Loyalty price; treated as disabled unless strictly below `price`
    pub discounted_price: Option<Decimal>,
    /// Lesson collection, owned by the CMS editor
    #[sea_orm(column_type = "Json")]
    pub lessons: Json,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::purchase::Entity")]
    Purchases,
}

impl Related<super::purchase::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Purchases.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
