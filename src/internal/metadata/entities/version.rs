//! `versions` table: one append-only row per recorded save event (§3 Version entity).

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "versions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub version_hash: String,
    #[sea_orm(indexed)]
    pub file_path: String,
    #[sea_orm(indexed)]
    pub blob_hash: String,
    pub timestamp: i64,
    pub parent_version_hash: Option<String>,
    #[sea_orm(indexed)]
    pub branch_id: String,
    pub annotation: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
