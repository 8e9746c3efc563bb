//! `search_terms` table: derived full-text index rows (§3 SearchTerm entity, component H).
//!
//! Reproducible from `versions` + blob content via `reindex_all`; never a source of truth.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "search_terms")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = true)]
    pub id: i64,
    #[sea_orm(indexed)]
    pub version_hash: String,
    pub file_path: String,
    #[sea_orm(indexed)]
    pub token: String,
    /// Comma-separated byte or token positions, used for phrase/boundary queries.
    pub positions: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
