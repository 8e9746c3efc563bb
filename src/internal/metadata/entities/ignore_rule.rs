//! `ignore_rules_snapshot` table: last-compiled ignore pattern lines (§0.1 supplement).
//!
//! Persisted every time the runtime ignore filter is swapped so `reindex_all` and offline
//! tooling can reconstruct the filter without re-reading `.chronologignore` from the working
//! tree.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "ignore_rules_snapshot")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = true)]
    pub id: i64,
    /// Position in the ordered pattern list; later rules override earlier ones.
    pub ordinal: i32,
    pub pattern: String,
    pub recorded_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
