//! `meta` table: single-row repository-level state (schema version, HEAD branch).

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "meta")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub key: String,
    pub value: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

pub const SCHEMA_VERSION_KEY: &str = "schema_version";
pub const HEAD_BRANCH_KEY: &str = "head_branch";

/// The schema version this binary understands. `MetadataStore::open` refuses to proceed
/// against a newer on-disk schema (§4.B, §7 StateError::SchemaTooNew).
pub const CURRENT_SCHEMA_VERSION: i32 = 1;
