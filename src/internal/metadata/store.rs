//! The metadata store (component B): a single embedded SQLite database accessed through
//! `sea-orm`, opened with WAL journaling and synchronous writes as required by §4.B.
//!
//! All multi-row writes performed by ingest (§4.E) and the ref/branch manager (§4.F) run
//! inside a single `sea_orm` transaction, which is the atomicity boundary the design calls
//! for. Reader operations (log/show/diff/search) run against the same connection pool without
//! taking the write lock beyond individual statement boundaries, matching sqlite's MVCC-ish
//! WAL readers.

use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectionTrait, Database, DatabaseConnection,
    DatabaseTransaction, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Schema,
    TransactionTrait,
};
use tracing::info;

use crate::errors::{ChronologError, Result};
use crate::internal::metadata::entities::{
    branch, file_head, ignore_rule, meta, search_term, tag, version,
};

/// Handle to the repository's metadata store.
pub struct MetadataStore {
    db: DatabaseConnection,
}

impl MetadataStore {
    /// Open (creating if necessary) the SQLite database at `db_path`, running forward
    /// migrations and verifying the schema version (§4.B).
    pub async fn open(db_path: &std::path::Path) -> Result<MetadataStore> {
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        let db = Database::connect(url).await?;
        db.execute_unprepared("PRAGMA journal_mode = WAL;").await?;
        db.execute_unprepared("PRAGMA synchronous = FULL;").await?;
        let store = MetadataStore { db };
        store.run_migrations().await?;
        Ok(store)
    }

    /// In-memory store, used by tests that don't need a working tree on disk.
    pub async fn open_in_memory() -> Result<MetadataStore> {
        let db = Database::connect("sqlite::memory:").await?;
        let store = MetadataStore { db };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        let backend = self.db.get_database_backend();
        let schema = Schema::new(backend);

        for stmt in [
            schema.create_table_from_entity(meta::Entity).if_not_exists().to_owned(),
        ] {
            self.db.execute(backend.build(&stmt)).await?;
        }
        self.db
            .execute(backend.build(schema.create_table_from_entity(version::Entity).if_not_exists()))
            .await?;
        self.db
            .execute(backend.build(schema.create_table_from_entity(file_head::Entity).if_not_exists()))
            .await?;
        self.db
            .execute(backend.build(schema.create_table_from_entity(branch::Entity).if_not_exists()))
            .await?;
        self.db
            .execute(backend.build(schema.create_table_from_entity(tag::Entity).if_not_exists()))
            .await?;
        self.db
            .execute(backend.build(schema.create_table_from_entity(search_term::Entity).if_not_exists()))
            .await?;
        self.db
            .execute(backend.build(schema.create_table_from_entity(ignore_rule::Entity).if_not_exists()))
            .await?;

        self.db
            .execute_unprepared(
                "CREATE INDEX IF NOT EXISTS idx_versions_path_branch_ts \
                 ON versions(file_path, branch_id, timestamp DESC);",
            )
            .await?;
        self.db
            .execute_unprepared("CREATE INDEX IF NOT EXISTS idx_versions_blob_hash ON versions(blob_hash);")
            .await?;
        self.db
            .execute_unprepared(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_file_heads_path_branch \
                 ON file_heads(file_path, branch_id);",
            )
            .await?;
        self.db
            .execute_unprepared("CREATE UNIQUE INDEX IF NOT EXISTS idx_branches_name ON branches(name);")
            .await?;
        self.db
            .execute_unprepared("CREATE INDEX IF NOT EXISTS idx_search_terms_token ON search_terms(token);")
            .await?;

        self.verify_or_init_schema_version().await?;
        info!("metadata store migrations applied");
        Ok(())
    }

    async fn verify_or_init_schema_version(&self) -> Result<()> {
        match meta::Entity::find_by_id(meta::SCHEMA_VERSION_KEY.to_string())
            .one(&self.db)
            .await?
        {
            None => {
                let row = meta::ActiveModel {
                    key: Set(meta::SCHEMA_VERSION_KEY.to_string()),
                    value: Set(meta::CURRENT_SCHEMA_VERSION.to_string()),
                };
                meta::Entity::insert(row).exec(&self.db).await?;
                Ok(())
            }
            Some(row) => {
                let found: i32 = row.value.parse().unwrap_or(0);
                if found > meta::CURRENT_SCHEMA_VERSION {
                    Err(ChronologError::SchemaTooNew {
                        found,
                        supported: meta::CURRENT_SCHEMA_VERSION,
                    })
                } else {
                    Ok(())
                }
            }
        }
    }

    pub async fn head_branch(&self) -> Result<Option<String>> {
        Ok(meta::Entity::find_by_id(meta::HEAD_BRANCH_KEY.to_string())
            .one(&self.db)
            .await?
            .map(|m| m.value))
    }

    pub async fn set_head_branch(&self, branch_id: &str) -> Result<()> {
        self.set_head_branch_tx(&self.db, branch_id).await
    }

    pub(crate) async fn set_head_branch_tx(
        &self,
        conn: &impl ConnectionTrait,
        branch_id: &str,
    ) -> Result<()> {
        let existing = meta::Entity::find_by_id(meta::HEAD_BRANCH_KEY.to_string())
            .one(conn)
            .await?;
        match existing {
            Some(row) => {
                let mut am: meta::ActiveModel = row.into();
                am.value = Set(branch_id.to_string());
                meta::Entity::update(am).exec(conn).await?;
            }
            None => {
                let am = meta::ActiveModel {
                    key: Set(meta::HEAD_BRANCH_KEY.to_string()),
                    value: Set(branch_id.to_string()),
                };
                meta::Entity::insert(am).exec(conn).await?;
            }
        }
        Ok(())
    }

    /// Begin a transaction. Callers (ingest, ref manager) commit or roll back explicitly so a
    /// failure partway through aborts the whole multi-row write (§4.B, §4.E, §7).
    pub async fn begin(&self) -> Result<DatabaseTransaction> {
        Ok(self.db.begin().await?)
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    // --- FileHead reads/writes ---

    pub async fn file_head(
        &self,
        conn: &impl ConnectionTrait,
        file_path: &str,
        branch_id: &str,
    ) -> Result<Option<file_head::Model>> {
        Ok(file_head::Entity::find()
            .filter(file_head::Column::FilePath.eq(file_path))
            .filter(file_head::Column::BranchId.eq(branch_id))
            .one(conn)
            .await?)
    }

    pub async fn upsert_file_head(
        &self,
        conn: &impl ConnectionTrait,
        file_path: &str,
        branch_id: &str,
        version_hash: &str,
    ) -> Result<()> {
        match self.file_head(conn, file_path, branch_id).await? {
            Some(existing) => {
                let mut am: file_head::ActiveModel = existing.into();
                am.version_hash = Set(version_hash.to_string());
                file_head::Entity::update(am).exec(conn).await?;
            }
            None => {
                let am = file_head::ActiveModel {
                    id: sea_orm::ActiveValue::NotSet,
                    file_path: Set(file_path.to_string()),
                    branch_id: Set(branch_id.to_string()),
                    version_hash: Set(version_hash.to_string()),
                };
                file_head::Entity::insert(am).exec(conn).await?;
            }
        }
        Ok(())
    }

    // --- Version reads/writes ---

    pub async fn insert_version(
        &self,
        conn: &impl ConnectionTrait,
        row: version::Model,
    ) -> Result<()> {
        let am = version::ActiveModel {
            version_hash: Set(row.version_hash),
            file_path: Set(row.file_path),
            blob_hash: Set(row.blob_hash),
            timestamp: Set(row.timestamp),
            parent_version_hash: Set(row.parent_version_hash),
            branch_id: Set(row.branch_id),
            annotation: Set(row.annotation),
        };
        version::Entity::insert(am).exec(conn).await?;
        Ok(())
    }

    pub async fn version_by_hash(&self, version_hash: &str) -> Result<Option<version::Model>> {
        Ok(version::Entity::find_by_id(version_hash.to_string())
            .one(&self.db)
            .await?)
    }

    /// Resolve a (possibly abbreviated, minimum 4 hex chars) hash prefix against both version
    /// hashes and blob hashes, per §4.G `show`.
    pub async fn resolve_version_prefix(&self, prefix: &str) -> Result<version::Model> {
        if prefix.len() < crate::hash::MIN_SHORT_HASH_LEN {
            return Err(ChronologError::InvalidPattern(
                prefix.to_string(),
                format!("prefix must be at least {} characters", crate::hash::MIN_SHORT_HASH_LEN),
            ));
        }
        let lower = prefix.to_ascii_lowercase();
        let pattern = format!("{lower}%");
        let matches = version::Entity::find()
            .filter(version::Column::VersionHash.like(&pattern))
            .all(&self.db)
            .await?;
        match matches.len() {
            0 => Err(ChronologError::HashUnknown(prefix.to_string())),
            1 => Ok(matches.into_iter().next().unwrap()),
            _ => Err(ChronologError::HashAmbiguous(prefix.to_string())),
        }
    }

    pub async fn log(
        &self,
        file_path: &str,
        branch_id: &str,
        limit: Option<u64>,
    ) -> Result<Vec<version::Model>> {
        let mut query = version::Entity::find()
            .filter(version::Column::FilePath.eq(file_path))
            .filter(version::Column::BranchId.eq(branch_id))
            .order_by_desc(version::Column::Timestamp);
        if let Some(limit) = limit {
            query = query.limit(limit);
        }
        Ok(query.all(&self.db).await?)
    }

    pub async fn versions_referencing_blob(&self, blob_hash: &str) -> Result<u64> {
        Ok(version::Entity::find()
            .filter(version::Column::BlobHash.eq(blob_hash))
            .count(&self.db)
            .await?)
    }

    pub async fn all_versions_in_order(&self) -> Result<Vec<version::Model>> {
        Ok(version::Entity::find()
            .order_by_asc(version::Column::Timestamp)
            .all(&self.db)
            .await?)
    }

    pub async fn distinct_blob_hashes(&self) -> Result<std::collections::HashSet<String>> {
        let versions = version::Entity::find().all(&self.db).await?;
        Ok(versions.into_iter().map(|v| v.blob_hash).collect())
    }

    // --- Branch reads/writes ---

    pub async fn branch_by_name(&self, name: &str) -> Result<Option<branch::Model>> {
        Ok(branch::Entity::find()
            .filter(branch::Column::Name.eq(name))
            .one(&self.db)
            .await?)
    }

    pub async fn branch_by_id(&self, branch_id: &str) -> Result<Option<branch::Model>> {
        Ok(branch::Entity::find_by_id(branch_id.to_string())
            .one(&self.db)
            .await?)
    }

    pub async fn insert_branch(&self, conn: &impl ConnectionTrait, row: branch::Model) -> Result<()> {
        let am = branch::ActiveModel {
            branch_id: Set(row.branch_id),
            name: Set(row.name),
            parent_branch_id: Set(row.parent_branch_id),
            created_at: Set(row.created_at),
        };
        branch::Entity::insert(am).exec(conn).await?;
        Ok(())
    }

    pub async fn delete_branch(&self, branch_id: &str) -> Result<()> {
        branch::Entity::delete_by_id(branch_id.to_string())
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn list_branches(&self) -> Result<Vec<branch::Model>> {
        Ok(branch::Entity::find().all(&self.db).await?)
    }

    // --- Tag reads/writes ---

    pub async fn tag_by_name(&self, name: &str) -> Result<Option<tag::Model>> {
        Ok(tag::Entity::find_by_id(name.to_string()).one(&self.db).await?)
    }

    pub async fn insert_tag(&self, row: tag::Model) -> Result<()> {
        let am = tag::ActiveModel {
            tag_name: Set(row.tag_name),
            version_hash: Set(row.version_hash),
            created_at: Set(row.created_at),
            description: Set(row.description),
        };
        tag::Entity::insert(am).exec(&self.db).await?;
        Ok(())
    }

    pub async fn delete_tag(&self, name: &str) -> Result<()> {
        tag::Entity::delete_by_id(name.to_string()).exec(&self.db).await?;
        Ok(())
    }

    pub async fn list_tags(&self) -> Result<Vec<tag::Model>> {
        Ok(tag::Entity::find().all(&self.db).await?)
    }

    // --- Search terms ---

    pub async fn remove_search_terms_for_version(
        &self,
        conn: &impl ConnectionTrait,
        version_hash: &str,
    ) -> Result<()> {
        search_term::Entity::delete_many()
            .filter(search_term::Column::VersionHash.eq(version_hash))
            .exec(conn)
            .await?;
        Ok(())
    }

    pub async fn insert_search_terms(
        &self,
        conn: &impl ConnectionTrait,
        rows: Vec<search_term::Model>,
    ) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let models = rows.into_iter().map(|r| search_term::ActiveModel {
            id: sea_orm::ActiveValue::NotSet,
            version_hash: Set(r.version_hash),
            file_path: Set(r.file_path),
            token: Set(r.token),
            positions: Set(r.positions),
        });
        search_term::Entity::insert_many(models).exec(conn).await?;
        Ok(())
    }

    pub async fn drop_all_search_terms(&self) -> Result<()> {
        search_term::Entity::delete_many().exec(&self.db).await?;
        Ok(())
    }

    pub async fn search_term_count(&self) -> Result<u64> {
        Ok(search_term::Entity::find().count(&self.db).await?)
    }

    pub async fn all_search_terms(&self) -> Result<Vec<search_term::Model>> {
        Ok(search_term::Entity::find().all(&self.db).await?)
    }

    // --- Ignore rule snapshot ---

    pub async fn replace_ignore_snapshot(&self, patterns: &[String], now_millis: i64) -> Result<()> {
        let tx = self.db.begin().await?;
        ignore_rule::Entity::delete_many().exec(&tx).await?;
        let models = patterns.iter().enumerate().map(|(i, p)| ignore_rule::ActiveModel {
            id: sea_orm::ActiveValue::NotSet,
            ordinal: Set(i as i32),
            pattern: Set(p.clone()),
            recorded_at: Set(now_millis),
        });
        if patterns.is_empty() {
            tx.commit().await?;
            return Ok(());
        }
        ignore_rule::Entity::insert_many(models).exec(&tx).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn ignore_snapshot(&self) -> Result<Vec<String>> {
        let mut rows = ignore_rule::Entity::find().all(&self.db).await?;
        rows.sort_by_key(|r| r.ordinal);
        Ok(rows.into_iter().map(|r| r.pattern).collect())
    }
}
