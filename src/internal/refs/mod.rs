//! The ref & branch manager (component F): branch create/switch/delete, HEAD tracking, and tag
//! attachment (§4.F).
//!
//! Branch and tag rows are mutable namespace entries; their writes use the same transaction
//! discipline as ingest (§4.B) even though each call here is a single multi-row write, so a
//! failure partway through (e.g. inserting a branch row after validating the name is free)
//! can't leave a half-created branch.

use sea_orm::TransactionTrait;
use tracing::info;
use uuid::Uuid;

use crate::errors::{ChronologError, Result};
use crate::internal::metadata::MetadataStore;
use crate::internal::metadata::entities::{branch, tag};
use crate::utils::now_millis;

/// Validate a branch/tag name: non-empty, no path separators or whitespace (§7
/// `UserInputError::InvalidName`).
fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ChronologError::InvalidName(name.to_string(), format!("{kind} name must not be empty")));
    }
    if name.contains(['/', '\\']) || name.chars().any(char::is_whitespace) {
        return Err(ChronologError::InvalidName(
            name.to_string(),
            format!("{kind} name must not contain path separators or whitespace"),
        ));
    }
    Ok(())
}

/// Create the repository's first branch (normally `"main"`) with no parent, used only by
/// `Repository::init` (§4.F, §6 `init`).
pub async fn create_root_branch(metadata: &MetadataStore, name: &str) -> Result<branch::Model> {
    validate_name("branch", name)?;
    let branch_id = Uuid::new_v4().to_string();
    let row = branch::Model {
        branch_id: branch_id.clone(),
        name: name.to_string(),
        parent_branch_id: None,
        created_at: now_millis(),
    };
    let tx = metadata.begin().await?;
    metadata.insert_branch(&tx, row.clone()).await?;
    metadata.set_head_branch_tx(&tx, &branch_id).await?;
    tx.commit().await?;
    info!(%name, %branch_id, "created root branch");
    Ok(row)
}

/// `branch_create(name, from)` (§4.F): creates a new branch whose `FileHead`s start out
/// pointing at the source branch's current tips. Per the design note in §4.F, the working tree
/// is *not* rewritten — new ingests on the new branch simply read their own (initially absent)
/// `FileHead`s, so no `file_heads` rows need copying at creation time; the new branch starts
/// empty and only gains heads as files are saved on it.
pub async fn branch_create(metadata: &MetadataStore, name: &str, from_branch_id: &str) -> Result<branch::Model> {
    validate_name("branch", name)?;
    if metadata.branch_by_name(name).await?.is_some() {
        return Err(ChronologError::Exists(name.to_string()));
    }
    if metadata.branch_by_id(from_branch_id).await?.is_none() {
        return Err(ChronologError::Missing(from_branch_id.to_string()));
    }
    let branch_id = Uuid::new_v4().to_string();
    let row = branch::Model {
        branch_id: branch_id.clone(),
        name: name.to_string(),
        parent_branch_id: Some(from_branch_id.to_string()),
        created_at: now_millis(),
    };
    let tx = metadata.begin().await?;
    metadata.insert_branch(&tx, row.clone()).await?;
    tx.commit().await?;
    info!(%name, %branch_id, parent = %from_branch_id, "created branch");
    Ok(row)
}

/// `branch_switch(name)` (§4.F): atomically updates HEAD. The working tree is left untouched —
/// synchronization is an explicit caller operation, not an implicit side effect.
pub async fn branch_switch(metadata: &MetadataStore, name: &str) -> Result<branch::Model> {
    let branch = metadata
        .branch_by_name(name)
        .await?
        .ok_or_else(|| ChronologError::Missing(name.to_string()))?;
    metadata.set_head_branch(&branch.branch_id).await?;
    info!(%name, "switched HEAD");
    Ok(branch)
}

/// `branch_delete(name)` (§4.F): fails if `name` is the current HEAD branch. Versions created
/// on the branch remain in the store; only the name-to-id mapping is removed.
pub async fn branch_delete(metadata: &MetadataStore, name: &str) -> Result<()> {
    let branch = metadata
        .branch_by_name(name)
        .await?
        .ok_or_else(|| ChronologError::Missing(name.to_string()))?;
    if let Some(head_id) = metadata.head_branch().await? {
        if head_id == branch.branch_id {
            return Err(ChronologError::IsHead(name.to_string()));
        }
    }
    metadata.delete_branch(&branch.branch_id).await?;
    info!(%name, "deleted branch");
    Ok(())
}

pub async fn branch_list(metadata: &MetadataStore) -> Result<Vec<branch::Model>> {
    metadata.list_branches().await
}

/// `tag_create(name, version_hash, description?)` (§4.F): `version_hash` may be an
/// unambiguous short hash (resolved by the caller before invoking this, since resolution needs
/// the same prefix-lookup machinery `show` uses).
pub async fn tag_create(
    metadata: &MetadataStore,
    name: &str,
    version_hash: &str,
    description: Option<String>,
) -> Result<tag::Model> {
    validate_name("tag", name)?;
    if metadata.tag_by_name(name).await?.is_some() {
        return Err(ChronologError::Exists(name.to_string()));
    }
    let row = tag::Model {
        tag_name: name.to_string(),
        version_hash: version_hash.to_string(),
        created_at: now_millis(),
        description,
    };
    metadata.insert_tag(row.clone()).await?;
    info!(%name, %version_hash, "created tag");
    Ok(row)
}

/// `tag_delete(name)` (§4.F): a tag is a weak reference; deleting it never deletes its version
/// (§3 Tag entity).
pub async fn tag_delete(metadata: &MetadataStore, name: &str) -> Result<()> {
    if metadata.tag_by_name(name).await?.is_none() {
        return Err(ChronologError::Missing(name.to_string()));
    }
    metadata.delete_tag(name).await?;
    info!(%name, "deleted tag");
    Ok(())
}

pub async fn tag_list(metadata: &MetadataStore) -> Result<Vec<tag::Model>> {
    metadata.list_tags().await
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> MetadataStore {
        MetadataStore::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn create_root_branch_becomes_head() {
        let metadata = store().await;
        let main = create_root_branch(&metadata, "main").await.unwrap();
        assert_eq!(metadata.head_branch().await.unwrap(), Some(main.branch_id));
    }

    #[tokio::test]
    async fn branch_create_duplicate_name_errors() {
        let metadata = store().await;
        let main = create_root_branch(&metadata, "main").await.unwrap();
        branch_create(&metadata, "feature", &main.branch_id).await.unwrap();
        let err = branch_create(&metadata, "feature", &main.branch_id).await.unwrap_err();
        assert!(matches!(err, ChronologError::Exists(_)));
    }

    #[tokio::test]
    async fn branch_delete_head_is_refused() {
        let metadata = store().await;
        let main = create_root_branch(&metadata, "main").await.unwrap();
        let err = branch_delete(&metadata, &main.name).await.unwrap_err();
        assert!(matches!(err, ChronologError::IsHead(_)));
    }

    #[tokio::test]
    async fn branch_switch_updates_head_without_deleting_branch() {
        let metadata = store().await;
        let main = create_root_branch(&metadata, "main").await.unwrap();
        let feature = branch_create(&metadata, "feature", &main.branch_id).await.unwrap();
        branch_switch(&metadata, "feature").await.unwrap();
        assert_eq!(metadata.head_branch().await.unwrap(), Some(feature.branch_id));
        branch_delete(&metadata, "main").await.unwrap();
        assert!(metadata.branch_by_name("main").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tag_lifecycle() {
        let metadata = store().await;
        tag_create(&metadata, "v1", "deadbeef", Some("first".to_string())).await.unwrap();
        assert!(tag_create(&metadata, "v1", "deadbeef", None).await.is_err());
        tag_delete(&metadata, "v1").await.unwrap();
        assert!(tag_delete(&metadata, "v1").await.is_err());
    }

    #[tokio::test]
    async fn invalid_names_are_rejected() {
        let metadata = store().await;
        let err = create_root_branch(&metadata, "bad/name").await.unwrap_err();
        assert!(matches!(err, ChronologError::InvalidName(_, _)));
    }
}
