//! Merge-importer: reconciles an incoming snapshot against the live database.
//!
//! The policy is a union-merge keyed by uuid and it is deliberately additive:
//! a record whose uuid already exists locally is skipped untouched (the live
//! row wins, no field updates), and a live record absent from the backup is
//! never deleted. Importing the same document twice therefore adds nothing
//! on the second run.
//!
//! The entire eight-collection merge runs inside one transaction, so a
//! failure partway through rolls back to the exact pre-import state.

use serde::Serialize;
use sqlx::{Pool, Sqlite};
use thiserror::Error;
use tracing::info;

use crate::model::BackupDocument;
use crate::store;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("database error while merging {collection}: {source}")]
    Collection {
        collection: &'static str,
        #[source]
        source: sqlx::Error,
    },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Newly inserted record counts, one per collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResult {
    pub categories: u64,
    pub pantry_items: u64,
    pub recipes: u64,
    pub recipe_pantry_refs: u64,
    pub shopping_lists: u64,
    pub shopping_list_items: u64,
    pub recipe_selections: u64,
    pub undo_actions: u64,
}

impl MergeResult {
    pub fn total(&self) -> u64 {
        self.categories
            + self.pantry_items
            + self.recipes
            + self.recipe_pantry_refs
            + self.shopping_lists
            + self.shopping_list_items
            + self.recipe_selections
            + self.undo_actions
    }

    /// Per-collection breakdown for the user-facing import summary.
    pub fn describe(&self) -> String {
        format!(
            "categories +{}, pantry items +{}, recipes +{}, ingredient links +{}, \
             shopping lists +{}, list items +{}, recipe selections +{}, undo actions +{}",
            self.categories,
            self.pantry_items,
            self.recipes,
            self.recipe_pantry_refs,
            self.shopping_lists,
            self.shopping_list_items,
            self.recipe_selections,
            self.undo_actions,
        )
    }
}

/// Insert every record of `document` whose uuid is not already present,
/// parents before children: categories, pantry items and recipes first, then
/// cross-refs, then shopping lists before their items, selections and undo
/// actions. Returns the per-collection added counts.
pub async fn import_document(
    pool: &Pool<Sqlite>,
    document: &BackupDocument,
) -> Result<MergeResult, MergeError> {
    let mut tx = pool.begin().await?;
    let mut result = MergeResult::default();

    {
        let conn = tx.as_mut();

        let existing = store::existing_uuids(conn, "categories")
            .await
            .map_err(|source| MergeError::Collection { collection: "categories", source })?;
        for record in document
            .categories
            .iter()
            .filter(|r| !existing.contains(&r.uuid))
        {
            store::insert_category(conn, record)
                .await
                .map_err(|source| MergeError::Collection { collection: "categories", source })?;
            result.categories += 1;
        }

        let existing = store::existing_uuids(conn, "pantry_items")
            .await
            .map_err(|source| MergeError::Collection { collection: "pantry_items", source })?;
        for record in document
            .pantry_items
            .iter()
            .filter(|r| !existing.contains(&r.uuid))
        {
            store::insert_pantry_item(conn, record)
                .await
                .map_err(|source| MergeError::Collection { collection: "pantry_items", source })?;
            result.pantry_items += 1;
        }

        let existing = store::existing_uuids(conn, "recipes")
            .await
            .map_err(|source| MergeError::Collection { collection: "recipes", source })?;
        for record in document
            .recipes
            .iter()
            .filter(|r| !existing.contains(&r.uuid))
        {
            store::insert_recipe(conn, record)
                .await
                .map_err(|source| MergeError::Collection { collection: "recipes", source })?;
            result.recipes += 1;
        }

        let existing = store::existing_uuids(conn, "recipe_pantry_refs")
            .await
            .map_err(|source| MergeError::Collection { collection: "recipe_pantry_refs", source })?;
        for record in document
            .recipe_pantry_refs
            .iter()
            .filter(|r| !existing.contains(&r.uuid))
        {
            store::insert_recipe_pantry_ref(conn, record)
                .await
                .map_err(|source| MergeError::Collection { collection: "recipe_pantry_refs", source })?;
            result.recipe_pantry_refs += 1;
        }

        let existing = store::existing_uuids(conn, "shopping_lists")
            .await
            .map_err(|source| MergeError::Collection { collection: "shopping_lists", source })?;
        for record in document
            .shopping_lists
            .iter()
            .filter(|r| !existing.contains(&r.uuid))
        {
            store::insert_shopping_list(conn, record)
                .await
                .map_err(|source| MergeError::Collection { collection: "shopping_lists", source })?;
            result.shopping_lists += 1;
        }

        let existing = store::existing_uuids(conn, "shopping_list_items")
            .await
            .map_err(|source| MergeError::Collection { collection: "shopping_list_items", source })?;
        for record in document
            .shopping_list_items
            .iter()
            .filter(|r| !existing.contains(&r.uuid))
        {
            store::insert_shopping_list_item(conn, record)
                .await
                .map_err(|source| MergeError::Collection { collection: "shopping_list_items", source })?;
            result.shopping_list_items += 1;
        }

        let existing = store::existing_uuids(conn, "recipe_selections")
            .await
            .map_err(|source| MergeError::Collection { collection: "recipe_selections", source })?;
        for record in document
            .recipe_selections
            .iter()
            .filter(|r| !existing.contains(&r.uuid))
        {
            store::insert_recipe_selection(conn, record)
                .await
                .map_err(|source| MergeError::Collection { collection: "recipe_selections", source })?;
            result.recipe_selections += 1;
        }

        let existing = store::existing_uuids(conn, "undo_actions")
            .await
            .map_err(|source| MergeError::Collection { collection: "undo_actions", source })?;
        for record in document
            .undo_actions
            .iter()
            .filter(|r| !existing.contains(&r.uuid))
        {
            store::insert_undo_action(conn, record)
                .await
                .map_err(|source| MergeError::Collection { collection: "undo_actions", source })?;
            result.undo_actions += 1;
        }
    }

    tx.commit().await?;

    info!(
        target: "larder",
        event = "merge_import_complete",
        added_total = result.total(),
        categories = result.categories,
        pantry_items = result.pantry_items,
        recipes = result.recipes,
        recipe_pantry_refs = result.recipe_pantry_refs,
        shopping_lists = result.shopping_lists,
        shopping_list_items = result.shopping_list_items,
        recipe_selections = result.recipe_selections,
        undo_actions = result.undo_actions
    );

    Ok(result)
}
