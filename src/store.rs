//! Reads and writes for the backup subsystem. This is deliberately not a
//! general CRUD layer: it covers exactly what export needs (full-table
//! snapshots) and what merge-import needs (existing uuid sets and batch
//! inserts preserving source ids).

use std::collections::HashSet;

use sqlx::sqlite::SqliteConnection;
use sqlx::{Pool, Sqlite};

use crate::model::{
    BackupDocument, Category, PantryItem, Recipe, RecipePantryRef, RecipeSelection, ShoppingList,
    ShoppingListItem, UndoAction, SUPPORTED_VERSION,
};

/// Assemble the full in-memory snapshot of every collection, in stable id
/// order, ready for serialization.
pub async fn load_snapshot(pool: &Pool<Sqlite>) -> Result<BackupDocument, sqlx::Error> {
    let pantry_items =
        sqlx::query_as::<_, PantryItem>("SELECT * FROM pantry_items ORDER BY id")
            .fetch_all(pool)
            .await?;
    let recipes = sqlx::query_as::<_, Recipe>("SELECT * FROM recipes ORDER BY id")
        .fetch_all(pool)
        .await?;
    let recipe_pantry_refs = sqlx::query_as::<_, RecipePantryRef>(
        "SELECT * FROM recipe_pantry_refs ORDER BY recipe_id, pantry_item_id",
    )
    .fetch_all(pool)
    .await?;
    let shopping_lists =
        sqlx::query_as::<_, ShoppingList>("SELECT * FROM shopping_lists ORDER BY id")
            .fetch_all(pool)
            .await?;
    let shopping_list_items =
        sqlx::query_as::<_, ShoppingListItem>("SELECT * FROM shopping_list_items ORDER BY id")
            .fetch_all(pool)
            .await?;
    let recipe_selections =
        sqlx::query_as::<_, RecipeSelection>("SELECT * FROM recipe_selections ORDER BY id")
            .fetch_all(pool)
            .await?;
    let undo_actions = sqlx::query_as::<_, UndoAction>("SELECT * FROM undo_actions ORDER BY id")
        .fetch_all(pool)
        .await?;
    let categories = sqlx::query_as::<_, Category>("SELECT * FROM categories ORDER BY id")
        .fetch_all(pool)
        .await?;

    Ok(BackupDocument {
        version: SUPPORTED_VERSION,
        pantry_items,
        recipes,
        recipe_pantry_refs,
        shopping_lists,
        shopping_list_items,
        recipe_selections,
        undo_actions,
        categories,
    })
}

/// All image URIs referenced from the live database, used by the orphan sweep.
pub async fn referenced_image_uris(pool: &Pool<Sqlite>) -> Result<Vec<String>, sqlx::Error> {
    let mut uris: Vec<String> = sqlx::query_scalar(
        "SELECT image_uri FROM pantry_items WHERE image_uri IS NOT NULL",
    )
    .fetch_all(pool)
    .await?;
    let recipe_uris: Vec<String> =
        sqlx::query_scalar("SELECT image_uri FROM recipes WHERE image_uri IS NOT NULL")
            .fetch_all(pool)
            .await?;
    uris.extend(recipe_uris);
    Ok(uris)
}

/// The set of uuids already present in one table. `table` is always one of the
/// eight fixed collection names, never caller input.
pub async fn existing_uuids(
    conn: &mut SqliteConnection,
    table: &str,
) -> Result<HashSet<String>, sqlx::Error> {
    let sql = format!("SELECT uuid FROM {table}");
    let rows: Vec<String> = sqlx::query_scalar(&sql).fetch_all(conn).await?;
    Ok(rows.into_iter().collect())
}

/// An id of zero means "not yet assigned"; binding NULL lets SQLite pick the
/// next rowid. Non-zero ids from a backup are preserved as-is.
fn bound_id(id: i64) -> Option<i64> {
    (id != 0).then_some(id)
}

pub async fn insert_category(
    conn: &mut SqliteConnection,
    record: &Category,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO categories (id, uuid, name) VALUES (?1, ?2, ?3)")
        .bind(bound_id(record.id))
        .bind(&record.uuid)
        .bind(&record.name)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn insert_pantry_item(
    conn: &mut SqliteConnection,
    record: &PantryItem,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO pantry_items
            (id, uuid, name, quantity, image_uri, should_track, add_to_shopping_list, scan_code, category)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )
    .bind(bound_id(record.id))
    .bind(&record.uuid)
    .bind(&record.name)
    .bind(record.quantity)
    .bind(&record.image_uri)
    .bind(record.should_track)
    .bind(record.add_to_shopping_list)
    .bind(&record.scan_code)
    .bind(&record.category)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn insert_recipe(
    conn: &mut SqliteConnection,
    record: &Recipe,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO recipes
            (id, uuid, name, temp, prep_time, cook_time, category, instructions, image_uri, color)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )
    .bind(bound_id(record.id))
    .bind(&record.uuid)
    .bind(&record.name)
    .bind(&record.temp)
    .bind(&record.prep_time)
    .bind(&record.cook_time)
    .bind(&record.category)
    .bind(&record.instructions)
    .bind(&record.image_uri)
    .bind(record.color)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn insert_recipe_pantry_ref(
    conn: &mut SqliteConnection,
    record: &RecipePantryRef,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO recipe_pantry_refs (recipe_id, pantry_item_id, uuid, required, amount_needed)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(record.recipe_id)
    .bind(record.pantry_item_id)
    .bind(&record.uuid)
    .bind(record.required)
    .bind(&record.amount_needed)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn insert_shopping_list(
    conn: &mut SqliteConnection,
    record: &ShoppingList,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO shopping_lists (id, uuid, name, created_at) VALUES (?1, ?2, ?3, ?4)")
        .bind(bound_id(record.id))
        .bind(&record.uuid)
        .bind(&record.name)
        .bind(record.created_at)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn insert_shopping_list_item(
    conn: &mut SqliteConnection,
    record: &ShoppingListItem,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO shopping_list_items
            (id, uuid, list_id, pantry_item_id, name, quantity, unit, category,
             is_checked, is_generated, manually_removed, recipe_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
    )
    .bind(bound_id(record.id))
    .bind(&record.uuid)
    .bind(record.list_id)
    .bind(record.pantry_item_id)
    .bind(&record.name)
    .bind(&record.quantity)
    .bind(&record.unit)
    .bind(&record.category)
    .bind(record.is_checked)
    .bind(record.is_generated)
    .bind(record.manually_removed)
    .bind(record.recipe_id)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn insert_recipe_selection(
    conn: &mut SqliteConnection,
    record: &RecipeSelection,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO recipe_selections (id, uuid, list_id, recipe_id, count)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(bound_id(record.id))
    .bind(&record.uuid)
    .bind(record.list_id)
    .bind(record.recipe_id)
    .bind(record.count)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn insert_undo_action(
    conn: &mut SqliteConnection,
    record: &UndoAction,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO undo_actions (id, uuid, list_id, action_type, payload, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )
    .bind(bound_id(record.id))
    .bind(&record.uuid)
    .bind(record.list_id)
    .bind(&record.action_type)
    .bind(&record.payload)
    .bind(record.timestamp)
    .execute(conn)
    .await?;
    Ok(())
}
