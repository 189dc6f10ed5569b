use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::Result;
use sqlx::{Pool, Sqlite};
use tempfile::TempDir;

use larder::backup::merge::import_document;
use larder::backup::{archive, document};
use larder::model::{
    BackupDocument, Category, PantryItem, Recipe, RecipePantryRef, ShoppingList, ShoppingListItem,
    SUPPORTED_VERSION,
};
use larder::{db, BackupCoordinator, NoProgress};

async fn open_pool(dir: &Path) -> Result<Pool<Sqlite>> {
    let pool = db::connect_sqlite_pool(&dir.join("larder.sqlite3")).await?;
    db::apply_schema(&pool).await?;
    Ok(pool)
}

fn pantry(id: i64, uuid: &str, name: &str) -> PantryItem {
    let mut item = PantryItem::new(name);
    item.id = id;
    item.uuid = uuid.to_string();
    item
}

fn recipe(id: i64, uuid: &str, name: &str) -> Recipe {
    let mut recipe = Recipe::new(name);
    recipe.id = id;
    recipe.uuid = uuid.to_string();
    recipe
}

fn cross_ref(recipe_id: i64, pantry_item_id: i64, uuid: &str) -> RecipePantryRef {
    RecipePantryRef {
        recipe_id,
        pantry_item_id,
        uuid: uuid.to_string(),
        required: true,
        amount_needed: "1 cup".to_string(),
    }
}

fn sample_document() -> BackupDocument {
    let mut list = ShoppingList::new("weekly");
    list.id = 1;
    list.uuid = "list-1".to_string();

    BackupDocument {
        version: SUPPORTED_VERSION,
        pantry_items: vec![pantry(1, "p-1", "flour"), pantry(2, "p-2", "yeast")],
        recipes: vec![recipe(1, "r-1", "bread")],
        recipe_pantry_refs: vec![cross_ref(1, 1, "x-1"), cross_ref(1, 2, "x-2")],
        shopping_lists: vec![list],
        shopping_list_items: vec![ShoppingListItem {
            id: 1,
            uuid: "i-1".to_string(),
            list_id: 1,
            pantry_item_id: Some(1),
            name: "flour".to_string(),
            quantity: "2".to_string(),
            unit: Some("kg".to_string()),
            category: "baking".to_string(),
            is_checked: false,
            is_generated: true,
            manually_removed: false,
            recipe_id: Some(1),
        }],
        recipe_selections: vec![],
        undo_actions: vec![],
        categories: vec![Category {
            id: 1,
            uuid: "c-1".to_string(),
            name: "baking".to_string(),
        }],
    }
}

async fn count(pool: &Pool<Sqlite>, table: &str) -> i64 {
    let sql = format!("SELECT COUNT(*) FROM {table}");
    let (n,): (i64,) = sqlx::query_as(&sql).fetch_one(pool).await.expect("count");
    n
}

#[tokio::test]
async fn export_then_import_into_empty_database_preserves_everything() -> Result<()> {
    let tmp = TempDir::new()?;
    let source_pool = open_pool(&tmp.path().join("source")).await?;
    import_document(&source_pool, &sample_document()).await?;

    // Referenced images on disk so export bundles them.
    let source_media = tmp.path().join("source-media");
    fs::create_dir_all(&source_media)?;
    fs::write(source_media.join("bread.jpg"), b"img-bytes")?;
    sqlx::query("UPDATE recipes SET image_uri = 'images/bread.jpg' WHERE uuid = 'r-1'")
        .execute(&source_pool)
        .await?;

    let source = BackupCoordinator::new(source_pool.clone(), &source_media);
    let archive_path = tmp.path().join("backup.zip");
    let export = source.export_to(&archive_path, &NoProgress).await;
    assert!(export.succeeded(), "export failed: {}", export.message);
    assert_eq!(export.images_bundled, 1);
    assert!(archive_path.is_file());
    assert!(export.message.starts_with("✅"));

    let target_pool = open_pool(&tmp.path().join("target")).await?;
    let target_media = tmp.path().join("target-media");
    let target = BackupCoordinator::new(target_pool.clone(), &target_media);
    let import = target.import_from(&archive_path, &NoProgress).await;
    assert!(import.succeeded(), "import failed: {}", import.message);

    let merge = import.merge.expect("merge result");
    assert_eq!(merge.pantry_items, 2);
    assert_eq!(merge.recipes, 1);
    assert_eq!(merge.recipe_pantry_refs, 2);
    assert_eq!(merge.shopping_lists, 1);
    assert_eq!(merge.shopping_list_items, 1);
    assert_eq!(merge.categories, 1);

    // uuids survive exactly.
    let uuids: Vec<String> = sqlx::query_scalar("SELECT uuid FROM pantry_items ORDER BY id")
        .fetch_all(&target_pool)
        .await?;
    assert_eq!(uuids, vec!["p-1".to_string(), "p-2".to_string()]);

    // The bundled image was restored into the live media directory.
    assert_eq!(import.media_restored, 1);
    assert_eq!(fs::read(target_media.join("bread.jpg"))?, b"img-bytes");

    Ok(())
}

#[tokio::test]
async fn importing_the_same_backup_twice_adds_nothing_the_second_time() -> Result<()> {
    let tmp = TempDir::new()?;
    let pool = open_pool(tmp.path()).await?;
    let doc = sample_document();

    let first = import_document(&pool, &doc).await?;
    assert_eq!(first.total(), 8);

    let second = import_document(&pool, &doc).await?;
    assert_eq!(second.total(), 0, "second import must be a no-op");

    assert_eq!(count(&pool, "pantry_items").await, 2);
    assert_eq!(count(&pool, "recipes").await, 1);
    assert_eq!(count(&pool, "recipe_pantry_refs").await, 2);

    Ok(())
}

#[tokio::test]
async fn newer_version_fails_fast_and_leaves_database_untouched() -> Result<()> {
    let tmp = TempDir::new()?;
    let pool = open_pool(tmp.path()).await?;

    let mut doc = sample_document();
    doc.version = SUPPORTED_VERSION + 1;
    let text = serde_json::to_string(&doc)?;

    let staging = tmp.path().join("staging");
    fs::create_dir_all(&staging)?;
    fs::write(staging.join("backup.json"), text)?;
    let archive_path = tmp.path().join("future.zip");
    archive::pack_directory(&staging, &archive_path)?;

    let coordinator = BackupCoordinator::new(pool.clone(), tmp.path().join("media"));
    let outcome = coordinator.import_from(&archive_path, &NoProgress).await;

    assert!(!outcome.succeeded());
    assert!(outcome.message.starts_with("❌ version check failed"));
    let err = outcome.error.expect("error present");
    assert_eq!(err.code(), "BACKUP/VERSION");

    // Zero inserts anywhere.
    for table in [
        "categories",
        "pantry_items",
        "recipes",
        "recipe_pantry_refs",
        "shopping_lists",
        "shopping_list_items",
        "recipe_selections",
        "undo_actions",
    ] {
        assert_eq!(count(&pool, table).await, 0, "{table} must stay empty");
    }

    Ok(())
}

#[tokio::test]
async fn merge_adds_only_unseen_uuids() -> Result<()> {
    let tmp = TempDir::new()?;
    let pool = open_pool(tmp.path()).await?;

    // Live DB: A(uuid=1), B(uuid=2).
    let live = BackupDocument {
        version: SUPPORTED_VERSION,
        pantry_items: vec![pantry(1, "uuid-1", "A"), pantry(2, "uuid-2", "B")],
        ..BackupDocument::default()
    };
    import_document(&pool, &live).await?;

    // Incoming: A(uuid=1) again, renamed, plus C(uuid=3).
    let incoming = BackupDocument {
        version: SUPPORTED_VERSION,
        pantry_items: vec![pantry(1, "uuid-1", "A-renamed"), pantry(3, "uuid-3", "C")],
        ..BackupDocument::default()
    };
    let merge = import_document(&pool, &incoming).await?;

    assert_eq!(merge.pantry_items, 1);
    assert_eq!(count(&pool, "pantry_items").await, 3);

    // The existing record won silently; no overwrite happened.
    let name: String = sqlx::query_scalar("SELECT name FROM pantry_items WHERE uuid = 'uuid-1'")
        .fetch_one(&pool)
        .await?;
    assert_eq!(name, "A");

    Ok(())
}

#[tokio::test]
async fn mid_merge_failure_rolls_back_every_collection() -> Result<()> {
    let tmp = TempDir::new()?;
    let pool = open_pool(tmp.path()).await?;

    // Categories and pantry items merge fine; the list item's dangling
    // list_id then violates its foreign key, several collections later.
    let mut doc = sample_document();
    doc.shopping_list_items[0].list_id = 99;

    let err = import_document(&pool, &doc).await;
    assert!(err.is_err(), "dangling list_id must fail the merge");

    // The single transaction rolls everything back, including the
    // collections that inserted before the failure.
    for table in [
        "categories",
        "pantry_items",
        "recipes",
        "recipe_pantry_refs",
        "shopping_lists",
        "shopping_list_items",
    ] {
        assert_eq!(count(&pool, table).await, 0, "{table} must roll back");
    }

    Ok(())
}

#[tokio::test]
async fn unrestorable_image_is_counted_and_skipped() -> Result<()> {
    let tmp = TempDir::new()?;
    let source_pool = open_pool(&tmp.path().join("source")).await?;

    let mut doc = sample_document();
    doc.recipes[0].image_uri = Some("bread.jpg".to_string());
    import_document(&source_pool, &doc).await?;

    let source_media = tmp.path().join("source-media");
    fs::create_dir_all(&source_media)?;
    fs::write(source_media.join("bread.jpg"), b"img")?;

    let archive_path = tmp.path().join("backup.zip");
    let source = BackupCoordinator::new(source_pool, &source_media);
    assert!(source.export_to(&archive_path, &NoProgress).await.succeeded());

    // A directory squatting on the target filename makes the copy fail.
    let target_pool = open_pool(&tmp.path().join("target")).await?;
    let target_media = tmp.path().join("target-media");
    fs::create_dir_all(target_media.join("bread.jpg"))?;

    let target = BackupCoordinator::new(target_pool.clone(), &target_media);
    let outcome = target.import_from(&archive_path, &NoProgress).await;

    // Media failures are non-fatal: the merge lands, the file is skipped.
    assert!(outcome.succeeded(), "{}", outcome.message);
    assert_eq!(outcome.media_restored, 0);
    assert_eq!(outcome.media_failed, 1);
    assert!(outcome.message.contains("1 image(s) failed to restore"));
    assert_eq!(count(&target_pool, "recipes").await, 1);

    Ok(())
}

#[tokio::test]
async fn cross_refs_whose_parents_arrive_in_the_same_backup_import_cleanly() -> Result<()> {
    let tmp = TempDir::new()?;
    let pool = open_pool(tmp.path()).await?;

    // Parents and children all new in one document; parents must insert first
    // or the FK constraints reject the cross-refs.
    let merge = import_document(&pool, &sample_document()).await?;
    assert_eq!(merge.recipe_pantry_refs, 2);
    assert_eq!(count(&pool, "recipe_pantry_refs").await, 2);

    Ok(())
}

#[tokio::test]
async fn corrupt_archive_surfaces_a_displayable_failure() -> Result<()> {
    let tmp = TempDir::new()?;
    let pool = open_pool(tmp.path()).await?;

    let bogus = tmp.path().join("bogus.zip");
    fs::write(&bogus, b"definitely not a zip file")?;

    let coordinator = BackupCoordinator::new(pool.clone(), tmp.path().join("media"));
    let outcome = coordinator.import_from(&bogus, &NoProgress).await;

    assert!(!outcome.succeeded());
    assert!(outcome.message.starts_with("❌ unpack failed"));
    assert_eq!(outcome.error.expect("error").code(), "ARCHIVE/FORMAT");
    assert_eq!(count(&pool, "pantry_items").await, 0);

    Ok(())
}

#[tokio::test]
async fn archive_without_document_entry_is_rejected() -> Result<()> {
    let tmp = TempDir::new()?;
    let pool = open_pool(tmp.path()).await?;

    let staging = tmp.path().join("staging");
    fs::create_dir_all(staging.join("images"))?;
    fs::write(staging.join("images/orphan.jpg"), b"img")?;
    let archive_path = tmp.path().join("no-doc.zip");
    archive::pack_directory(&staging, &archive_path)?;

    let coordinator = BackupCoordinator::new(pool, tmp.path().join("media"));
    let outcome = coordinator.import_from(&archive_path, &NoProgress).await;

    assert!(!outcome.succeeded());
    assert_eq!(outcome.error.expect("error").code(), "ARCHIVE/FORMAT");

    Ok(())
}

#[tokio::test]
async fn media_restore_overwrites_same_named_files() -> Result<()> {
    let tmp = TempDir::new()?;
    let source_pool = open_pool(&tmp.path().join("source")).await?;

    let mut doc = sample_document();
    doc.recipes[0].image_uri = Some("bread.jpg".to_string());
    import_document(&source_pool, &doc).await?;

    let source_media = tmp.path().join("source-media");
    fs::create_dir_all(&source_media)?;
    fs::write(source_media.join("bread.jpg"), b"new-bytes")?;

    let archive_path = tmp.path().join("backup.zip");
    let source = BackupCoordinator::new(source_pool, &source_media);
    assert!(source.export_to(&archive_path, &NoProgress).await.succeeded());

    let target_pool = open_pool(&tmp.path().join("target")).await?;
    let target_media = tmp.path().join("target-media");
    fs::create_dir_all(&target_media)?;
    fs::write(target_media.join("bread.jpg"), b"old-bytes")?;

    let target = BackupCoordinator::new(target_pool, &target_media);
    let outcome = target.import_from(&archive_path, &NoProgress).await;
    assert!(outcome.succeeded(), "{}", outcome.message);

    // Last write wins, keyed purely on filename.
    assert_eq!(fs::read(target_media.join("bread.jpg"))?, b"new-bytes");

    Ok(())
}

#[tokio::test]
async fn progress_runs_from_zero_to_one_in_order() -> Result<()> {
    let tmp = TempDir::new()?;
    let pool = open_pool(tmp.path()).await?;
    import_document(&pool, &sample_document()).await?;

    let last_seen = Arc::new(AtomicU32::new(0));
    let observer = {
        let last_seen = last_seen.clone();
        move |fraction: f32, _message: &str| {
            let scaled = (fraction * 1000.0) as u32;
            let previous = last_seen.swap(scaled, Ordering::SeqCst);
            assert!(scaled >= previous, "progress went backwards");
        }
    };

    let coordinator = BackupCoordinator::new(pool, tmp.path().join("media"));
    let outcome = coordinator
        .export_to(&tmp.path().join("backup.zip"), &observer)
        .await;
    assert!(outcome.succeeded(), "{}", outcome.message);
    assert_eq!(last_seen.load(Ordering::SeqCst), 1000);

    Ok(())
}

#[tokio::test]
async fn exported_document_round_trips_through_the_serializer() -> Result<()> {
    let tmp = TempDir::new()?;
    let pool = open_pool(tmp.path()).await?;
    import_document(&pool, &sample_document()).await?;

    let coordinator = BackupCoordinator::new(pool, tmp.path().join("media"));
    let archive_path = tmp.path().join("backup.zip");
    assert!(coordinator
        .export_to(&archive_path, &NoProgress)
        .await
        .succeeded());

    let extracted = tmp.path().join("extracted");
    archive::unpack_archive(&archive_path, &extracted)?;
    let text = fs::read_to_string(extracted.join("backup.json"))?;
    let parsed = document::deserialize(&text)?;

    assert_eq!(parsed.version, SUPPORTED_VERSION);
    assert_eq!(parsed.pantry_items.len(), 2);
    assert_eq!(parsed.recipes.len(), 1);
    assert_eq!(parsed.recipe_pantry_refs.len(), 2);

    Ok(())
}
