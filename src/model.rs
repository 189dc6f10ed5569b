use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Highest backup document version this build can read or write.
pub const SUPPORTED_VERSION: u32 = 1;

fn new_uuid() -> String {
    Uuid::new_v4().to_string()
}

/// A pantry category. Seed categories are passed in by the host application,
/// not baked in here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    #[serde(default)]
    pub id: i64,
    pub uuid: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PantryItem {
    #[serde(default)]
    pub id: i64,
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub quantity: i64,
    #[serde(default)]
    pub image_uri: Option<String>,
    /// Whether the item participates in pantry tracking at all.
    #[serde(default = "default_true")]
    pub should_track: bool,
    /// Whether running out should suggest a shopping-list entry.
    #[serde(default = "default_true")]
    pub add_to_shopping_list: bool,
    /// Barcode, PLU or other scan code. Uniqueness among tracked items is an
    /// application-level rule, not a schema constraint.
    #[serde(default)]
    pub scan_code: Option<String>,
    #[serde(default)]
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    #[serde(default)]
    pub id: i64,
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub temp: String,
    #[serde(default)]
    pub prep_time: String,
    #[serde(default)]
    pub cook_time: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub image_uri: Option<String>,
    #[serde(default)]
    pub color: i64,
}

/// Ingredient relationship between a recipe and a pantry item. Cascade-deleted
/// with its recipe; the pantry item side is restrict-delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RecipePantryRef {
    pub recipe_id: i64,
    pub pantry_item_id: i64,
    pub uuid: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub amount_needed: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ShoppingList {
    #[serde(default)]
    pub id: i64,
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ShoppingListItem {
    #[serde(default)]
    pub id: i64,
    pub uuid: String,
    pub list_id: i64,
    #[serde(default)]
    pub pantry_item_id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub quantity: String,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub is_checked: bool,
    #[serde(default)]
    pub is_generated: bool,
    #[serde(default)]
    pub manually_removed: bool,
    /// Provenance: the recipe whose selection generated this entry, if any.
    #[serde(default)]
    pub recipe_id: Option<i64>,
}

/// Records which recipes, and at what serving count, contributed generated
/// items to a shopping list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RecipeSelection {
    #[serde(default)]
    pub id: i64,
    pub uuid: String,
    pub list_id: i64,
    pub recipe_id: i64,
    #[serde(default)]
    pub count: i64,
}

/// Append-only log entry enabling one-step undo per list. `payload` is the
/// affected data serialized as JSON by the host application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UndoAction {
    #[serde(default)]
    pub id: i64,
    pub uuid: String,
    pub list_id: i64,
    pub action_type: String,
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub timestamp: i64,
}

/// Transient aggregate of the full relational snapshot. Exists only while an
/// export or import run is in flight; never persisted as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupDocument {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub pantry_items: Vec<PantryItem>,
    #[serde(default)]
    pub recipes: Vec<Recipe>,
    #[serde(default)]
    pub recipe_pantry_refs: Vec<RecipePantryRef>,
    #[serde(default)]
    pub shopping_lists: Vec<ShoppingList>,
    #[serde(default)]
    pub shopping_list_items: Vec<ShoppingListItem>,
    #[serde(default)]
    pub recipe_selections: Vec<RecipeSelection>,
    #[serde(default)]
    pub undo_actions: Vec<UndoAction>,
    #[serde(default)]
    pub categories: Vec<Category>,
}

fn default_true() -> bool {
    true
}

fn default_version() -> u32 {
    1
}

impl BackupDocument {
    /// Total record count across every collection.
    pub fn record_count(&self) -> usize {
        self.pantry_items.len()
            + self.recipes.len()
            + self.recipe_pantry_refs.len()
            + self.shopping_lists.len()
            + self.shopping_list_items.len()
            + self.recipe_selections.len()
            + self.undo_actions.len()
            + self.categories.len()
    }

    /// Filenames of every image referenced by the snapshot, flattened to the
    /// final path segment of each `image_uri`.
    pub fn referenced_image_names(&self) -> Vec<String> {
        let pantry = self.pantry_items.iter().filter_map(|i| i.image_uri.as_deref());
        let recipes = self.recipes.iter().filter_map(|r| r.image_uri.as_deref());
        pantry
            .chain(recipes)
            .filter_map(uri_file_name)
            .map(str::to_owned)
            .collect()
    }
}

/// Final path segment of a URI-like string, the key used to match database
/// references against files on disk.
pub fn uri_file_name(uri: &str) -> Option<&str> {
    let trimmed = uri.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    let name = trimmed.rsplit('/').next().unwrap_or(trimmed);
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

impl PantryItem {
    pub fn new(name: impl Into<String>) -> Self {
        PantryItem {
            id: 0,
            uuid: new_uuid(),
            name: name.into(),
            quantity: 0,
            image_uri: None,
            should_track: true,
            add_to_shopping_list: true,
            scan_code: None,
            category: String::new(),
        }
    }

    pub fn has_scan_code(&self) -> bool {
        self.scan_code
            .as_deref()
            .map(|code| !code.trim().is_empty())
            .unwrap_or(false)
    }
}

impl Recipe {
    pub fn new(name: impl Into<String>) -> Self {
        Recipe {
            id: 0,
            uuid: new_uuid(),
            name: name.into(),
            temp: String::new(),
            prep_time: String::new(),
            cook_time: String::new(),
            category: String::new(),
            instructions: String::new(),
            image_uri: None,
            color: 0,
        }
    }
}

impl Category {
    pub fn new(name: impl Into<String>) -> Self {
        Category {
            id: 0,
            uuid: new_uuid(),
            name: name.into(),
        }
    }
}

impl ShoppingList {
    pub fn new(name: impl Into<String>) -> Self {
        ShoppingList {
            id: 0,
            uuid: new_uuid(),
            name: name.into(),
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}
