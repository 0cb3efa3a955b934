//! Category Registry
//!
//! User-defined categories for grouping automations, scripts, scenes and
//! helpers. Categories live in scopes (usually the name of the thing they
//! group) and names are unique per scope, ignoring case.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ha_core::events::CATEGORY_REGISTRY_UPDATED;
use ha_core::{Context, EventData};
use ha_event_bus::EventBus;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use ulid::Ulid;

use crate::storage::{Storable, Storage, StorageResult, Store};
use crate::SAVE_DELAY;

pub const STORAGE_KEY: &str = "core.category_registry";
pub const STORAGE_VERSION: u32 = 1;
/// Minor version 2 added `created_at` / `modified_at`
pub const STORAGE_MINOR_VERSION: u32 = 2;

#[derive(Debug, Error)]
pub enum CategoryError {
    #[error("The name '{name}' is already in use")]
    NameInUse { scope: String, name: String },

    #[error("Category {category_id} not found in scope {scope}")]
    NotFound { scope: String, category_id: String },
}

pub type CategoryResult<T> = Result<T, CategoryError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryEntry {
    pub category_id: String,

    pub name: String,

    #[serde(default)]
    pub icon: Option<String>,

    /// Files written before minor version 2 load with the epoch
    #[serde(default)]
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryRegistryData {
    /// scope -> categories in creation order
    pub categories: IndexMap<String, Vec<CategoryEntry>>,
}

impl Storable for CategoryRegistryData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryAction {
    Create,
    Update,
    Remove,
}

/// Payload of `category_registry_updated`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRegistryUpdatedData {
    pub action: CategoryAction,
    pub scope: String,
    pub category_id: String,
}

impl EventData for CategoryRegistryUpdatedData {
    fn event_type() -> &'static str {
        CATEGORY_REGISTRY_UPDATED
    }
}

/// Changes applied by [`CategoryRegistry::update`]; `None` leaves a field alone
#[derive(Debug, Clone, Default)]
pub struct CategoryUpdate {
    pub name: Option<String>,
    /// `Some(None)` clears the icon
    pub icon: Option<Option<String>>,
}

pub struct CategoryRegistry {
    store: Store<CategoryRegistryData>,
    /// scope -> category_id -> entry
    categories: DashMap<String, IndexMap<String, Arc<CategoryEntry>>>,
    event_bus: Arc<EventBus>,
}

impl CategoryRegistry {
    pub fn new(storage: Arc<Storage>, event_bus: Arc<EventBus>) -> Self {
        Self {
            store: Store::new(storage),
            categories: DashMap::new(),
            event_bus,
        }
    }

    pub async fn load(&self) -> StorageResult<()> {
        let Some(data) = self.store.load(None).await? else {
            return Ok(());
        };

        let mut count = 0;
        for (scope, entries) in data.categories {
            count += entries.len();
            let by_id = entries
                .into_iter()
                .map(|entry| (entry.category_id.clone(), Arc::new(entry)))
                .collect();
            self.categories.insert(scope, by_id);
        }
        info!("Loaded {} categories from storage", count);
        Ok(())
    }

    /// Write any pending changes now
    pub async fn flush(&self) -> StorageResult<()> {
        self.store.flush().await
    }

    pub fn get(&self, scope: &str, category_id: &str) -> Option<Arc<CategoryEntry>> {
        self.categories
            .get(scope)
            .and_then(|by_id| by_id.get(category_id).cloned())
    }

    /// All categories of a scope, in creation order
    pub fn list(&self, scope: &str) -> Vec<Arc<CategoryEntry>> {
        self.categories
            .get(scope)
            .map(|by_id| by_id.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn create(
        &self,
        scope: &str,
        name: &str,
        icon: Option<String>,
    ) -> CategoryResult<Arc<CategoryEntry>> {
        let entry = {
            let mut by_id = self.categories.entry(scope.to_string()).or_default();
            ensure_name_available(&by_id, scope, name, None)?;

            let now = Utc::now();
            let entry = Arc::new(CategoryEntry {
                category_id: Ulid::new().to_string(),
                name: name.to_string(),
                icon,
                created_at: now,
                modified_at: now,
            });
            by_id.insert(entry.category_id.clone(), Arc::clone(&entry));
            entry
        };

        info!(scope, category_id = %entry.category_id, "Created category {}", name);
        self.changed(CategoryAction::Create, scope, &entry.category_id);
        Ok(entry)
    }

    /// Apply `changes`. An update that changes nothing returns the entry
    /// untouched and fires no event.
    pub fn update(
        &self,
        scope: &str,
        category_id: &str,
        changes: CategoryUpdate,
    ) -> CategoryResult<Arc<CategoryEntry>> {
        let updated = {
            let mut by_id = self
                .categories
                .get_mut(scope)
                .ok_or_else(|| not_found(scope, category_id))?;
            let old = by_id
                .get(category_id)
                .cloned()
                .ok_or_else(|| not_found(scope, category_id))?;

            let mut entry = (*old).clone();
            if let Some(name) = changes.name {
                if name != entry.name {
                    ensure_name_available(&by_id, scope, &name, Some(category_id))?;
                    entry.name = name;
                }
            }
            if let Some(icon) = changes.icon {
                entry.icon = icon;
            }

            if entry == *old {
                return Ok(old);
            }
            entry.modified_at = Utc::now();

            let entry = Arc::new(entry);
            by_id.insert(category_id.to_string(), Arc::clone(&entry));
            entry
        };

        debug!(scope, category_id, "Updated category");
        self.changed(CategoryAction::Update, scope, category_id);
        Ok(updated)
    }

    pub fn delete(&self, scope: &str, category_id: &str) -> CategoryResult<Arc<CategoryEntry>> {
        let removed = self
            .categories
            .get_mut(scope)
            .and_then(|mut by_id| by_id.shift_remove(category_id))
            .ok_or_else(|| not_found(scope, category_id))?;

        info!(scope, category_id, "Removed category {}", removed.name);
        self.changed(CategoryAction::Remove, scope, category_id);
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.categories.iter().map(|r| r.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn changed(&self, action: CategoryAction, scope: &str, category_id: &str) {
        self.event_bus.fire_typed(
            CategoryRegistryUpdatedData {
                action,
                scope: scope.to_string(),
                category_id: category_id.to_string(),
            },
            Context::new(),
        );
        self.store.delay_save(self.snapshot(), SAVE_DELAY);
    }

    fn snapshot(&self) -> CategoryRegistryData {
        let mut categories: IndexMap<String, Vec<CategoryEntry>> = self
            .categories
            .iter()
            .filter(|r| !r.value().is_empty())
            .map(|r| {
                let entries = r.value().values().map(|e| (**e).clone()).collect();
                (r.key().clone(), entries)
            })
            .collect();
        categories.sort_keys();
        CategoryRegistryData { categories }
    }
}

fn ensure_name_available(
    by_id: &IndexMap<String, Arc<CategoryEntry>>,
    scope: &str,
    name: &str,
    except: Option<&str>,
) -> CategoryResult<()> {
    let folded = name.to_lowercase();
    let taken = by_id
        .values()
        .any(|e| Some(e.category_id.as_str()) != except && e.name.to_lowercase() == folded);
    if taken {
        return Err(CategoryError::NameInUse {
            scope: scope.to_string(),
            name: name.to_string(),
        });
    }
    Ok(())
}

fn not_found(scope: &str, category_id: &str) -> CategoryError {
    CategoryError::NotFound {
        scope: scope.to_string(),
        category_id: category_id.to_string(),
    }
}
