//! Per-entry runtime objects
//!
//! Whatever an integration builds during setup (client, coordinator,
//! entity platform) lives here under the entry id until the entry is
//! unloaded. The host removes the key after every unload and after every
//! failed setup, so nothing outlives its entry.

use dashmap::DashMap;
use std::any::Any;
use std::sync::Arc;

type Value = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
pub struct RuntimeData {
    entries: DashMap<String, Value>,
}

impl RuntimeData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` for `entry_id`, returning whether a value was replaced
    pub fn insert<T>(&self, entry_id: impl Into<String>, value: T) -> bool
    where
        T: Any + Send + Sync,
    {
        self.entries
            .insert(entry_id.into(), Arc::new(value))
            .is_some()
    }

    /// The value for `entry_id`, if present and of type `T`
    pub fn get<T>(&self, entry_id: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let value = self.entries.get(entry_id).map(|v| Arc::clone(v.value()))?;
        value.downcast::<T>().ok()
    }

    pub fn contains(&self, entry_id: &str) -> bool {
        self.entries.contains_key(entry_id)
    }

    /// Drop the value for `entry_id`; true if there was one
    pub fn remove(&self, entry_id: &str) -> bool {
        self.entries.remove(entry_id).is_some()
    }

    pub fn entry_ids(&self) -> Vec<String> {
        self.entries.iter().map(|r| r.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
