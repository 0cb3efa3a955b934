//! Entities fed by a [`DataUpdateCoordinator`]

use ha_coordinator::{DataSource, DataUpdateCoordinator};
use std::sync::Arc;

use crate::entity::{Subscription, UpdateCallback};

/// Coordinator binding embedded in entity structs.
///
/// Provides the subscription and availability half of an entity backed by
/// a coordinator; the embedding struct supplies identity and rendering.
pub struct CoordinatorEntity<S: DataSource> {
    coordinator: DataUpdateCoordinator<S>,
}

impl<S: DataSource> Clone for CoordinatorEntity<S> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
        }
    }
}

impl<S: DataSource> CoordinatorEntity<S> {
    pub fn new(coordinator: DataUpdateCoordinator<S>) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &DataUpdateCoordinator<S> {
        &self.coordinator
    }

    /// Current snapshot
    pub fn data(&self) -> Option<Arc<S::Data>> {
        self.coordinator.data()
    }

    /// Read one field from the snapshot
    pub fn read<T>(&self, f: impl FnOnce(&S::Data) -> Option<T>) -> Option<T> {
        self.data().and_then(|data| f(&data))
    }

    /// Whether the last refresh succeeded
    pub fn available(&self) -> bool {
        self.coordinator.last_update_success()
    }

    /// Listen for coordinator updates until the returned guard is dropped
    pub fn subscribe(&self, on_update: UpdateCallback) -> Subscription {
        let id = self.coordinator.add_listener(move || on_update());
        let coordinator = self.coordinator.clone();
        Subscription::new(move || coordinator.remove_listener(id))
    }
}
