//! Entities of one config entry, wired to the state machine

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ha_core::{Context, EntityId, EntityIdError, HomeAssistantError, STATE_UNAVAILABLE};
use ha_registries::{DeviceRegistry, EntityRegistration, EntityRegistry};
use ha_state_machine::StateMachine;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, error, info, instrument};

use crate::entity::{EntityAction, PlatformEntity, Subscription};

struct RegisteredEntity {
    entity_id: EntityId,
    entity: PlatformEntity,
    subscription: Mutex<Option<Subscription>>,
    /// Buttons publish the time of their last press
    last_pressed: Mutex<Option<DateTime<Utc>>>,
}

impl RegisteredEntity {
    /// Render and write to the state machine
    fn write_state(&self, states: &StateMachine, context: Context) {
        let rendered = self.entity.render();
        let value = if !rendered.available {
            STATE_UNAVAILABLE.to_string()
        } else if let Some(pressed) = *lock(&self.last_pressed) {
            pressed.to_rfc3339()
        } else {
            rendered.value
        };
        states.set(
            self.entity_id.clone(),
            value,
            rendered.attributes,
            false,
            context,
        );
    }
}

/// Holds the entities an integration created for one config entry.
///
/// Every entity added here is subscribed to its data provider; each
/// notification re-renders it and writes its state. Entities with a unique
/// id get their entity id from the entity registry, and their device is
/// registered from the reported [`DeviceInfo`](crate::DeviceInfo).
pub struct EntityPlatform {
    domain: String,
    entry_id: String,
    states: Arc<StateMachine>,
    entity_registry: Arc<EntityRegistry>,
    device_registry: Arc<DeviceRegistry>,
    entities: DashMap<String, Arc<RegisteredEntity>>,
    unique_ids: Mutex<HashSet<String>>,
}

impl EntityPlatform {
    pub fn new(
        domain: impl Into<String>,
        entry_id: impl Into<String>,
        states: Arc<StateMachine>,
        entity_registry: Arc<EntityRegistry>,
        device_registry: Arc<DeviceRegistry>,
    ) -> Self {
        Self {
            domain: domain.into(),
            entry_id: entry_id.into(),
            states,
            entity_registry,
            device_registry,
            entities: DashMap::new(),
            unique_ids: Mutex::new(HashSet::new()),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn entry_id(&self) -> &str {
        &self.entry_id
    }

    /// Register entities, publish their initial state and subscribe them.
    ///
    /// Entities whose unique id is already registered are skipped. Returns
    /// the ids assigned to the entities that were added. The initial states
    /// of one call share a context.
    #[instrument(skip(self, entities), fields(domain = %self.domain, entry_id = %self.entry_id))]
    pub fn add_entities(
        &self,
        entities: Vec<PlatformEntity>,
    ) -> Result<Vec<EntityId>, EntityIdError> {
        let context = Context::new();
        let mut added = Vec::with_capacity(entities.len());

        for entity in entities {
            if let Some(unique_id) = entity.unique_id() {
                if !lock(&self.unique_ids).insert(unique_id.clone()) {
                    error!(
                        "Platform {} does not generate unique IDs. ID {} already exists, ignoring {}",
                        self.domain,
                        unique_id,
                        entity.platform()
                    );
                    continue;
                }
            }

            let entity_id = self.assign_entity_id(&entity)?;

            let record = Arc::new(RegisteredEntity {
                entity_id: entity_id.clone(),
                entity,
                subscription: Mutex::new(None),
                last_pressed: Mutex::new(None),
            });
            self.entities
                .insert(entity_id.to_string(), Arc::clone(&record));

            record.entity.added_to_hass();
            record.write_state(&self.states, context.clone());

            let weak: Weak<RegisteredEntity> = Arc::downgrade(&record);
            let states = Arc::clone(&self.states);
            let subscription = record.entity.subscribe(Arc::new(move || {
                if let Some(record) = weak.upgrade() {
                    record.write_state(&states, Context::new());
                }
            }));
            *lock(&record.subscription) = subscription;

            debug!(entity_id = %entity_id, "Added entity");
            added.push(entity_id);
        }

        info!("Added {} entities", added.len());
        Ok(added)
    }

    /// Registered id for entities with a unique id, a fresh one otherwise
    fn assign_entity_id(&self, entity: &PlatformEntity) -> Result<EntityId, EntityIdError> {
        let domain = entity.platform().as_str();
        let name = entity.friendly_name().unwrap_or_default();
        let taken = |candidate: &str| {
            self.states.contains(candidate) || self.entities.contains_key(candidate)
        };

        let Some(unique_id) = entity.unique_id() else {
            return EntityId::generate(domain, &name, taken);
        };

        let device_id = entity
            .device_info()
            .and_then(|info| self.device_registry.get_or_create(&self.entry_id, &info))
            .map(|device| device.id.clone());
        let registration = EntityRegistration {
            domain,
            platform: &self.domain,
            unique_id: &unique_id,
            suggested_name: &name,
            config_entry_id: Some(&self.entry_id),
            device_id: device_id.as_deref(),
            original_name: Some(&name).filter(|name| !name.is_empty()).map(String::as_str),
        };
        let entry = self.entity_registry.get_or_create(registration, taken)?;
        Ok(entry.entity_id.clone())
    }

    /// Run `action` on an entity and publish its new state.
    ///
    /// Validation failures and device errors are returned to the caller.
    pub async fn call_action(
        &self,
        entity_id: &str,
        action: EntityAction,
    ) -> Result<(), HomeAssistantError> {
        let record = self
            .entities
            .get(entity_id)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| HomeAssistantError::EntityNotFound(entity_id.to_string()))?;

        debug!(entity_id, action = action.name(), "Calling entity action");
        record.entity.call(entity_id, action).await?;

        if action == EntityAction::Press {
            *lock(&record.last_pressed) = Some(Utc::now());
        }
        record.write_state(&self.states, Context::new());
        Ok(())
    }

    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.entities.iter().map(|r| r.value().entity_id.clone()).collect()
    }

    pub fn get(&self, entity_id: &str) -> Option<PlatformEntity> {
        self.entities.get(entity_id).map(|r| r.value().entity.clone())
    }

    /// Entity id assigned to a unique id
    pub fn entity_id_for(&self, unique_id: &str) -> Option<EntityId> {
        self.entities
            .iter()
            .find(|r| r.value().entity.unique_id().as_deref() == Some(unique_id))
            .map(|r| r.value().entity_id.clone())
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Unsubscribe every entity and remove its state. Registry entries
    /// stay so the ids come back on the next setup.
    pub fn unload(&self) {
        let context = Context::new();
        let records: Vec<Arc<RegisteredEntity>> = self
            .entities
            .iter()
            .map(|r| Arc::clone(r.value()))
            .collect();
        self.entities.clear();
        lock(&self.unique_ids).clear();

        for record in &records {
            drop(lock(&record.subscription).take());
            record.entity.will_remove_from_hass();
            self.states.remove(&record.entity_id, context.clone());
        }
        info!(domain = %self.domain, entry_id = %self.entry_id, "Removed {} entities", records.len());
    }
}

impl Drop for EntityPlatform {
    fn drop(&mut self) {
        if !self.entities.is_empty() {
            self.unload();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
