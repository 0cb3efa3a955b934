//! Published entity states
//!
//! Entities never hold the authoritative copy of what they publish; they
//! render a value and hand it to the [`StateMachine`], which stamps the
//! timestamps, indexes the entity by domain, and fires `state_changed`
//! on the bus for every write that actually changed something.

use dashmap::DashMap;
use ha_core::events::StateChangedData;
use ha_core::{Context, EntityId, State};
use ha_event_bus::EventBus;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, trace};

pub type Attributes = HashMap<String, serde_json::Value>;

pub struct StateMachine {
    /// Current state per entity_id
    states: DashMap<String, State>,
    /// entity_ids per domain, in first-write order
    domain_index: DashMap<String, Vec<String>>,
    event_bus: Arc<EventBus>,
}

impl StateMachine {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            states: DashMap::new(),
            domain_index: DashMap::new(),
            event_bus,
        }
    }

    /// Write an entity's state.
    ///
    /// A write whose value and attributes equal the current ones is a no-op
    /// unless `force_update` is set; no event is fired and the stored state
    /// (with its original timestamps) is returned.
    #[instrument(skip(self, state, attributes, context), fields(entity_id = %entity_id))]
    pub fn set(
        &self,
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: Attributes,
        force_update: bool,
        context: Context,
    ) -> State {
        let key = entity_id.to_string();
        let state = state.into();
        let old_state = self.states.get(&key).map(|s| s.clone());

        if let Some(existing) = &old_state {
            if !force_update && existing.state == state && existing.attributes == attributes {
                trace!("State unchanged, skipping write");
                return existing.clone();
            }
        }

        let new_state = match &old_state {
            Some(existing) => existing.with_update(state, attributes, context.clone()),
            None => State::new(entity_id.clone(), state, attributes, context.clone()),
        };

        debug!(state = %new_state.state, "Writing entity state");

        self.states.insert(key.clone(), new_state.clone());
        if old_state.is_none() {
            self.domain_index
                .entry(entity_id.domain().to_string())
                .or_default()
                .push(key);
        }

        self.event_bus.fire_typed(
            StateChangedData {
                entity_id,
                old_state,
                new_state: Some(new_state.clone()),
            },
            context,
        );

        new_state
    }

    pub fn get(&self, entity_id: &str) -> Option<State> {
        self.states.get(entity_id).map(|s| s.clone())
    }

    /// The bare state value, or None for an unknown entity
    pub fn get_state(&self, entity_id: &str) -> Option<String> {
        self.states.get(entity_id).map(|s| s.state.clone())
    }

    pub fn is_state(&self, entity_id: &str, state: &str) -> bool {
        self.get_state(entity_id).as_deref() == Some(state)
    }

    /// Whether `entity_id` is already in use, for id generation
    pub fn contains(&self, entity_id: &str) -> bool {
        self.states.contains_key(entity_id)
    }

    pub fn entity_ids(&self, domain: &str) -> Vec<String> {
        self.domain_index
            .get(domain)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    pub fn domain_states(&self, domain: &str) -> Vec<State> {
        self.entity_ids(domain)
            .iter()
            .filter_map(|id| self.get(id))
            .collect()
    }

    /// Drop an entity's state. Fires `state_changed` with no new state.
    #[instrument(skip(self, context), fields(entity_id = %entity_id))]
    pub fn remove(&self, entity_id: &EntityId, context: Context) -> Option<State> {
        let key = entity_id.to_string();
        let (_, old_state) = self.states.remove(&key)?;

        trace!("Removing entity state");
        if let Some(mut ids) = self.domain_index.get_mut(entity_id.domain()) {
            ids.retain(|id| id != &key);
        }

        self.event_bus.fire_typed(
            StateChangedData {
                entity_id: entity_id.clone(),
                old_state: Some(old_state.clone()),
                new_state: None,
            },
            context,
        );

        Some(old_state)
    }

    pub fn entity_count(&self) -> usize {
        self.states.len()
    }
}

pub type SharedStateMachine = Arc<StateMachine>;
