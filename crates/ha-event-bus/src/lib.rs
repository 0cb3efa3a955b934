//! Event bus for the integration host
//!
//! Config entries announce lifecycle changes, the category registry
//! announces mutations, and the state machine announces entity state
//! writes through this bus. Delivery is fan-out over
//! `tokio::sync::broadcast`; a subscriber that falls behind by more than
//! the channel capacity loses the oldest events.

use dashmap::DashMap;
use ha_core::{Context, Event, EventData, EventType};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

type JsonEvent = Event<serde_json::Value>;

pub struct EventBus {
    /// One channel per event type, created on first subscription
    channels: DashMap<EventType, broadcast::Sender<JsonEvent>>,
    /// Receives every event regardless of type
    match_all: broadcast::Sender<JsonEvent>,
    capacity: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (match_all, _) = broadcast::channel(capacity);
        Self {
            channels: DashMap::new(),
            match_all,
            capacity,
        }
    }

    /// Subscribe to one event type (or `*` for all)
    pub fn subscribe(&self, event_type: impl Into<EventType>) -> broadcast::Receiver<JsonEvent> {
        let event_type = event_type.into();
        trace!(event_type = %event_type, "Subscribing");

        if event_type.is_match_all() {
            return self.match_all.subscribe();
        }

        self.channels
            .entry(event_type)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<JsonEvent> {
        self.match_all.subscribe()
    }

    /// Subscribe to the event type of `T`, receiving decoded payloads
    pub fn subscribe_typed<T>(&self) -> TypedEventReceiver<T>
    where
        T: EventData + serde::de::DeserializeOwned,
    {
        TypedEventReceiver {
            rx: self.subscribe(T::event_type()),
            _phantom: std::marker::PhantomData,
        }
    }

    /// Deliver to subscribers of the event's type and to match-all subscribers
    pub fn fire(&self, event: JsonEvent) {
        debug!(event_type = %event.event_type, "Firing event");

        if let Some(sender) = self.channels.get(&event.event_type) {
            // A send error only means nobody is listening right now
            let _ = sender.send(event.clone());
        }
        let _ = self.match_all.send(event);
    }

    pub fn fire_typed<T: EventData + serde::Serialize>(&self, data: T, context: Context) {
        match serde_json::to_value(&data) {
            Ok(json) => self.fire(Event::new(T::event_type(), json, context)),
            Err(err) => warn!(event_type = T::event_type(), "Dropping unserializable event: {}", err),
        }
    }

    /// Number of event types with a channel
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver that decodes payloads into `T`, skipping ones that don't fit
pub struct TypedEventReceiver<T> {
    rx: broadcast::Receiver<JsonEvent>,
    _phantom: std::marker::PhantomData<T>,
}

impl<T: EventData + serde::de::DeserializeOwned> TypedEventReceiver<T> {
    pub async fn recv(&mut self) -> Result<Event<T>, broadcast::error::RecvError> {
        loop {
            let event = self.rx.recv().await?;
            if let Ok(data) = serde_json::from_value::<T>(event.data.clone()) {
                return Ok(Event {
                    event_type: event.event_type,
                    data,
                    origin: event.origin,
                    time_fired: event.time_fired,
                    context: event.context,
                });
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv)
    pub fn try_recv(&mut self) -> Result<Event<T>, broadcast::error::TryRecvError> {
        loop {
            let event = self.rx.try_recv()?;
            if let Ok(data) = serde_json::from_value::<T>(event.data.clone()) {
                return Ok(Event {
                    event_type: event.event_type,
                    data,
                    origin: event.origin,
                    time_fired: event.time_fired,
                    context: event.context,
                });
            }
        }
    }
}

pub type SharedEventBus = Arc<EventBus>;

#[cfg(test)]
mod tests {
    use super::*;
    use ha_core::events::StateChangedData;
    use ha_core::{EntityId, State};
    use serde_json::json;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_subscribe_and_fire() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe("config_entry_state_changed");

        bus.fire(Event::new(
            "config_entry_state_changed",
            json!({"entry_id": "abc", "state": "loaded"}),
            Context::new(),
        ));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.data["state"], "loaded");
    }

    #[tokio::test]
    async fn test_match_all_sees_every_type() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_all();

        bus.fire(Event::new("a", json!({}), Context::new()));
        bus.fire(Event::new("b", json!({}), Context::new()));

        assert_eq!(rx.recv().await.unwrap().event_type.as_str(), "a");
        assert_eq!(rx.recv().await.unwrap().event_type.as_str(), "b");
    }

    #[tokio::test]
    async fn test_typed_subscription() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_typed::<StateChangedData>();

        let entity_id = EntityId::new("sensor", "battery").unwrap();
        let state = State::new(entity_id.clone(), "42", HashMap::new(), Context::new());
        bus.fire_typed(
            StateChangedData {
                entity_id,
                old_state: None,
                new_state: Some(state),
            },
            Context::new(),
        );

        let received = rx.recv().await.unwrap();
        assert_eq!(received.data.entity_id.to_string(), "sensor.battery");
        assert_eq!(received.data.new_state.unwrap().state, "42");
    }

    #[tokio::test]
    async fn test_types_do_not_cross() {
        let bus = EventBus::new();
        let mut rx_a = bus.subscribe("a");
        let mut rx_b = bus.subscribe("b");

        bus.fire(Event::new("a", json!({"n": 1}), Context::new()));

        assert_eq!(rx_a.recv().await.unwrap().data["n"], 1);
        assert!(rx_b.try_recv().is_err());
        assert_eq!(bus.channel_count(), 2);
    }
}
