// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Hosting Events
//
// In-memory lifecycle event streaming over tokio broadcast channels.
// Subscribers that fall behind lose the oldest events.

use crate::domain::events::HostingEvent;
use crate::domain::identity::ApplicationId;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Event bus for publishing and subscribing to hosting events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<HostingEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: HostingEvent) {
        debug!("Publishing event: {:?}", event);

        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all hosting events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to events concerning one application
    pub fn subscribe_application(&self, app_id: ApplicationId) -> ApplicationEventReceiver {
        ApplicationEventReceiver {
            receiver: self.sender.subscribe(),
            app_id,
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Receiver for all hosting events
pub struct EventReceiver {
    receiver: broadcast::Receiver<HostingEvent>,
}

impl EventReceiver {
    /// Receive the next event (waits until one is available)
    pub async fn recv(&mut self) -> Result<HostingEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<HostingEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }

    /// Drain everything currently buffered
    pub fn drain(&mut self) -> Vec<HostingEvent> {
        let mut events = Vec::new();
        loop {
            match self.try_recv() {
                Ok(event) => events.push(event),
                Err(EventBusError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        events
    }
}

/// Receiver filtered to a single application
pub struct ApplicationEventReceiver {
    receiver: broadcast::Receiver<HostingEvent>,
    app_id: ApplicationId,
}

impl ApplicationEventReceiver {
    /// Receive the next event for this application, skipping all others
    pub async fn recv(&mut self) -> Result<HostingEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if event.app_id() == Some(&self.app_id) {
                return Ok(event);
            }
        }
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        event_bus.publish(HostingEvent::ContextCreated {
            app_id: ApplicationId::new("shop"),
            instance_id: "shop-1-0".to_string(),
            created_at: Utc::now(),
        });

        match receiver.recv().await.unwrap() {
            HostingEvent::ContextCreated { app_id, .. } => assert_eq!(app_id, ApplicationId::new("SHOP")),
            other => panic!("Wrong event type received: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_application_event_filtering() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe_application(ApplicationId::new("blog"));

        event_bus.publish(HostingEvent::ContextTornDown {
            app_id: ApplicationId::new("shop"),
            instance_id: "shop-1-0".to_string(),
            torn_down_at: Utc::now(),
        });
        event_bus.publish(HostingEvent::ApplicationsSuspended {
            count: 2,
            suspended_at: Utc::now(),
        });
        event_bus.publish(HostingEvent::ContextTornDown {
            app_id: ApplicationId::new("blog"),
            instance_id: "blog-2-0".to_string(),
            torn_down_at: Utc::now(),
        });

        match receiver.recv().await.unwrap() {
            HostingEvent::ContextTornDown { instance_id, .. } => assert_eq!(instance_id, "blog-2-0"),
            other => panic!("Wrong event type received: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();
        assert_eq!(event_bus.subscriber_count(), 2);

        event_bus.publish(HostingEvent::ApplicationsResumed {
            count: 1,
            resumed_at: Utc::now(),
        });

        let _ = receiver1.recv().await.unwrap();
        let _ = receiver2.recv().await.unwrap();
        assert!(matches!(receiver1.try_recv(), Err(EventBusError::Empty)));
    }
}
