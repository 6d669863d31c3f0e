//! The host event bus.
//!
//! A typed publish/subscribe channel decoupling the lifecycle manager
//! from whatever surface observes it (a window shell, the CLI, tests).
//! Emission never blocks and never fails: with no subscribers the
//! event is simply dropped, and a slow subscriber misses old events
//! rather than stalling the manager.

use deskhand_types::HostEvent;
use tokio::sync::broadcast;

const BUS_CAPACITY: usize = 64;

/// Cloneable handle to the host's lifecycle event channel.
#[derive(Clone)]
pub struct HostEventBus {
    tx: broadcast::Sender<HostEvent>,
}

impl HostEventBus {
    /// A bus with no subscribers yet.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Subscribe to events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.tx.subscribe()
    }

    /// Publish one event to all current subscribers.
    pub fn emit(&self, event: HostEvent) {
        tracing::debug!(plugin = event.plugin_name(), ?event, "host event");
        let _ = self.tx.send(event);
    }
}

impl Default for HostEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HostEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostEventBus")
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_see_emitted_events() {
        let bus = HostEventBus::new();
        let mut rx = bus.subscribe();
        bus.emit(HostEvent::PluginLoaded { name: "demo".into() });
        assert_eq!(
            rx.try_recv().unwrap(),
            HostEvent::PluginLoaded { name: "demo".into() }
        );
    }

    #[test]
    fn emit_without_subscribers_is_fine() {
        let bus = HostEventBus::new();
        bus.emit(HostEvent::PluginUnloaded { name: "demo".into() });
    }

    #[test]
    fn subscription_starts_at_the_present() {
        let bus = HostEventBus::new();
        bus.emit(HostEvent::PluginLoaded { name: "old".into() });
        let mut rx = bus.subscribe();
        bus.emit(HostEvent::PluginLoaded { name: "new".into() });
        assert_eq!(rx.try_recv().unwrap().plugin_name(), "new");
        assert!(rx.try_recv().is_err());
    }
}
