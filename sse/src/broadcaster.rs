use crate::backoff::Backoff;
use crate::error::listener_error;
use crate::manager::{FrameSink, Manager};
use crate::status::StatusPublisher;
use crate::transport::Transport;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use events::{ConnectionStatus, EventFrame, ListenerId, ResourceId};
use log::*;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

/// Error a listener may return; it is logged and never stops delivery to others.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// A registered frame callback.
pub type Listener = Arc<dyn Fn(&EventFrame) -> Result<(), ListenerError> + Send + Sync>;

/// Listeners per resource, in registration order.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: DashMap<ResourceId, Vec<(ListenerId, Listener)>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listener_count(&self, resource_id: &ResourceId) -> usize {
        self.listeners
            .get(resource_id)
            .map_or(0, |listeners| listeners.len())
    }

    /// Copy of the current listeners, so no registry lock is held while they run.
    fn snapshot(&self, resource_id: &ResourceId) -> Vec<(ListenerId, Listener)> {
        self.listeners
            .get(resource_id)
            .map(|listeners| listeners.value().clone())
            .unwrap_or_default()
    }
}

impl FrameSink for ListenerRegistry {
    /// Call every listener registered at dispatch start, in registration order.
    ///
    /// Listeners added or removed by a listener during this dispatch take effect from
    /// the next frame onward. A failing or panicking listener is logged and skipped.
    fn dispatch(&self, resource_id: &ResourceId, frame: &EventFrame) {
        let listeners = self.snapshot(resource_id);
        trace!(
            "Dispatching `{}` on {} to {} listener(s)",
            frame.kind,
            resource_id,
            listeners.len()
        );

        for (listener_id, listener) in listeners {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(frame))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    "Listener {} on {} failed to handle `{}`: {}",
                    listener_id,
                    resource_id,
                    frame.kind,
                    listener_error(e)
                ),
                Err(_) => error!(
                    "Listener {} on {} panicked while handling `{}`",
                    listener_id, resource_id, frame.kind
                ),
            }
        }
    }
}

struct Inner {
    registry: Arc<ListenerRegistry>,
    manager: Manager,
}

impl Inner {
    fn unsubscribe(&self, resource_id: &ResourceId, listener_id: ListenerId) {
        if let Entry::Occupied(mut entry) = self.listeners().entry(resource_id.clone()) {
            entry.get_mut().retain(|(id, _)| *id != listener_id);
            if entry.get().is_empty() {
                // Close under the entry lock so a concurrent subscribe cannot slip in
                // between the last removal and the teardown
                self.manager.close(resource_id);
                entry.remove();
            }
        }
    }

    fn listeners(&self) -> &DashMap<ResourceId, Vec<(ListenerId, Listener)>> {
        &self.registry.listeners
    }
}

/// Process-wide fan-out of post event streams to in-process listeners.
///
/// Create one per application and hand clones to consumers. The first listener of a
/// resource opens its stream, the last one to leave closes it.
#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<Inner>,
}

impl Broadcaster {
    pub fn new(transport: Arc<dyn Transport>, backoff: Backoff) -> Self {
        let registry = Arc::new(ListenerRegistry::new());
        let manager = Manager::new(transport, registry.clone(), backoff);

        Self {
            inner: Arc::new(Inner { registry, manager }),
        }
    }

    /// Register a callback for every future frame of a resource.
    ///
    /// Must be called within a tokio runtime, since the first subscriber of a resource
    /// spawns its connection.
    pub fn subscribe<F>(&self, resource_id: impl Into<ResourceId>, listener: F) -> Subscription
    where
        F: Fn(&EventFrame) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        let resource_id = resource_id.into();
        let listener_id = ListenerId::new();
        let listener: Listener = Arc::new(listener);

        match self.inner.listeners().entry(resource_id.clone()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().push((listener_id, listener));
                // Restarts the stream if it gave up, otherwise a no-op
                self.inner.manager.open(&resource_id);
            }
            Entry::Vacant(entry) => {
                let _listeners = entry.insert(vec![(listener_id, listener)]);
                self.inner.manager.open(&resource_id);
            }
        }
        debug!("Subscribed listener {} to {}", listener_id, resource_id);

        Subscription {
            resource_id,
            listener_id,
            inner: Arc::downgrade(&self.inner),
            active: true,
        }
    }

    /// Deliver a frame to every listener of a resource on the calling context.
    pub fn dispatch(&self, resource_id: &ResourceId, frame: &EventFrame) {
        self.inner.registry.dispatch(resource_id, frame);
    }

    pub fn listener_count(&self, resource_id: &ResourceId) -> usize {
        self.inner.registry.listener_count(resource_id)
    }

    /// Latest connection health of a resource, if it has listeners.
    pub fn status(&self, resource_id: &ResourceId) -> Option<ConnectionStatus> {
        self.inner.manager.status(resource_id)
    }

    pub fn publisher(&self, resource_id: &ResourceId) -> Option<StatusPublisher> {
        self.inner.manager.publisher(resource_id)
    }

    pub fn manager(&self) -> &Manager {
        &self.inner.manager
    }

    /// Drop every listener and close every stream.
    pub fn shutdown(&self) {
        self.inner.listeners().clear();
        self.inner.manager.close_all();
        info!("Event stream broadcaster shut down");
    }
}

/// Token for one listener registration.
///
/// Unsubscribes when [`Subscription::unsubscribe`] is called or when dropped.
#[must_use = "dropping a Subscription unsubscribes its listener"]
pub struct Subscription {
    resource_id: ResourceId,
    listener_id: ListenerId,
    inner: Weak<Inner>,
    active: bool,
}

impl Subscription {
    pub fn resource_id(&self) -> &ResourceId {
        &self.resource_id
    }

    pub fn listener_id(&self) -> ListenerId {
        self.listener_id
    }

    /// Stop delivery to this listener from the next frame onward. Unsubscribing the
    /// last listener of a resource closes its stream.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !std::mem::take(&mut self.active) {
            return;
        }
        if let Some(inner) = self.inner.upgrade() {
            inner.unsubscribe(&self.resource_id, self.listener_id);
            debug!(
                "Unsubscribed listener {} from {}",
                self.listener_id, self.resource_id
            );
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}
