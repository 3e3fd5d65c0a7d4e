use crate::backoff::Backoff;
use crate::connection::{Connection, ConnectionTask};
use crate::status::{StatusPublisher, StatusReporter};
use crate::transport::Transport;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use events::{ConnectionStatus, EventFrame, ResourceId};
use log::*;
use std::sync::Arc;

/// Receives every frame decoded from a resource's stream, in arrival order.
///
/// The manager only ever hands frames to a sink; it never holds listener
/// references itself.
pub trait FrameSink: Send + Sync {
    fn dispatch(&self, resource_id: &ResourceId, frame: &EventFrame);
}

/// Owns at most one streamed connection per resource and its reconnect lifecycle.
///
/// `open` and `close` spawn and abort tokio tasks, so they must be called from
/// within a tokio runtime.
pub struct Manager {
    transport: Arc<dyn Transport>,
    sink: Arc<dyn FrameSink>,
    backoff: Backoff,
    connections: DashMap<ResourceId, Connection>,
}

impl Manager {
    pub fn new(transport: Arc<dyn Transport>, sink: Arc<dyn FrameSink>, backoff: Backoff) -> Self {
        Self {
            transport,
            sink,
            backoff,
            connections: DashMap::new(),
        }
    }

    /// Open the stream for a resource, or return the one already open.
    ///
    /// Never fails: transport problems are reported through the returned publisher.
    /// A connection that has given up is restarted with a fresh attempt count, even
    /// if its task is still winding down after reporting the error.
    pub fn open(&self, resource_id: &ResourceId) -> StatusPublisher {
        match self.connections.entry(resource_id.clone()) {
            Entry::Occupied(mut entry) => {
                let connection = entry.get_mut();
                if connection.has_given_up() {
                    info!("Restarting event stream for {}", resource_id);
                    connection.task.abort();
                    connection.task = self.spawn_task(resource_id, &connection.reporter);
                } else {
                    debug!("Reusing open event stream for {}", resource_id);
                }
                connection.reporter.publisher()
            }
            Entry::Vacant(entry) => {
                let reporter = Arc::new(StatusReporter::new(
                    resource_id.clone(),
                    self.backoff.max_attempts,
                ));
                let task = self.spawn_task(resource_id, &reporter);
                let publisher = reporter.publisher();
                entry.insert(Connection { reporter, task });

                info!("Opened event stream for {}", resource_id);
                publisher
            }
        }
    }

    /// Tear down a resource's stream. Unknown or already closed resources are a no-op.
    pub fn close(&self, resource_id: &ResourceId) {
        if let Some((_, connection)) = self.connections.remove(resource_id) {
            connection.shutdown();
            info!("Closed event stream for {}", resource_id);
        }
    }

    /// Close every open stream, e.g. at application shutdown.
    pub fn close_all(&self) {
        let resource_ids: Vec<ResourceId> =
            self.connections.iter().map(|c| c.key().clone()).collect();
        for resource_id in resource_ids {
            self.close(&resource_id);
        }
    }

    /// Current health of a resource's stream, if one is open.
    pub fn status(&self, resource_id: &ResourceId) -> Option<ConnectionStatus> {
        self.connections
            .get(resource_id)
            .map(|c| c.reporter.snapshot())
    }

    pub fn publisher(&self, resource_id: &ResourceId) -> Option<StatusPublisher> {
        self.connections
            .get(resource_id)
            .map(|c| c.reporter.publisher())
    }

    pub fn is_open(&self, resource_id: &ResourceId) -> bool {
        self.connections.contains_key(resource_id)
    }

    pub fn open_count(&self) -> usize {
        self.connections.len()
    }

    fn spawn_task(
        &self,
        resource_id: &ResourceId,
        reporter: &Arc<StatusReporter>,
    ) -> tokio::task::JoinHandle<()> {
        ConnectionTask {
            resource_id: resource_id.clone(),
            transport: Arc::clone(&self.transport),
            sink: Arc::clone(&self.sink),
            backoff: self.backoff,
            reporter: Arc::clone(reporter),
        }
        .spawn()
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        for entry in self.connections.iter() {
            entry.value().task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingSink, ScriptedTransport, Step};
    use events::{ConnectionState, Status};
    use serde_json::json;
    use std::time::Duration;

    const MAX: u32 = 10;

    fn status(state: ConnectionState, attempts: u32) -> ConnectionStatus {
        ConnectionStatus::new(state, attempts, MAX)
    }

    fn manager(transport: &Arc<ScriptedTransport>) -> (Manager, Arc<RecordingSink>) {
        manager_with(transport, Backoff::default())
    }

    fn manager_with(
        transport: &Arc<ScriptedTransport>,
        backoff: Backoff,
    ) -> (Manager, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let manager = Manager::new(transport.clone(), sink.clone(), backoff);
        (manager, sink)
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_is_idempotent() {
        let transport = Arc::new(ScriptedTransport::default());
        let (manager, _sink) = manager(&transport);
        let post = ResourceId::new("post-1");

        let mut first = manager.open(&post);
        manager.open(&post);
        assert_eq!(first.changed().await.map(|s| s.status), Some(Status::Connected));

        assert_eq!(manager.open_count(), 1);
        assert_eq!(transport.connects(&post), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_are_dispatched_in_order() {
        let transport = Arc::new(ScriptedTransport::default());
        let (stream, body) = Step::stream();
        transport.push(stream);
        let (manager, sink) = manager(&transport);
        let post = ResourceId::new("post-1");
        manager.open(&post);

        for i in 0..5 {
            body.send(format!("event: comment.created\ndata: {{\"n\":{i}}}\n\n"));
        }

        for i in 0..5 {
            let (resource_id, frame) = sink.next().await.unwrap();
            assert_eq!(resource_id, post);
            assert_eq!(frame.payload, json!({ "n": i }));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frame_keeps_connection_open() {
        let transport = Arc::new(ScriptedTransport::default());
        let (stream, body) = Step::stream();
        transport.push(stream);
        let (manager, sink) = manager(&transport);
        let post = ResourceId::new("post-1");
        manager.open(&post);

        body.send("event: comment.created\ndata: {\"id\":\"c1\"}\n\n");
        body.send("event: comment.created\ndata: {\"id\":\n\n");
        body.send("event: comment.created\ndata: {\"id\":\"c3\"}\n\n");

        assert_eq!(sink.next().await.unwrap().1.payload, json!({ "id": "c1" }));
        assert_eq!(sink.next().await.unwrap().1.payload, json!({ "id": "c3" }));
        assert_eq!(manager.status(&post), Some(status(ConnectionState::Connected, 0)));
        assert_eq!(transport.connects(&post), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_status_sequence() {
        let transport = Arc::new(ScriptedTransport::default());
        let (stream, body) = Step::stream();
        transport.push(stream);
        transport.push(Step::Fail);
        transport.push(Step::Fail);
        let (manager, _sink) = manager(&transport);
        let post = ResourceId::new("post-1");

        let publisher = manager.open(&post);
        let mut transitions = publisher.transitions();

        assert_eq!(transitions.recv().await.unwrap(), status(ConnectionState::Connected, 0));
        // Server drops the stream
        drop(body);

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(transitions.recv().await.unwrap());
        }
        assert_eq!(
            seen,
            vec![
                status(ConnectionState::Disconnected, 1),
                status(ConnectionState::Disconnected, 2),
                status(ConnectionState::Disconnected, 3),
                status(ConnectionState::Connected, 0),
            ]
        );
        assert_eq!(transport.connects(&post), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let transport = Arc::new(ScriptedTransport::failing());
        let (manager, _sink) = manager(&transport);
        let post = ResourceId::new("post-1");

        let publisher = manager.open(&post);
        let mut transitions = publisher.transitions();

        for attempt in 1..=MAX {
            assert_eq!(
                transitions.recv().await.unwrap(),
                status(ConnectionState::Disconnected, attempt)
            );
        }
        assert_eq!(transitions.recv().await.unwrap(), status(ConnectionState::Error, MAX));

        // Nothing else is scheduled, however long we wait
        tokio::time::sleep(Duration::from_secs(24 * 60 * 60)).await;
        assert_eq!(transport.connects(&post), 1 + MAX as usize);
        assert_eq!(manager.status(&post), Some(status(ConnectionState::Error, MAX)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_delays_double() {
        let transport = Arc::new(ScriptedTransport::failing());
        let (manager, _sink) = manager(&transport);
        let post = ResourceId::new("post-1");

        let publisher = manager.open(&post);
        let mut transitions = publisher.transitions();

        // Retry n fires base * 2^(n-1) after the previous failure
        transitions.recv().await.unwrap();
        let mut previous = tokio::time::Instant::now();
        for expected in [1, 2, 4, 8] {
            transitions.recv().await.unwrap();
            let now = tokio::time::Instant::now();
            let waited = now - previous;
            assert!(waited >= Duration::from_secs(expected));
            assert!(waited < Duration::from_secs(expected) + Duration::from_millis(50));
            previous = now;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_handshake_is_retried_with_backoff() {
        let transport = Arc::new(ScriptedTransport::default());
        // An expired token: the next attempt asks the token provider again
        transport.push(Step::Reject(401));
        let (manager, _sink) = manager(&transport);
        let post = ResourceId::new("post-1");

        let publisher = manager.open(&post);
        let mut transitions = publisher.transitions();

        assert_eq!(
            transitions.recv().await.unwrap(),
            status(ConnectionState::Disconnected, 1)
        );
        assert_eq!(transitions.recv().await.unwrap(), status(ConnectionState::Connected, 0));
        assert_eq!(transport.connects(&post), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_restarts_failed_connection() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push(Step::Reject(503));
        transport.push(Step::Reject(401));
        let (manager, _sink) = manager_with(&transport, Backoff::new(1));
        let post = ResourceId::new("post-1");

        let mut publisher = manager.open(&post);
        assert_eq!(publisher.changed().await.map(|s| s.status), Some(Status::Disconnected));
        assert_eq!(publisher.changed().await.map(|s| s.status), Some(Status::Error));

        // Reopen as soon as the error is visible, whether or not the task has returned
        manager.open(&post);
        while publisher.changed().await.map(|s| s.status) != Some(Status::Connected) {}
        assert_eq!(publisher.snapshot().reconnect_attempts, 0);
        assert_eq!(transport.connects(&post), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_pending_reconnect() {
        let transport = Arc::new(ScriptedTransport::failing());
        let (manager, _sink) = manager(&transport);
        let post = ResourceId::new("post-1");

        let mut publisher = manager.open(&post);
        assert_eq!(
            publisher.changed().await,
            Some(status(ConnectionState::Disconnected, 1))
        );

        manager.close(&post);
        tokio::time::sleep(Duration::from_secs(600)).await;

        assert_eq!(transport.connects(&post), 1);
        assert!(!manager.is_open(&post));
        assert_eq!(manager.status(&post), None);
        // Closing is not reported as a failure
        assert_eq!(publisher.snapshot().status, Status::Disconnected);
        assert_eq!(publisher.snapshot().reconnect_attempts, 0);

        // Closing again is a no-op
        manager.close(&post);
        manager.close(&ResourceId::new("never-opened"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_resumes_from_last_event_id() {
        let transport = Arc::new(ScriptedTransport::default());
        let (stream, body) = Step::stream();
        transport.push(stream);
        let (manager, sink) = manager(&transport);
        let post = ResourceId::new("post-1");
        let publisher = manager.open(&post);
        let mut transitions = publisher.transitions();

        body.send("id: 41\nevent: comment.created\ndata: {\"id\":\"c1\"}\n\n");
        assert_eq!(sink.next().await.unwrap().1.id.as_deref(), Some("41"));
        assert_eq!(transitions.recv().await.unwrap(), status(ConnectionState::Connected, 0));
        drop(body);

        assert_eq!(transitions.recv().await.unwrap(), status(ConnectionState::Disconnected, 1));
        assert_eq!(transitions.recv().await.unwrap(), status(ConnectionState::Connected, 0));
        assert_eq!(
            transport.last_event_ids(&post),
            vec![None, Some("41".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_all() {
        let transport = Arc::new(ScriptedTransport::default());
        let (manager, _sink) = manager(&transport);

        manager.open(&ResourceId::new("post-1"));
        manager.open(&ResourceId::new("post-2"));
        assert_eq!(manager.open_count(), 2);

        manager.close_all();
        assert_eq!(manager.open_count(), 0);
    }
}
