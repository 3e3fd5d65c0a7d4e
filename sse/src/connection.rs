use crate::backoff::Backoff;
use crate::decoder::FrameDecoder;
use crate::manager::FrameSink;
use crate::status::StatusReporter;
use crate::transport::{ByteStream, Transport};
use events::{ConnectionState, ResourceId};
use futures_util::stream::StreamExt;
use log::*;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// A live connection as tracked by the manager: the status it reports and the task
/// that owns its transport.
pub(crate) struct Connection {
    pub(crate) reporter: Arc<StatusReporter>,
    pub(crate) task: JoinHandle<()>,
}

impl Connection {
    /// Abort the task, cancelling any in-flight request or pending backoff timer.
    pub(crate) fn shutdown(self) {
        self.reporter.close();
        self.task.abort();
    }

    /// Whether the connection stopped retrying. The status flips to error just
    /// before the task returns, so either signal counts.
    pub(crate) fn has_given_up(&self) -> bool {
        self.reporter.state() == ConnectionState::Error || self.task.is_finished()
    }
}

/// Runs one resource's stream: connect, pump frames into the sink, and on any
/// transport drop schedule a reconnect with backoff until the attempt cap.
pub(crate) struct ConnectionTask {
    pub(crate) resource_id: ResourceId,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) sink: Arc<dyn FrameSink>,
    pub(crate) backoff: Backoff,
    pub(crate) reporter: Arc<StatusReporter>,
}

impl ConnectionTask {
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut attempts: u32 = 0;
        let mut decoder = FrameDecoder::new();

        loop {
            self.reporter.report(ConnectionState::Connecting, attempts);

            match self
                .transport
                .connect(&self.resource_id, decoder.last_event_id())
                .await
            {
                Ok(stream) => {
                    if attempts > 0 {
                        info!(
                            "Reconnected event stream for {} after {} attempt(s)",
                            self.resource_id, attempts
                        );
                    } else {
                        info!("Connected event stream for {}", self.resource_id);
                    }
                    attempts = 0;
                    self.reporter.report(ConnectionState::Connected, 0);

                    self.pump(stream, &mut decoder).await;
                    decoder.reset();
                }
                Err(e) if !e.is_retryable() => {
                    error!(
                        "Event stream request for {} can never succeed: {}",
                        self.resource_id, e
                    );
                    self.reporter.report(ConnectionState::Error, attempts);
                    return;
                }
                Err(e) => {
                    warn!("Event stream for {} failed: {}", self.resource_id, e);
                }
            }

            if !self.backoff.should_retry(attempts) {
                error!(
                    "Giving up on event stream for {} after {} reconnect attempt(s)",
                    self.resource_id, attempts
                );
                self.reporter.report(ConnectionState::Error, attempts);
                return;
            }

            let delay = self.backoff.delay(attempts);
            attempts += 1;
            debug!(
                "Reconnecting event stream for {} in {:?} (attempt {}/{})",
                self.resource_id, delay, attempts, self.backoff.max_attempts
            );
            self.reporter.report(ConnectionState::Disconnected, attempts);

            tokio::time::sleep(delay).await;
        }
    }

    /// Read the stream until it ends or fails, dispatching frames in arrival order.
    async fn pump(&self, mut stream: ByteStream, decoder: &mut FrameDecoder) {
        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Event stream for {} dropped: {}", self.resource_id, e);
                    return;
                }
            };

            for result in decoder.feed(&bytes) {
                // A close can land between two frames of the same chunk
                if self.reporter.is_closed() {
                    return;
                }
                match result {
                    Ok(frame) => self.sink.dispatch(&self.resource_id, &frame),
                    Err(e) => warn!(
                        "Dropping malformed frame on {}: {}",
                        self.resource_id, e
                    ),
                }
            }
        }

        info!("Event stream for {} ended", self.resource_id);
    }
}
