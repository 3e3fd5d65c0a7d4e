//! Scripted transport and recording sink shared by the unit tests.

use crate::error::{transport_error, Error, TransportErrorKind};
use crate::manager::FrameSink;
use crate::transport::{ByteStream, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use events::{EventFrame, ResourceId};
use futures_util::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// What the next `connect` call does.
pub(crate) enum Step {
    /// Succeed with a body fed through the paired [`Body`]; dropping it ends the stream.
    Stream(mpsc::UnboundedReceiver<Result<Bytes, Error>>),
    /// Succeed with a stream that never yields.
    Pending,
    /// Fail with a retryable network error.
    Fail,
    /// Fail with the given HTTP status.
    Reject(u16),
}

impl Step {
    pub(crate) fn stream() -> (Step, Body) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Step::Stream(rx), Body(tx))
    }
}

/// Server side of a scripted stream.
pub(crate) struct Body(mpsc::UnboundedSender<Result<Bytes, Error>>);

impl Body {
    pub(crate) fn send(&self, chunk: impl Into<String>) {
        let _ = self.0.send(Ok(Bytes::from(chunk.into())));
    }
}

/// Plays back queued [`Step`]s, then repeats a fallback step forever.
pub(crate) struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    fail_when_exhausted: bool,
    calls: Mutex<Vec<(ResourceId, Option<String>)>>,
}

impl Default for ScriptedTransport {
    /// Connects successfully once the script runs out.
    fn default() -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            fail_when_exhausted: false,
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedTransport {
    /// Fails every connect once the script runs out.
    pub(crate) fn failing() -> Self {
        Self {
            fail_when_exhausted: true,
            ..Self::default()
        }
    }

    pub(crate) fn push(&self, step: Step) {
        self.steps.lock().unwrap().push_back(step);
    }

    pub(crate) fn connects(&self, resource_id: &ResourceId) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == resource_id)
            .count()
    }

    pub(crate) fn last_event_ids(&self, resource_id: &ResourceId) -> Vec<Option<String>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == resource_id)
            .map(|(_, last)| last.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(
        &self,
        resource_id: &ResourceId,
        last_event_id: Option<&str>,
    ) -> Result<ByteStream, Error> {
        self.calls
            .lock()
            .unwrap()
            .push((resource_id.clone(), last_event_id.map(str::to_string)));

        let step = self.steps.lock().unwrap().pop_front();
        let step = step.unwrap_or(if self.fail_when_exhausted {
            Step::Fail
        } else {
            Step::Pending
        });

        match step {
            Step::Stream(rx) => Ok(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|chunk| (chunk, rx))
            })
            .boxed()),
            Step::Pending => Ok(stream::pending().boxed()),
            Step::Fail => Err(transport_error(
                TransportErrorKind::Network,
                "connection refused",
            )),
            Step::Reject(code) => Err(transport_error(
                TransportErrorKind::Status(code),
                "rejected",
            )),
        }
    }
}

/// Forwards every dispatched frame to a channel the test can await.
pub(crate) struct RecordingSink {
    tx: mpsc::UnboundedSender<(ResourceId, EventFrame)>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<(ResourceId, EventFrame)>>,
}

impl Default for RecordingSink {
    fn default() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
        }
    }
}

impl RecordingSink {
    pub(crate) async fn next(&self) -> Option<(ResourceId, EventFrame)> {
        self.rx.lock().await.recv().await
    }
}

impl FrameSink for RecordingSink {
    fn dispatch(&self, resource_id: &ResourceId, frame: &EventFrame) {
        let _ = self.tx.send((resource_id.clone(), frame.clone()));
    }
}
