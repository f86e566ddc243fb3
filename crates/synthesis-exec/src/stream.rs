//! Ordered line fan-out shared by processes and patcher runs.
//!
//! A [`LineFanout`] hands every subscriber its own unbounded channel, so a
//! slow consumer never loses lines and each consumer sees them in publish
//! order. Subscribers complete (receive `None`) once the fan-out is closed
//! or every clone of it is dropped.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Which output channel a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// A decoded line tagged with its channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLine {
    pub stream: StreamKind,
    pub text: String,
}

impl OutputLine {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            stream: StreamKind::Stdout,
            text: text.into(),
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self {
            stream: StreamKind::Stderr,
            text: text.into(),
        }
    }
}

/// Multi-consumer, order-preserving line publisher.
#[derive(Debug, Clone, Default)]
pub struct LineFanout {
    subscribers: Arc<Mutex<Vec<UnboundedSender<String>>>>,
}

impl LineFanout {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<UnboundedSender<String>>> {
        // A poisoned list is still a valid list of senders.
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a new consumer. Lines published before this call are not replayed.
    pub fn subscribe(&self) -> UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    /// Deliver `line` to every live subscriber, forgetting closed ones.
    pub fn publish(&self, line: impl Into<String>) {
        let line = line.into();
        self.lock().retain(|tx| tx.send(line.clone()).is_ok());
    }

    /// Complete every current subscription.
    pub fn close(&self) {
        self.lock().clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }
}

/// Republish everything from `rx` into `fanout` until `rx` completes.
pub async fn forward(mut rx: UnboundedReceiver<String>, fanout: LineFanout) {
    while let Some(line) = rx.recv().await {
        fanout.publish(line);
    }
}

/// Drain `rx` into a vector.
pub async fn collect_lines(mut rx: UnboundedReceiver<String>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(line) = rx.recv().await {
        lines.push(line);
    }
    lines
}

/// Merge a stdout and a stderr receiver into one tagged stream.
///
/// Per-stream order is kept; interleaving between the two is arbitrary.
pub fn merge_streams(
    stdout: UnboundedReceiver<String>,
    stderr: UnboundedReceiver<String>,
) -> UnboundedReceiver<OutputLine> {
    let (tx, rx) = mpsc::unbounded_channel();
    spawn_tagger(stdout, tx.clone(), StreamKind::Stdout);
    spawn_tagger(stderr, tx, StreamKind::Stderr);
    rx
}

fn spawn_tagger(
    mut source: UnboundedReceiver<String>,
    tx: UnboundedSender<OutputLine>,
    stream: StreamKind,
) {
    tokio::spawn(async move {
        while let Some(text) = source.recv().await {
            if tx.send(OutputLine { stream, text }).is_err() {
                break;
            }
        }
    });
}
