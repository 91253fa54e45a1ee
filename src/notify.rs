//! Progress notifications.
//!
//! The pipeline reports each stage transition as a [`ProgressEvent`]
//! through a [`Notifier`]. Delivery is best-effort: a notifier never blocks
//! the pipeline, and a failed delivery is reported as
//! [`ClaimError::Transport`], which the controller logs and drops.

use tokio::sync::broadcast;

use crate::error::Result;
use crate::models::ProgressEvent;

/// Progress event capacity per broadcast channel.
const DEFAULT_CAPACITY: usize = 256;

/// Receives pipeline progress. Must not block.
pub trait Notifier: Send + Sync {
    fn emit(&self, agent: &str, status: &str, result: &str) -> Result<()>;
}

/// Fans progress out to every subscribed listener (SSE clients).
///
/// Cloning shares the underlying channel.
#[derive(Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<ProgressEvent>,
}

impl BroadcastNotifier {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for BroadcastNotifier {
    fn emit(&self, agent: &str, status: &str, result: &str) -> Result<()> {
        let event = ProgressEvent {
            agent: agent.to_string(),
            status: status.to_string(),
            result: result.to_string(),
        };
        // No listeners is normal: nobody has the dashboard open.
        let _ = self.tx.send(event);
        Ok(())
    }
}

/// Writes progress to the log. Used by the one-shot CLI commands.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn emit(&self, agent: &str, status: &str, result: &str) -> Result<()> {
        tracing::info!(agent, status, "{}", result);
        Ok(())
    }
}
