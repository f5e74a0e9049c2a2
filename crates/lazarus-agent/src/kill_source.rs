//! Kill event sources
//!
//! The upstream killer delivers events and exposes an idempotent
//! acknowledge operation. The agent calls acknowledge exactly once per
//! processed event, only after the outcome record is durable.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;
use tracing::{info, warn};

use lazarus_common::{KillEvent, KillId, Result};

/// Inbound kill event contract
#[async_trait]
pub trait KillSource: Send + Sync {
    /// Next delivered event; `None` once the source is exhausted.
    async fn next_event(&self) -> Option<KillEvent>;

    /// Acknowledge a processed event upstream. Must be idempotent.
    async fn acknowledge(&self, kill_id: &str) -> Result<()>;
}

/// In-process source fed through a channel. Used by tests and embeddings.
pub struct ChannelKillSource {
    receiver: tokio::sync::Mutex<mpsc::Receiver<KillEvent>>,
    acknowledged: Mutex<Vec<KillId>>,
}

impl ChannelKillSource {
    pub fn new(capacity: usize) -> (Arc<Self>, mpsc::Sender<KillEvent>) {
        let (sender, receiver) = mpsc::channel(capacity);
        let source = Arc::new(ChannelKillSource {
            receiver: tokio::sync::Mutex::new(receiver),
            acknowledged: Mutex::new(Vec::new()),
        });
        (source, sender)
    }

    /// Kill ids acknowledged so far, in order.
    pub fn acknowledged(&self) -> Vec<KillId> {
        self.acknowledged.lock().clone()
    }
}

#[async_trait]
impl KillSource for ChannelKillSource {
    async fn next_event(&self) -> Option<KillEvent> {
        self.receiver.lock().await.recv().await
    }

    async fn acknowledge(&self, kill_id: &str) -> Result<()> {
        let mut acknowledged = self.acknowledged.lock();
        if !acknowledged.iter().any(|id| id == kill_id) {
            acknowledged.push(kill_id.to_string());
        }
        Ok(())
    }
}

/// Reads JSON-encoded kill events, one per line, from stdin. Malformed
/// lines are logged and skipped; acknowledgment is a log line.
pub struct StdinKillSource {
    lines: tokio::sync::Mutex<Lines<BufReader<Stdin>>>,
}

impl StdinKillSource {
    pub fn new() -> Self {
        StdinKillSource {
            lines: tokio::sync::Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

impl Default for StdinKillSource {
    fn default() -> Self {
        StdinKillSource::new()
    }
}

#[async_trait]
impl KillSource for StdinKillSource {
    async fn next_event(&self) -> Option<KillEvent> {
        let mut lines = self.lines.lock().await;
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => match serde_json::from_str::<KillEvent>(&line) {
                    Ok(event) => return Some(event),
                    Err(e) => {
                        warn!(error = %e, "skipping malformed kill event line");
                        continue;
                    }
                },
                Ok(None) => return None,
                Err(e) => {
                    warn!(error = %e, "stdin read failed");
                    return None;
                }
            }
        }
    }

    async fn acknowledge(&self, kill_id: &str) -> Result<()> {
        info!(kill_id = kill_id, "kill event acknowledged");
        Ok(())
    }
}
