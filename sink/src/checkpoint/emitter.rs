use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::SinkResult;

/// Receives checkpoint tokens that are safe to publish.
pub trait StateEmitter {
    fn emit(&self, state: &Value) -> impl Future<Output = SinkResult<()>> + Send;
}

/// Writes every checkpoint as one JSON line on standard output.
#[derive(Debug, Clone, Default)]
pub struct StdoutEmitter;

impl StdoutEmitter {
    pub fn new() -> Self {
        Self
    }
}

impl StateEmitter for StdoutEmitter {
    async fn emit(&self, state: &Value) -> SinkResult<()> {
        let mut line = serde_json::to_vec(state)?;
        line.push(b'\n');

        let mut stdout = tokio::io::stdout();
        stdout.write_all(&line).await?;
        stdout.flush().await?;

        Ok(())
    }
}

/// Keeps emitted checkpoints in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryEmitter {
    emitted: Arc<Mutex<Vec<Value>>>,
}

impl MemoryEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the checkpoints emitted so far, in emission order.
    pub async fn emitted(&self) -> Vec<Value> {
        self.emitted.lock().await.clone()
    }
}

impl StateEmitter for MemoryEmitter {
    async fn emit(&self, state: &Value) -> SinkResult<()> {
        self.emitted.lock().await.push(state.clone());

        Ok(())
    }
}
