use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::checkpoint::StateEmitter;
use crate::error::SinkResult;
use crate::types::StreamId;

#[derive(Debug)]
struct PendingCheckpoint {
    token: Value,
    /// Sequence number each stream must be committed through before the token is emitted.
    dependencies: HashMap<StreamId, u64>,
}

#[derive(Debug, Default)]
struct Inner {
    pending: VecDeque<PendingCheckpoint>,
    committed: HashMap<StreamId, u64>,
    emitted: u64,
}

impl Inner {
    fn is_committed(&self, stream: &StreamId, through: u64) -> bool {
        self.committed
            .get(stream)
            .is_some_and(|committed| *committed >= through)
    }

    /// Removes the leading run of tokens whose dependencies are all committed.
    fn pop_ready(&mut self) -> Vec<Value> {
        let mut ready = Vec::new();
        while let Some(front) = self.pending.front() {
            let satisfied = front
                .dependencies
                .iter()
                .all(|(stream, through)| self.is_committed(stream, *through));
            if !satisfied {
                break;
            }

            if let Some(checkpoint) = self.pending.pop_front() {
                ready.push(checkpoint.token);
            }
        }

        ready
    }
}

/// Tracks checkpoint tokens until the data they cover is committed.
///
/// Tokens are emitted strictly in the order they were observed: a token whose dependencies
/// are committed still waits for every earlier token. Loads commit from worker tasks while
/// the reader observes new tokens, hence the shared state.
#[derive(Debug, Clone)]
pub struct CheckpointManager<E> {
    inner: Arc<Mutex<Inner>>,
    emitter: E,
}

impl<E> CheckpointManager<E>
where
    E: StateEmitter,
{
    pub fn new(emitter: E) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            emitter,
        }
    }

    /// Records `token`, depending on every stream in `watermarks` whose data is not yet
    /// committed through the given sequence number.
    ///
    /// Emits the token right away when nothing is pending.
    pub async fn observe(
        &self,
        token: Value,
        watermarks: HashMap<StreamId, u64>,
    ) -> SinkResult<()> {
        let mut inner = self.inner.lock().await;

        let dependencies: HashMap<StreamId, u64> = watermarks
            .into_iter()
            .filter(|(stream, through)| !inner.is_committed(stream, *through))
            .collect();
        debug!(
            dependencies = dependencies.len(),
            pending = inner.pending.len(),
            "observed checkpoint"
        );

        inner.pending.push_back(PendingCheckpoint {
            token,
            dependencies,
        });

        self.emit_ready(&mut inner).await
    }

    /// Marks the data of `stream` committed through sequence number `through` and emits the
    /// tokens that became ready.
    pub async fn commit(&self, stream: &StreamId, through: u64) -> SinkResult<()> {
        let mut inner = self.inner.lock().await;

        let committed = inner.committed.entry(stream.clone()).or_insert(0);
        *committed = (*committed).max(through);

        self.emit_ready(&mut inner).await
    }

    /// Returns the number of tokens waiting for commits.
    pub async fn pending(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    /// Returns the number of tokens emitted so far.
    pub async fn emitted(&self) -> u64 {
        self.inner.lock().await.emitted
    }

    async fn emit_ready(&self, inner: &mut Inner) -> SinkResult<()> {
        for token in inner.pop_ready() {
            self.emitter.emit(&token).await?;
            inner.emitted += 1;
        }

        if inner.pending.is_empty() {
            return Ok(());
        }

        debug!(pending = inner.pending.len(), "checkpoints waiting for loads");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::checkpoint::MemoryEmitter;

    fn watermarks(entries: &[(&str, u64)]) -> HashMap<StreamId, u64> {
        entries
            .iter()
            .map(|(stream, sequence)| (StreamId::from(*stream), *sequence))
            .collect()
    }

    #[tokio::test]
    async fn token_without_dependencies_is_emitted_immediately() {
        let emitter = MemoryEmitter::new();
        let manager = CheckpointManager::new(emitter.clone());

        manager.observe(json!({"a": 1}), HashMap::new()).await.unwrap();

        assert_eq!(emitter.emitted().await, vec![json!({"a": 1})]);
        assert_eq!(manager.pending().await, 0);
    }

    #[tokio::test]
    async fn token_waits_for_commit() {
        let emitter = MemoryEmitter::new();
        let manager = CheckpointManager::new(emitter.clone());

        manager
            .observe(json!(1), watermarks(&[("users", 10), ("orders", 4)]))
            .await
            .unwrap();
        manager.commit(&StreamId::from("users"), 10).await.unwrap();
        assert!(emitter.emitted().await.is_empty());

        manager.commit(&StreamId::from("orders"), 3).await.unwrap();
        assert!(emitter.emitted().await.is_empty());

        manager.commit(&StreamId::from("orders"), 4).await.unwrap();
        assert_eq!(emitter.emitted().await, vec![json!(1)]);
    }

    #[tokio::test]
    async fn ready_token_waits_behind_earlier_one() {
        let emitter = MemoryEmitter::new();
        let manager = CheckpointManager::new(emitter.clone());

        manager
            .observe(json!(1), watermarks(&[("users", 5)]))
            .await
            .unwrap();
        manager
            .observe(json!(2), watermarks(&[("orders", 2)]))
            .await
            .unwrap();

        manager.commit(&StreamId::from("orders"), 2).await.unwrap();
        assert!(emitter.emitted().await.is_empty());

        manager.commit(&StreamId::from("users"), 5).await.unwrap();
        assert_eq!(emitter.emitted().await, vec![json!(1), json!(2)]);
        assert_eq!(manager.emitted().await, 2);
    }

    #[tokio::test]
    async fn already_committed_watermarks_are_not_dependencies() {
        let emitter = MemoryEmitter::new();
        let manager = CheckpointManager::new(emitter.clone());

        manager.commit(&StreamId::from("users"), 7).await.unwrap();
        manager
            .observe(json!("s"), watermarks(&[("users", 7)]))
            .await
            .unwrap();

        assert_eq!(emitter.emitted().await, vec![json!("s")]);
    }
}
