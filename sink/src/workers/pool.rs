use std::collections::HashMap;
use std::future::Future;
use std::mem;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, warn, Instrument};

use crate::error::{ErrorKind, SinkError, SinkResult};
use crate::load::LoadResult;
use crate::sink_error;
use crate::types::StreamId;

type LoadHandle = JoinHandle<SinkResult<LoadResult>>;

/// Pool of load tasks.
///
/// At most `max_parallel_loads` tasks run at once and at most one per stream. Spawning a
/// load for a stream first waits for the previous load of that stream, and spawning while
/// every permit is taken waits for a free one, which holds the reader back.
#[derive(Debug)]
pub struct LoadWorkerPool {
    permits: Arc<Semaphore>,
    active: HashMap<StreamId, LoadHandle>,
}

impl LoadWorkerPool {
    pub fn new(max_parallel_loads: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_parallel_loads.max(1))),
            active: HashMap::new(),
        }
    }

    /// Starts `load` for `stream`.
    ///
    /// Fails with the error of the previous load of the stream, if that one failed, in which
    /// case `load` is not started.
    pub async fn spawn<F>(&mut self, stream: StreamId, load: F) -> SinkResult<()>
    where
        F: Future<Output = SinkResult<LoadResult>> + Send + 'static,
    {
        self.wait_stream(&stream).await?;

        let permit = self.permits.clone().acquire_owned().await.map_err(|err| {
            sink_error!(
                ErrorKind::InvalidState,
                "Load worker pool is closed",
                err
            )
        })?;

        debug!(%stream, in_flight = self.active.len() + 1, "starting load");
        let span = tracing::info_span!("load", stream = %stream);
        let handle = tokio::spawn(
            async move {
                let result = load.await;
                drop(permit);

                result
            }
            .instrument(span),
        );
        self.active.insert(stream, handle);

        Ok(())
    }

    /// Waits for the in-flight load of `stream`, if any.
    pub async fn wait_stream(&mut self, stream: &StreamId) -> SinkResult<Option<LoadResult>> {
        let Some(handle) = self.active.remove(stream) else {
            return Ok(None);
        };

        let result = join_result(stream, handle.await)?;
        Ok(Some(result))
    }

    /// Collects the loads that already finished, failing with their errors.
    pub async fn reap_finished(&mut self) -> SinkResult<Vec<(StreamId, LoadResult)>> {
        let finished: Vec<StreamId> = self
            .active
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(stream, _)| stream.clone())
            .collect();

        let mut results = Vec::with_capacity(finished.len());
        let mut errors = Vec::new();
        for stream in finished {
            match self.wait_stream(&stream).await {
                Ok(Some(result)) => results.push((stream, result)),
                Ok(None) => {}
                Err(err) => errors.push(err),
            }
        }

        if !errors.is_empty() {
            return Err(collect_errors(errors));
        }

        Ok(results)
    }

    /// Waits for every in-flight load.
    ///
    /// All loads are awaited even when some fail; their errors are returned together.
    pub async fn wait_all(&mut self) -> SinkResult<()> {
        let mut errors = Vec::new();
        for (stream, handle) in mem::take(&mut self.active) {
            if let Err(err) = join_result(&stream, handle.await) {
                errors.push(err);
            }
        }

        if !errors.is_empty() {
            return Err(collect_errors(errors));
        }

        Ok(())
    }

    /// Aborts every in-flight load.
    pub fn abort_all(&mut self) {
        for (stream, handle) in self.active.drain() {
            warn!(%stream, "aborting in-flight load");
            handle.abort();
        }
    }

    /// Returns the number of loads started and not yet awaited.
    pub fn in_flight(&self) -> usize {
        self.active.len()
    }
}

fn join_result(
    stream: &StreamId,
    joined: Result<SinkResult<LoadResult>, JoinError>,
) -> SinkResult<LoadResult> {
    match joined {
        Ok(result) => result,
        Err(err) if err.is_panic() => Err(sink_error!(
            ErrorKind::LoadWorkerPanic,
            "Load task panicked",
            format!("{stream}: {err}")
        )),
        Err(err) => Err(sink_error!(
            ErrorKind::LoadWorkerPanic,
            "Load task was cancelled",
            format!("{stream}: {err}")
        )),
    }
}

fn collect_errors(mut errors: Vec<SinkError>) -> SinkError {
    if errors.len() == 1 {
        if let Some(err) = errors.pop() {
            return err;
        }
    }

    SinkError::many(errors)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    fn done(rows: u64) -> LoadResult {
        LoadResult {
            rows_affected: rows,
            committed: true,
            attempts: 1,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn loads_of_one_stream_run_one_after_another() {
        let mut pool = LoadWorkerPool::new(4);
        let running = Arc::new(AtomicUsize::new(0));
        let max_running = Arc::new(AtomicUsize::new(0));

        for rows in 0..3 {
            let running = running.clone();
            let max_running = max_running.clone();
            pool.spawn(StreamId::from("users"), async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                max_running.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);

                Ok(done(rows))
            })
            .await
            .unwrap();
        }

        pool.wait_all().await.unwrap();
        assert_eq!(max_running.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn parallelism_is_bounded() {
        let mut pool = LoadWorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let max_running = Arc::new(AtomicUsize::new(0));

        for stream in ["a", "b", "c", "d"] {
            let running = running.clone();
            let max_running = max_running.clone();
            pool.spawn(StreamId::from(stream), async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                max_running.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);

                Ok(done(1))
            })
            .await
            .unwrap();
        }

        pool.wait_all().await.unwrap();
        assert!(max_running.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn failed_load_surfaces_on_next_spawn() {
        let mut pool = LoadWorkerPool::new(2);
        pool.spawn(StreamId::from("users"), async {
            Err(sink_error!(ErrorKind::DestinationFatal, "boom"))
        })
        .await
        .unwrap();

        let err = pool
            .spawn(StreamId::from("users"), async { Ok(done(1)) })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DestinationFatal);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn panicking_load_is_reported() {
        let mut pool = LoadWorkerPool::new(1);
        let explode = true;
        pool.spawn(StreamId::from("users"), async move {
            if explode {
                panic!("load exploded");
            }

            Ok(done(1))
        })
        .await
        .unwrap();

        let err = pool.wait_all().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LoadWorkerPanic);
    }
}
