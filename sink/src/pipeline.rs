use std::io;
use std::time::Duration;

use futures::StreamExt;
use sink_config::shared::TargetConfig;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::checkpoint::StateEmitter;
use crate::concurrency::shutdown::{create_shutdown_channel, ShutdownRx, ShutdownTx};
use crate::concurrency::stream::{TimeoutStream, TimeoutStreamResult};
use crate::destination::Destination;
use crate::error::{ErrorKind, SinkError, SinkResult};
use crate::reader::{MessageReader, RunSummary};
use crate::sink_error;

/// Idle tick used when buffers have no age limit.
const DEFAULT_IDLE_TICK: Duration = Duration::from_secs(1);

/// Smallest idle tick, bounding how often an idle pipeline wakes up.
const MIN_IDLE_TICK: Duration = Duration::from_millis(10);

enum Stop {
    EndOfInput,
    Shutdown,
}

/// Reads the message stream and runs it through a [`MessageReader`].
///
/// A shutdown request stops the reading: in-flight loads are given `drain_timeout_ms` to
/// complete and buffered records are left unloaded, so their checkpoints are not emitted.
#[derive(Debug)]
pub struct Pipeline<D, E> {
    reader: MessageReader<D, E>,
    shutdown_tx: ShutdownTx,
    shutdown_rx: ShutdownRx,
    drain_timeout: Duration,
    idle_tick: Duration,
    fill_limit: bool,
}

impl<D, E> Pipeline<D, E>
where
    D: Destination + Clone + Send + Sync + 'static,
    E: StateEmitter + Clone + Send + Sync + 'static,
{
    pub fn new(config: &TargetConfig, destination: D, emitter: E) -> Self {
        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
        let idle_tick = config
            .max_batch_fill_ms
            .map(|ms| (Duration::from_millis(ms) / 2).max(MIN_IDLE_TICK))
            .unwrap_or(DEFAULT_IDLE_TICK);

        Self {
            reader: MessageReader::new(config, destination, emitter),
            shutdown_tx,
            shutdown_rx,
            drain_timeout: Duration::from_millis(config.drain_timeout_ms),
            idle_tick,
            fill_limit: config.max_batch_fill_ms.is_some(),
        }
    }

    /// Returns a handle requesting the pipeline to stop.
    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Processes `input` until it ends, a shutdown is requested or an error stops the run.
    pub async fn run<R>(mut self, input: R) -> SinkResult<RunSummary>
    where
        R: AsyncBufRead + Unpin,
    {
        info!("starting pipeline");

        let lines = futures::stream::unfold(input.lines(), |mut lines| async move {
            match lines.next_line().await {
                Ok(Some(line)) => Some((Ok(line), lines)),
                Ok(None) => None,
                Err(err) => Some((Err(err), lines)),
            }
        });
        let lines = TimeoutStream::wrap(lines, self.idle_tick);
        tokio::pin!(lines);

        let stop = loop {
            let item = tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    info!("shutdown requested, stopping input");
                    break Stop::Shutdown;
                }
                item = lines.next() => item,
            };

            let result = match item {
                None => break Stop::EndOfInput,
                Some(TimeoutStreamResult::Timeout) => {
                    self.reader.flush_expired(Instant::now()).await
                }
                Some(TimeoutStreamResult::Value(Ok(line))) => {
                    self.process_line(&line).await
                }
                Some(TimeoutStreamResult::Value(Err(err))) => Err(read_error(err)),
            };

            if let Err(err) = result {
                error!(error = %err, "stopping pipeline after error");
                if let Err(drain_err) = self.drain_loads().await {
                    warn!(error = %drain_err, "in-flight loads failed while stopping");
                }

                return Err(err);
            }
        };

        match stop {
            Stop::EndOfInput => self.reader.finish().await,
            Stop::Shutdown => {
                self.reader.interrupt();
                self.drain_loads().await?;
                info!("pipeline stopped on shutdown request");

                Ok(self.reader.summary().clone())
            }
        }
    }

    async fn process_line(&mut self, line: &str) -> SinkResult<()> {
        self.reader.process_line(line).await?;
        if self.fill_limit {
            self.reader.flush_expired(Instant::now()).await?;
        }

        Ok(())
    }

    /// Waits for in-flight loads for at most the drain timeout, aborting them afterwards.
    async fn drain_loads(&mut self) -> SinkResult<()> {
        match tokio::time::timeout(self.drain_timeout, self.reader.wait_loads()).await {
            Ok(result) => result,
            Err(_) => {
                self.reader.abort_loads();

                Err(sink_error!(
                    ErrorKind::DrainTimeout,
                    "In-flight loads did not complete in time",
                    format!("{}ms", self.drain_timeout.as_millis())
                ))
            }
        }
    }
}

/// Converts an input read failure, reporting lines that are not UTF-8 as malformed input.
fn read_error(err: io::Error) -> SinkError {
    if err.kind() == io::ErrorKind::InvalidData {
        return sink_error!(
            ErrorKind::ProtocolError,
            "Input line is not valid UTF-8",
            err
        );
    }

    err.into()
}
