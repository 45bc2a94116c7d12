use tracing::{error, info};

use crate::batch::Batch;
use crate::checkpoint::{CheckpointManager, StateEmitter};
use crate::destination::Destination;
use crate::error::SinkResult;
use crate::load::{LoadEngine, LoadResult};
use crate::schema::StreamSchema;
use crate::types::TableState;

/// Loading of one batch, followed by the commit of its watermark.
///
/// The task owns snapshots of the table state and schema taken when the batch was flushed,
/// so the reader can move on to newer versions while it runs.
#[derive(Debug)]
pub struct LoadTask<D, E> {
    engine: LoadEngine<D>,
    checkpoints: CheckpointManager<E>,
    batch: Batch,
    table: TableState,
    schema: StreamSchema,
}

impl<D, E> LoadTask<D, E>
where
    D: Destination,
    E: StateEmitter,
{
    pub fn new(
        engine: LoadEngine<D>,
        checkpoints: CheckpointManager<E>,
        batch: Batch,
        table: TableState,
        schema: StreamSchema,
    ) -> Self {
        Self {
            engine,
            checkpoints,
            batch,
            table,
            schema,
        }
    }

    pub async fn run(self) -> SinkResult<LoadResult> {
        let result = match self.engine.load(&self.batch, &self.table, &self.schema).await {
            Ok(result) => result,
            Err(err) => {
                error!(
                    stream = %self.batch.stream,
                    first_sequence = self.batch.first_sequence,
                    last_sequence = self.batch.last_sequence,
                    error = %err,
                    "batch load failed"
                );

                return Err(err);
            }
        };

        self.checkpoints
            .commit(&self.batch.stream, self.batch.last_sequence)
            .await?;

        info!(
            stream = %self.batch.stream,
            records = self.batch.len(),
            rows_affected = result.rows_affected,
            through = self.batch.last_sequence,
            "batch loaded"
        );

        Ok(result)
    }
}
