use std::time::Duration;

use rand::random_range;
use sink_config::shared::RetryConfig;
use tracing::{debug, info, warn};

use crate::batch::Batch;
use crate::destination::Destination;
use crate::error::SinkResult;
use crate::load::WritePlan;
use crate::schema::StreamSchema;
use crate::types::TableState;

/// Outcome of loading one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadResult {
    pub rows_affected: u64,
    pub committed: bool,
    /// Number of write attempts, the successful one included.
    pub attempts: u32,
}

/// Loads batches into a destination, retrying transient failures.
#[derive(Debug, Clone)]
pub struct LoadEngine<D> {
    destination: D,
    retry: RetryConfig,
    hard_delete: bool,
}

impl<D> LoadEngine<D>
where
    D: Destination,
{
    pub fn new(destination: D, retry: RetryConfig, hard_delete: bool) -> Self {
        Self {
            destination,
            retry,
            hard_delete,
        }
    }

    pub fn destination(&self) -> &D {
        &self.destination
    }

    /// Writes `batch` into `table` as a single unit.
    pub async fn load(
        &self,
        batch: &Batch,
        table: &TableState,
        schema: &StreamSchema,
    ) -> SinkResult<LoadResult> {
        let plan = WritePlan::build(batch, table, schema, self.hard_delete);
        debug!(
            stream = %batch.stream,
            table = %table.name,
            records = batch.len(),
            rows = plan.row_count(),
            "built write plan"
        );

        self.execute(&plan).await
    }

    /// Executes `plan`, retrying it while the destination reports transient failures.
    pub async fn execute(&self, plan: &WritePlan) -> SinkResult<LoadResult> {
        let mut attempts = 0;
        loop {
            attempts += 1;

            let err = match self.destination.write(plan).await {
                Ok(rows_affected) => {
                    info!(table = %plan.table, rows_affected, attempts, "batch committed");

                    return Ok(LoadResult {
                        rows_affected,
                        committed: true,
                        attempts,
                    });
                }
                Err(err) => err,
            };

            if !err.is_transient() || attempts >= self.retry.max_attempts {
                return Err(err);
            }

            let delay = backoff_delay(&self.retry, attempts);
            if plan.is_append() {
                warn!(
                    table = %plan.table,
                    attempts,
                    error = %err,
                    "retrying append after transient failure, rows may be duplicated"
                );
            } else {
                warn!(
                    table = %plan.table,
                    attempts,
                    error = %err,
                    "retrying write after transient failure"
                );
            }

            tokio::time::sleep(delay).await;
        }
    }
}

/// Returns the delay before the retry following attempt number `attempt`.
///
/// The delay grows by `backoff_factor` per attempt up to `max_delay_ms`, plus up to a
/// quarter of it as random jitter.
fn backoff_delay(retry: &RetryConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16) as i32;
    let base = retry.initial_delay_ms as f64 * f64::from(retry.backoff_factor).powi(exponent);
    let capped = base.min(retry.max_delay_ms as f64).max(0.0) as u64;

    let jitter = if capped >= 4 {
        random_range(0..capped / 4)
    } else {
        0
    };

    Duration::from_millis(capped.saturating_add(jitter))
}
