use std::sync::Arc;

use defense_rpc::{EntitySource, RpcError, SourceUpdate, StreamUnitsOptions};
use futures::StreamExt;
use thiserror::Error;

use crate::{encyclopedia::Encyclopedia, shutdown::Shutdown, store::UnitSender, unit::Unit};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to open unit stream: {0}")]
    Open(#[source] RpcError),
    #[error("unit stream failed: {0}")]
    Stream(#[source] RpcError),
}

/// Why an ingest run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestExit {
    Shutdown,
    Cancelled,
    StreamEnded,
    QueueClosed,
}

/// Reads the remote unit stream and feeds the hand-off queue.
pub struct StreamIngest {
    source: Arc<dyn EntitySource>,
    encyclopedia: Arc<Encyclopedia>,
    options: StreamUnitsOptions,
    queue: UnitSender,
}

impl StreamIngest {
    pub fn new(
        source: Arc<dyn EntitySource>,
        encyclopedia: Arc<Encyclopedia>,
        options: StreamUnitsOptions,
        queue: UnitSender,
    ) -> Self {
        Self {
            source,
            encyclopedia,
            options,
            queue,
        }
    }

    /// Consume one streaming call. Does not reconnect.
    pub async fn run(self, mut shutdown: Shutdown) -> Result<IngestExit, IngestError> {
        let mut stream = tokio::select! {
            _ = shutdown.cancelled() => return Ok(IngestExit::Shutdown),
            opened = self.source.stream_units(self.options) => match opened {
                Ok(stream) => stream,
                Err(err) if err.is_cancelled() => {
                    tracing::info!(target: "air_defense::ingest", error = %err, "ingest.cancelled");
                    return Ok(IngestExit::Cancelled);
                }
                Err(err) => {
                    tracing::warn!(target: "air_defense::ingest", error = %err, "ingest.open_failed");
                    return Err(IngestError::Open(err));
                }
            },
        };
        tracing::info!(
            target: "air_defense::ingest",
            poll_rate = self.options.poll_rate,
            max_backoff = self.options.max_backoff,
            "ingest.stream_opened"
        );

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => return Ok(IngestExit::Shutdown),
                next = stream.next() => next,
            };

            let update = match next {
                None => {
                    tracing::info!(target: "air_defense::ingest", "ingest.stream_ended");
                    return Ok(IngestExit::StreamEnded);
                }
                Some(Ok(update)) => update,
                Some(Err(err)) if err.is_malformed() => {
                    tracing::warn!(target: "air_defense::ingest", error = %err, "ingest.update_dropped");
                    continue;
                }
                Some(Err(err)) if err.is_cancelled() => {
                    tracing::info!(target: "air_defense::ingest", error = %err, "ingest.cancelled");
                    return Ok(IngestExit::Cancelled);
                }
                Some(Err(err)) => {
                    tracing::warn!(target: "air_defense::ingest", error = %err, "ingest.stream_failed");
                    return Err(IngestError::Stream(err));
                }
            };

            let unit = match update {
                SourceUpdate::Unit(record) => {
                    let symbology = self
                        .encyclopedia
                        .symbology_for(record.coalition, &record.type_name);
                    Unit::from_record(record, symbology)
                }
                SourceUpdate::Gone { id, name } => Unit::tombstone(id, name),
                SourceUpdate::Empty => continue,
            };

            if self.queue.send(unit).is_err() {
                tracing::debug!(target: "air_defense::ingest", "ingest.queue_closed");
                return Ok(IngestExit::QueueClosed);
            }
        }
    }
}
