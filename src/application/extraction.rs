//! # Extraction Pipeline
//!
//! One extraction attempt, end to end:
//! `SourceStream` → `RowTransformer` → `BatchAccumulator`.
//!
//! Rows are handled one at a time in arrival order. Any error ends the
//! attempt, drops the partial batch, and tears down the remote stream.

use crate::application::serializer::{BatchAccumulator, SerializedBatch, SerializerOptions};
use crate::application::stream_adapter::{SourceStream, DEFAULT_CHANNEL_CAPACITY};
use crate::application::transformer::RowTransformer;
use crate::domain::entities::SourceSpec;
use crate::domain::errors::Result;
use crate::ports::source_port::SourcePort;
use log::{debug, info};
use std::sync::Arc;

pub struct ExtractionPipeline {
    source: Arc<dyn SourcePort>,
    spec: SourceSpec,
    transformer: RowTransformer,
    options: SerializerOptions,
    channel_capacity: usize,
}

impl ExtractionPipeline {
    pub fn new(
        source: Arc<dyn SourcePort>,
        spec: SourceSpec,
        transformer: RowTransformer,
        options: SerializerOptions,
    ) -> Self {
        Self {
            source,
            spec,
            transformer,
            options,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Bounds how many rows may be read ahead of the transformer.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn spec(&self) -> &SourceSpec {
        &self.spec
    }

    pub fn options(&self) -> &SerializerOptions {
        &self.options
    }

    /// Reads the whole source and serializes it.
    ///
    /// Returns `Ok(None)` when the source produced no rows.
    pub async fn extract(&self) -> Result<Option<SerializedBatch>> {
        info!("Reading {}", self.spec);

        let mut stream = SourceStream::open(self.source.clone(), self.spec.clone(), self.channel_capacity);
        let mut batch = BatchAccumulator::new(self.options);

        let outcome = self.drain(&mut stream, &mut batch).await;
        // Always wait for teardown, even on failure.
        stream.close().await;
        outcome?;

        debug!("Read {} rows from {}", batch.rows(), self.spec);
        batch.finish()
    }

    async fn drain(&self, stream: &mut SourceStream, batch: &mut BatchAccumulator) -> Result<()> {
        while let Some(item) = stream.next().await {
            let item = item?;
            let row = self.transformer.transform(item.row)?;
            batch.push(row, item.schema.as_deref())?;
        }
        Ok(())
    }
}
