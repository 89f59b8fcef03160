// Copyright 2026 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Source Stream Adapter
//!
//! Turns an event-driven [`RemoteStream`] into a pull-based, cancellable
//! sequence of rows.
//!
//! A background producer task opens the source, resolves the schema, and then
//! pushes every row into a **bounded** channel. The consumer pulls with
//! [`SourceStream::next`]:
//!
//! 1. **Backpressure**: when the channel is full the producer suspends, so no
//!    further pages are requested from the remote.
//! 2. **Single terminal event**: a source error is delivered once, after which
//!    the sequence is finished.
//! 3. **Teardown**: the producer calls `destroy()` on the remote stream exactly
//!    once, whether the read completed, failed, or the consumer went away.

use crate::domain::entities::{Row, Schema, SourceSpec};
use crate::domain::errors::Result;
use crate::ports::source_port::{SourcePort, StreamEvent};
use log::{debug, warn};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Rows buffered between the producer task and the consumer.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// One emitted row plus the (run-constant) schema, if one was resolved.
#[derive(Debug, Clone)]
pub struct SourceItem {
    pub row: Row,
    pub schema: Option<Arc<Schema>>,
}

/// A lazily-produced, non-restartable row sequence for one extraction attempt.
pub struct SourceStream {
    item_rx: mpsc::Receiver<Result<SourceItem>>,
    close_tx: Option<oneshot::Sender<()>>,
    producer: Option<JoinHandle<()>>,
    finished: bool,
}

impl SourceStream {
    /// Starts reading `spec` in a background task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(source: Arc<dyn SourcePort>, spec: SourceSpec, capacity: usize) -> Self {
        let (item_tx, item_rx) = mpsc::channel(capacity.max(1));
        let (close_tx, close_rx) = oneshot::channel();
        let producer = tokio::spawn(produce(source, spec, item_tx, close_rx));

        Self {
            item_rx,
            close_tx: Some(close_tx),
            producer: Some(producer),
            finished: false,
        }
    }

    /// Receives the next row.
    ///
    /// Returns `None` once the source has closed, after an error has been
    /// returned, or after the stream was cancelled.
    pub async fn next(&mut self) -> Option<Result<SourceItem>> {
        if self.finished {
            return None;
        }

        match self.item_rx.recv().await {
            Some(Ok(item)) => Some(Ok(item)),
            Some(Err(e)) => {
                self.finished = true;
                Some(Err(e))
            }
            None => {
                self.finished = true;
                None
            }
        }
    }

    /// Stops consuming and waits until the remote stream has been torn down.
    pub async fn close(mut self) {
        self.cancel();
        // Pending sends fail once the receiver is closed.
        self.item_rx.close();
        if let Some(handle) = self.producer.take() {
            if let Err(e) = handle.await {
                warn!("Source producer task ended abnormally: {}", e);
            }
        }
    }

    /// Signals the producer to stop. Safe to call multiple times.
    pub fn cancel(&mut self) {
        self.finished = true;
        if let Some(tx) = self.close_tx.take() {
            let _ = tx.send(());
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Drop for SourceStream {
    fn drop(&mut self) {
        // The producer notices the signal (or the dropped receiver) and
        // destroys the remote stream on its own.
        self.cancel();
    }
}

async fn produce(
    source: Arc<dyn SourcePort>,
    spec: SourceSpec,
    item_tx: mpsc::Sender<Result<SourceItem>>,
    mut close_rx: oneshot::Receiver<()>,
) {
    // --- STEP 1: OPEN & RESOLVE SCHEMA ---
    let opened = tokio::select! {
        opened = source.open(&spec) => opened,
        _ = &mut close_rx => {
            debug!("Read of {} cancelled before the source was opened", spec);
            return;
        }
    };

    let mut remote = match opened {
        Ok(remote) => remote,
        Err(e) => {
            deliver(&item_tx, Err(e), &mut close_rx).await;
            return;
        }
    };

    let schema = remote.schema();
    if schema.is_none() {
        debug!("No schema available for {}; using the first row's field order", spec);
    }

    // --- STEP 2: PUMP EVENTS ---
    let mut emitted: u64 = 0;
    loop {
        let event = tokio::select! {
            event = remote.next_event() => event,
            _ = &mut close_rx => {
                debug!("Consumer stopped reading {} after {} rows", spec, emitted);
                break;
            }
        };

        match event {
            StreamEvent::Data(row) => {
                let item = SourceItem {
                    row,
                    schema: schema.clone(),
                };
                if !deliver(&item_tx, Ok(item), &mut close_rx).await {
                    debug!("Consumer stopped reading {} after {} rows", spec, emitted);
                    break;
                }
                emitted += 1;
            }
            StreamEvent::Error(e) => {
                if !deliver(&item_tx, Err(e), &mut close_rx).await {
                    debug!("Consumer stopped reading {} before its error was delivered", spec);
                }
                break;
            }
            StreamEvent::Close => {
                debug!("Source {} closed after {} rows", spec, emitted);
                break;
            }
        }
    }

    // --- STEP 3: TEARDOWN ---
    remote.destroy().await;
}

/// Sends one item, giving up as soon as the consumer stops listening.
async fn deliver(
    item_tx: &mpsc::Sender<Result<SourceItem>>,
    item: Result<SourceItem>,
    close_rx: &mut oneshot::Receiver<()>,
) -> bool {
    tokio::select! {
        sent = item_tx.send(item) => sent.is_ok(),
        _ = close_rx => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::{row, Script, ScriptEvent, ScriptedSource};
    use crate::domain::entities::{FieldSchema, Value};
    use crate::domain::errors::ExtractError;
    use std::time::Duration;

    fn spec() -> SourceSpec {
        SourceSpec::Table("events".into())
    }

    #[tokio::test]
    async fn test_emits_rows_with_schema_then_ends() {
        let schema = Schema::new(vec![FieldSchema::new("id", "INTEGER")]);
        let source = Arc::new(ScriptedSource::new(vec![Script::rows(
            Some(schema.clone()),
            vec![row(&[("id", Value::Int(1))]), row(&[("id", Value::Int(2))])],
        )]));

        let mut stream = SourceStream::open(source.clone(), spec(), 4);
        let first = stream.next().await.unwrap().unwrap();
        let second = stream.next().await.unwrap().unwrap();

        assert_eq!(first.row.get("id"), Some(&Value::Int(1)));
        assert_eq!(second.row.get("id"), Some(&Value::Int(2)));
        assert_eq!(first.schema.as_deref(), Some(&schema));
        assert!(stream.next().await.is_none());
        assert!(stream.next().await.is_none());

        stream.close().await;
        assert_eq!(source.destroys(), 1);
    }

    #[tokio::test]
    async fn test_missing_schema_is_none_on_every_item() {
        let source = Arc::new(ScriptedSource::new(vec![Script::rows(
            None,
            vec![row(&[("a", Value::Null)])],
        )]));

        let mut stream = SourceStream::open(source, spec(), 4);
        let item = stream.next().await.unwrap().unwrap();
        assert!(item.schema.is_none());
    }

    #[tokio::test]
    async fn test_error_is_terminal() {
        let source = Arc::new(ScriptedSource::new(vec![Script::Stream {
            schema: None,
            events: vec![
                ScriptEvent::Row(row(&[("id", Value::Int(1))])),
                ScriptEvent::Fail("connection reset".into()),
                ScriptEvent::Row(row(&[("id", Value::Int(2))])),
            ],
        }]));

        let mut stream = SourceStream::open(source.clone(), spec(), 4);
        assert!(stream.next().await.unwrap().is_ok());

        match stream.next().await {
            Some(Err(ExtractError::SourceError {
                message,
                properties,
            })) => {
                assert_eq!(message, "connection reset");
                assert_eq!(properties.get("reason"), Some("backendError"));
            }
            other => panic!("expected source error, got {:?}", other),
        }
        assert!(stream.next().await.is_none());
        assert!(stream.is_finished());

        stream.close().await;
        assert_eq!(source.destroys(), 1);
    }

    #[tokio::test]
    async fn test_open_failure_surfaces_as_single_error() {
        let source = Arc::new(ScriptedSource::new(vec![Script::OpenError(
            "Access Denied".into(),
        )]));

        let mut stream = SourceStream::open(source.clone(), spec(), 4);
        let err = stream.next().await.unwrap().unwrap_err();
        assert_eq!(err.context().get("phase"), Some("open"));
        assert!(stream.next().await.is_none());
        // Nothing was opened, so there is nothing to destroy.
        stream.close().await;
        assert_eq!(source.destroys(), 0);
    }

    #[tokio::test]
    async fn test_close_destroys_stalled_remote() {
        let source = Arc::new(ScriptedSource::new(vec![Script::Stream {
            schema: None,
            events: vec![
                ScriptEvent::Row(row(&[("id", Value::Int(1))])),
                ScriptEvent::Stall,
            ],
        }]));

        let mut stream = SourceStream::open(source.clone(), spec(), 4);
        assert!(stream.next().await.unwrap().is_ok());

        stream.close().await;
        assert_eq!(source.destroys(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_while_error_is_pending_on_full_channel() {
        let source = Arc::new(ScriptedSource::new(vec![Script::Stream {
            schema: None,
            events: vec![
                ScriptEvent::Row(row(&[("id", Value::Int(1))])),
                ScriptEvent::Row(row(&[("id", Value::Int(2))])),
                ScriptEvent::Fail("connection reset".into()),
            ],
        }]));

        let mut stream = SourceStream::open(source.clone(), spec(), 1);
        assert!(stream.next().await.unwrap().is_ok());
        // Row 2 fills the channel; the error is left waiting behind it.
        tokio::time::sleep(Duration::from_millis(10)).await;

        tokio::time::timeout(Duration::from_secs(3600), stream.close())
            .await
            .expect("close must not wait on an undelivered error");
        assert_eq!(source.destroys(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_while_open_error_is_pending() {
        let source = Arc::new(ScriptedSource::new(vec![Script::OpenError("Access Denied".into())]));

        let stream = SourceStream::open(source.clone(), spec(), 1);
        tokio::time::timeout(Duration::from_secs(3600), stream.close())
            .await
            .expect("close must return after a failed open");
        assert_eq!(source.destroys(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_tears_down_producer_blocked_on_full_channel() {
        let rows: Vec<_> = (0..10).map(|i| row(&[("id", Value::Int(i))])).collect();
        let source = Arc::new(ScriptedSource::new(vec![Script::rows(None, rows)]));

        let mut stream = SourceStream::open(source.clone(), spec(), 1);
        assert!(stream.next().await.unwrap().is_ok());
        drop(stream);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(source.destroys(), 1);
    }
}
