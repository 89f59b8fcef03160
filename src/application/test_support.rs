//! Mock ports shared by the application-layer tests.

use crate::domain::entities::{Row, Schema, SourceSpec, Value};
use crate::domain::errors::{ExtractError, Result};
use crate::ports::sink_port::SinkPort;
use crate::ports::source_port::{RemoteStream, SourcePort, StreamEvent};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Builds a row from literal pairs.
pub(crate) fn row(pairs: &[(&str, Value)]) -> Row {
    pairs.iter().map(|(k, v)| (*k, v.clone())).collect()
}

#[derive(Debug, Clone)]
pub(crate) enum ScriptEvent {
    Row(Row),
    Fail(String),
    /// Never resolves: simulates a remote that stalls.
    Stall,
}

#[derive(Debug, Clone)]
pub(crate) enum Script {
    OpenError(String),
    Stream {
        schema: Option<Schema>,
        events: Vec<ScriptEvent>,
    },
}

impl Script {
    pub(crate) fn rows(schema: Option<Schema>, rows: Vec<Row>) -> Self {
        Script::Stream {
            schema,
            events: rows.into_iter().map(ScriptEvent::Row).collect(),
        }
    }
}

/// A `SourcePort` that plays back one script per `open` call.
pub(crate) struct ScriptedSource {
    scripts: Mutex<VecDeque<Script>>,
    fallback: Option<Script>,
    pub(crate) opens: AtomicUsize,
    pub(crate) destroys: Arc<AtomicUsize>,
}

impl ScriptedSource {
    pub(crate) fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            fallback: None,
            opens: AtomicUsize::new(0),
            destroys: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Plays `script` for every open once the queued scripts are used up.
    pub(crate) fn repeating(scripts: Vec<Script>, fallback: Script) -> Self {
        Self {
            fallback: Some(fallback),
            ..Self::new(scripts)
        }
    }

    pub(crate) fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub(crate) fn destroys(&self) -> usize {
        self.destroys.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourcePort for ScriptedSource {
    async fn open(&self, _spec: &SourceSpec) -> Result<Box<dyn RemoteStream>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let next = self.scripts.lock().unwrap().pop_front();
        let script = next
            .or_else(|| self.fallback.clone())
            .unwrap_or_else(|| Script::OpenError("no script left".into()));

        match script {
            Script::OpenError(msg) => {
                Err(ExtractError::source_error(msg).with_property("phase", "open"))
            }
            Script::Stream { schema, events } => Ok(Box::new(ScriptedStream {
                schema: schema.map(Arc::new),
                events: events.into(),
                destroys: self.destroys.clone(),
            })),
        }
    }
}

struct ScriptedStream {
    schema: Option<Arc<Schema>>,
    events: VecDeque<ScriptEvent>,
    destroys: Arc<AtomicUsize>,
}

#[async_trait]
impl RemoteStream for ScriptedStream {
    fn schema(&self) -> Option<Arc<Schema>> {
        self.schema.clone()
    }

    async fn next_event(&mut self) -> StreamEvent {
        match self.events.pop_front() {
            Some(ScriptEvent::Row(row)) => StreamEvent::Data(row),
            Some(ScriptEvent::Fail(msg)) => StreamEvent::Error(
                ExtractError::source_error(msg).with_property("reason", "backendError"),
            ),
            Some(ScriptEvent::Stall) => std::future::pending().await,
            None => StreamEvent::Close,
        }
    }

    async fn destroy(&mut self) {
        self.destroys.fetch_add(1, Ordering::SeqCst);
    }
}

/// A `SinkPort` that records writes and can fail a set number of times first.
pub(crate) struct RecordingSink {
    failures_left: AtomicUsize,
    pub(crate) attempts: AtomicUsize,
    pub(crate) writes: Mutex<Vec<(PathBuf, Vec<u8>)>>,
}

impl RecordingSink {
    pub(crate) fn new() -> Self {
        Self::failing(0)
    }

    pub(crate) fn failing(times: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(times),
            attempts: AtomicUsize::new(0),
            writes: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn written(&self) -> Vec<(PathBuf, Vec<u8>)> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl SinkPort for RecordingSink {
    async fn write(&self, data: &[u8], path: &Path) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(ExtractError::WriteError {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            });
        }
        self.writes
            .lock()
            .unwrap()
            .push((path.to_path_buf(), data.to_vec()));
        Ok(())
    }
}
