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

//! # Source Port
//!
//! This Port defines what it means to "read rows" from a remote data source.
//! It doesn't care IF the source is BigQuery or a scripted mock for testing.
//!
//! A source is opened once per extraction attempt and hands back a
//! [`RemoteStream`]: an event-driven, non-restartable feed of rows that ends
//! with exactly one terminal event (`Close` or `Error`).

use crate::domain::entities::{Row, Schema, SourceSpec};
use crate::domain::errors::{ExtractError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// One event pushed by a remote stream.
#[derive(Debug)]
pub enum StreamEvent {
    Data(Row),
    /// Terminal. Nothing is read after an error.
    Error(ExtractError),
    /// Terminal. The source is exhausted.
    Close,
}

/// An opened remote read.
#[async_trait]
pub trait RemoteStream: Send {
    /// Schema of the rows, if the source could resolve one.
    fn schema(&self) -> Option<Arc<Schema>>;

    /// Waits for the next event from the remote side.
    async fn next_event(&mut self) -> StreamEvent;

    /// Releases the remote operation (cancels an unfinished job, stops paging).
    async fn destroy(&mut self);
}

/// `SourcePort` opens remote reads.
///
/// `Send + Sync` because the stream adapter moves the port into its
/// producer task.
#[async_trait]
pub trait SourcePort: Send + Sync {
    /// Starts reading `spec`, resolving its schema along the way.
    async fn open(&self, spec: &SourceSpec) -> Result<Box<dyn RemoteStream>>;
}
