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

//! # Sink Port
//!
//! The contract for persisting one serialized result set.

use crate::domain::errors::Result;
use async_trait::async_trait;
use std::path::Path;

/// `SinkPort` writes a complete output file.
#[async_trait]
pub trait SinkPort: Send + Sync {
    /// Writes `data` to `path`. Either the whole file lands or nothing does.
    async fn write(&self, data: &[u8], path: &Path) -> Result<()>;
}
