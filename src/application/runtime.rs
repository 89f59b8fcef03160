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

//! # Runtime Wiring
//!
//! This module acts as the "Assembly Line" of the application. It turns the
//! validated [`JobSettings`] into a ready-to-run [`Scheduler`]:
//! 1. **Credentials**: the service-account key becomes a token source.
//! 2. **Source**: a BigQuery client wrapped in the source adapter.
//! 3. **Sink**: the local file adapter.
//! 4. **Pipeline & Scheduler**: transformer, serializer options and retry settings.
//!
//! Every collaborator is built here explicitly; nothing is looked up from a
//! global registry.

use crate::application::extraction::ExtractionPipeline;
use crate::application::scheduler::{Scheduler, SchedulerSettings};
use crate::application::serializer::SerializerOptions;
use crate::application::transformer::RowTransformer;
use crate::config::JobSettings;
use crate::domain::errors::Result;
use crate::infrastructure::bigquery::auth::{ServiceAccountKey, ServiceAccountTokenSource, TokenSource};
use crate::infrastructure::bigquery::bigquery_source_adapter::BigQuerySourceAdapter;
use crate::infrastructure::bigquery::client::BigQueryClient;
use crate::infrastructure::local_storage::local_file_adapter::LocalFileAdapter;
use crate::ports::sink_port::SinkPort;
use crate::ports::source_port::SourcePort;
use log::info;
use std::sync::Arc;
use std::time::Duration;

const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// Builds the scheduler for BigQuery with a service-account key file.
pub fn build_scheduler(settings: &JobSettings) -> Result<Scheduler> {
    // --- STEP 1: CREDENTIALS ---
    let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
    let key = ServiceAccountKey::from_file(&settings.keyfile)?;
    info!("Authenticating as {}", key.client_email);
    let tokens: Arc<dyn TokenSource> = Arc::new(ServiceAccountTokenSource::new(key, http.clone())?);

    // --- STEP 2: SOURCE ---
    let mut client = BigQueryClient::new(http, settings.project.clone(), tokens);
    if let Some(url) = &settings.api_url {
        client = client.with_base_url(url.clone());
    }
    let source: Arc<dyn SourcePort> = Arc::new(
        BigQuerySourceAdapter::new(Arc::new(client), settings.dataset.clone())
            .with_location(settings.location.clone())
            .with_page_size(settings.page_size),
    );

    // --- STEP 3: SINK ---
    let sink: Arc<dyn SinkPort> = Arc::new(LocalFileAdapter::new());

    Ok(assemble(settings, source, sink))
}

/// Wires a scheduler around already-built ports.
pub fn assemble(settings: &JobSettings, source: Arc<dyn SourcePort>, sink: Arc<dyn SinkPort>) -> Scheduler {
    let options = SerializerOptions {
        format: settings.format,
        sort_columns: settings.sort_columns,
        delimiter: settings.delimiter,
    };
    let pipeline = ExtractionPipeline::new(
        source,
        settings.source.clone(),
        RowTransformer::new(settings.display_zone),
        options,
    );

    info!(
        "Output: {} ({}), retries: {} every {:?}, schedule: {}",
        settings.output_path.display(),
        settings.format,
        settings.retry.max_attempts,
        settings.retry.delay,
        settings
            .cron
            .as_ref()
            .map(|c| c.expression())
            .unwrap_or("one-shot")
    );

    Scheduler::new(
        pipeline,
        sink,
        SchedulerSettings {
            output_path: settings.output_path.clone(),
            timestamp_format: settings.timestamp_format.clone(),
            retry: settings.retry,
            persistent_error_cooldown: settings.persistent_error_cooldown,
        },
        settings.cron.clone(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::scheduler::RunState;
    use crate::application::test_support::{row, RecordingSink, Script, ScriptedSource};
    use crate::config::AppConfig;
    use crate::domain::entities::Value;
    use crate::domain::errors::ExtractError;

    fn settings() -> JobSettings {
        let mut config = AppConfig::default();
        config.output.path = Some("out/data.csv".into());
        config.output.sort_columns = Some(true);
        config.bigquery.keyfile = Some("/nonexistent/key.json".into());
        config.bigquery.project = Some("proj".into());
        config.bigquery.dataset = Some("ds".into());
        config.bigquery.table = Some("events".into());
        config.resolve().unwrap()
    }

    #[test]
    fn test_missing_key_file_fails_to_build() {
        let err = build_scheduler(&settings()).err().unwrap();
        assert!(matches!(err, ExtractError::ConfigError(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_assembled_scheduler_honours_settings() {
        let source = Arc::new(ScriptedSource::new(vec![Script::rows(
            None,
            vec![row(&[("b", Value::Int(2)), ("a", Value::Int(1))])],
        )]));
        let sink = Arc::new(RecordingSink::new());
        let mut scheduler = assemble(&settings(), source, sink.clone());

        scheduler.run().await;

        assert!(matches!(scheduler.state(), RunState::Terminated));
        let written = sink.written();
        assert_eq!(written[0].0.to_str(), Some("out/data.csv"));
        assert_eq!(String::from_utf8(written[0].1.clone()).unwrap(), "\u{feff}a,b\n1,2\n");
    }
}
