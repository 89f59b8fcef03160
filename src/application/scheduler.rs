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

//! # Scheduler / Run Loop
//!
//! The top-level state machine of the extractor:
//!
//! ```text
//! Idle ──> Running ──> Completed ──┬──> Waiting ──> Running   (cron set)
//!             │                    └──> Terminated           (one-shot)
//!             └──> PersistentlyFailed ──(cooldown)──> Running
//! ```
//!
//! 1. **Running**: one retry-wrapped extraction, then (if it produced rows)
//!    one retry-wrapped write. The stages retry independently.
//! 2. **PersistentlyFailed**: a stage ran out of retries. The error and its
//!    context are logged; after the cooldown the whole cycle starts over with
//!    fresh retry counters.
//! 3. **Completed**: the next fire instant is computed from "now". Without a
//!    schedule the job terminates.
//!
//! [`Scheduler::step`] performs exactly one transition so every state can be
//! observed from tests; [`Scheduler::run`] loops until `Terminated`.

use crate::application::extraction::ExtractionPipeline;
use crate::application::retry::Retrier;
use crate::application::schedule::{humanize, CronSchedule, ScheduleState};
use crate::application::serializer::templated_output_path;
use crate::domain::entities::{RetryConfig, RunOutcome, RunResult};
use crate::domain::errors::{ExtractError, Result};
use crate::ports::sink_port::SinkPort;
use chrono::{DateTime, Local};
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Where the scheduler currently is.
#[derive(Debug)]
pub enum RunState {
    Idle,
    Running,
    Completed(RunResult),
    PersistentlyFailed(ExtractError),
    Waiting {
        until: DateTime<Local>,
        wait: Duration,
    },
    Terminated,
}

impl RunState {
    pub fn name(&self) -> &'static str {
        match self {
            RunState::Idle => "Idle",
            RunState::Running => "Running",
            RunState::Completed(_) => "Completed",
            RunState::PersistentlyFailed(_) => "PersistentlyFailed",
            RunState::Waiting { .. } => "Waiting",
            RunState::Terminated => "Terminated",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub output_path: PathBuf,
    /// strftime pattern inserted into the file name at write time.
    pub timestamp_format: Option<String>,
    pub retry: RetryConfig,
    pub persistent_error_cooldown: Duration,
}

pub struct Scheduler {
    pipeline: ExtractionPipeline,
    sink: Arc<dyn SinkPort>,
    settings: SchedulerSettings,
    read_retry: Retrier,
    write_retry: Retrier,
    schedule: ScheduleState,
    state: RunState,
}

impl Scheduler {
    pub fn new(
        pipeline: ExtractionPipeline,
        sink: Arc<dyn SinkPort>,
        settings: SchedulerSettings,
        schedule: Option<CronSchedule>,
    ) -> Self {
        Self {
            pipeline,
            sink,
            read_retry: Retrier::new("Extraction", settings.retry),
            write_retry: Retrier::new("Write", settings.retry),
            settings,
            schedule: ScheduleState::new(schedule),
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn schedule(&self) -> &ScheduleState {
        &self.schedule
    }

    pub fn read_failures(&self) -> u32 {
        self.read_retry.failures()
    }

    pub fn write_failures(&self) -> u32 {
        self.write_retry.failures()
    }

    /// Drives the state machine until it terminates. Never returns for a
    /// recurring job.
    pub async fn run(&mut self) {
        while !matches!(self.step().await, RunState::Terminated) {}
        info!("Extractor finished");
    }

    /// Performs a single transition and returns the new state.
    pub async fn step(&mut self) -> &RunState {
        let current = std::mem::replace(&mut self.state, RunState::Terminated);

        self.state = match current {
            RunState::Idle => RunState::Running,

            RunState::Running => {
                let result = self.run_cycle().await;
                match result.outcome {
                    RunOutcome::Success => {
                        RunState::Completed(RunResult::success(result.rows_written, result.output))
                    }
                    RunOutcome::Failure(e) => {
                        self.report_persistent_failure(&e);
                        RunState::PersistentlyFailed(e)
                    }
                }
            }

            RunState::PersistentlyFailed(_) => {
                tokio::time::sleep(self.settings.persistent_error_cooldown).await;
                self.read_retry.reset();
                self.write_retry.reset();
                RunState::Running
            }

            RunState::Completed(_) => match self.schedule.advance(Local::now()) {
                Some((until, wait)) => {
                    info!(
                        "Next extraction will start in {} ({})",
                        humanize(wait),
                        until.format("%A %d/%m/%Y at %H:%M:%S")
                    );
                    RunState::Waiting { until, wait }
                }
                None => {
                    if self.schedule.is_recurring() {
                        info!("Cron schedule has no further occurrences");
                    }
                    RunState::Terminated
                }
            },

            RunState::Waiting { wait, .. } => {
                tokio::time::sleep(wait).await;
                RunState::Running
            }

            RunState::Terminated => RunState::Terminated,
        };

        &self.state
    }

    async fn run_cycle(&mut self) -> RunResult {
        info!("Starting extraction");
        match self.extract_and_write().await {
            Ok(result) => result,
            Err(e) => RunResult::failure(e),
        }
    }

    async fn extract_and_write(&mut self) -> Result<RunResult> {
        // --- STEP 1: EXTRACT (retried as a whole) ---
        let pipeline = &self.pipeline;
        let batch = match self.read_retry.run(move || pipeline.extract()).await? {
            Some(batch) => batch,
            None => {
                info!("Extraction completed: source returned no rows, nothing written");
                return Ok(RunResult::success(0, None));
            }
        };

        // --- STEP 2: WRITE (retried on its own, same file name every attempt) ---
        let path = templated_output_path(
            &self.settings.output_path,
            self.settings.timestamp_format.as_deref(),
            &Local::now(),
        )?;
        let sink = &self.sink;
        let data = batch.bytes.as_slice();
        let target = path.as_path();
        self.write_retry
            .run(move || sink.write(data, target))
            .await?;

        info!(
            "Extraction completed: {} rows written to {}",
            batch.rows,
            path.display()
        );
        Ok(RunResult::success(batch.rows, Some(path)))
    }

    fn report_persistent_failure(&self, e: &ExtractError) {
        error!("{}", e);
        for (key, value) in e.context().iter() {
            error!("  {}: {}", key, value);
        }
        info!(
            "Persistent error occurred. Will retry in {}.",
            humanize(self.settings.persistent_error_cooldown)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::serializer::SerializerOptions;
    use crate::application::test_support::{row, RecordingSink, Script, ScriptEvent, ScriptedSource};
    use crate::application::transformer::{DisplayZone, RowTransformer};
    use crate::domain::entities::{FieldSchema, OutputFormat, Schema, SourceSpec, SourceTimestamp, Value};
    use tokio::time::Instant;

    const COOLDOWN: Duration = Duration::from_secs(600);

    fn settings(max_attempts: u32) -> SchedulerSettings {
        SchedulerSettings {
            output_path: PathBuf::from("out/data.csv"),
            timestamp_format: None,
            retry: RetryConfig {
                max_attempts,
                delay: Duration::from_millis(100),
                reset_on_success: true,
            },
            persistent_error_cooldown: COOLDOWN,
        }
    }

    fn scheduler(
        source: Arc<ScriptedSource>,
        sink: Arc<RecordingSink>,
        settings: SchedulerSettings,
        cron: Option<&str>,
    ) -> Scheduler {
        let pipeline = ExtractionPipeline::new(
            source,
            SourceSpec::Table("events".into()),
            RowTransformer::new(DisplayZone::utc()),
            SerializerOptions::new(OutputFormat::Csv),
        );
        let schedule = cron.map(|c| CronSchedule::parse(c).unwrap());
        Scheduler::new(pipeline, sink, settings, schedule)
    }

    fn two_rows() -> Script {
        Script::rows(
            Some(Schema::new(vec![
                FieldSchema::new("id", "INTEGER"),
                FieldSchema::new("ts", "TIMESTAMP"),
            ])),
            vec![
                row(&[
                    ("id", Value::Int(1)),
                    ("ts", Value::Timestamp(SourceTimestamp("2024-03-09T14:05:07Z".into()))),
                ]),
                row(&[
                    ("id", Value::Int(2)),
                    ("ts", Value::Timestamp(SourceTimestamp("2024-03-10T08:00:00Z".into()))),
                ]),
            ],
        )
    }

    fn failing_after_one_row() -> Script {
        Script::Stream {
            schema: None,
            events: vec![
                ScriptEvent::Row(row(&[("id", Value::Int(1))])),
                ScriptEvent::Fail("Connection reset by peer".into()),
            ],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_shot_cycle_writes_file_and_terminates() {
        let source = Arc::new(ScriptedSource::new(vec![two_rows()]));
        let sink = Arc::new(RecordingSink::new());
        let mut scheduler = scheduler(source, sink.clone(), settings(5), None);

        assert!(matches!(scheduler.state(), RunState::Idle));
        assert!(matches!(scheduler.step().await, RunState::Running));

        match scheduler.step().await {
            RunState::Completed(result) => {
                assert_eq!(result.rows_written, 2);
                assert_eq!(result.output.as_deref(), Some(PathBuf::from("out/data.csv").as_path()));
            }
            other => panic!("expected Completed, got {:?}", other),
        }
        assert!(matches!(scheduler.step().await, RunState::Terminated));
        assert!(matches!(scheduler.step().await, RunState::Terminated));

        let written = sink.written();
        assert_eq!(written.len(), 1);
        assert_eq!(
            String::from_utf8(written[0].1.clone()).unwrap(),
            "\u{feff}id,ts\n1,09/03/2024 14:05:07\n2,10/03/2024 08:00:00\n"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_rows_skip_the_write() {
        let source = Arc::new(ScriptedSource::new(vec![Script::rows(None, vec![])]));
        let sink = Arc::new(RecordingSink::new());
        let mut scheduler = scheduler(source, sink.clone(), settings(5), None);

        scheduler.run().await;

        assert_eq!(sink.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_failing_exactly_max_attempts_completes() {
        let source = Arc::new(ScriptedSource::new(vec![
            failing_after_one_row(),
            failing_after_one_row(),
            two_rows(),
        ]));
        let sink = Arc::new(RecordingSink::new());
        let mut scheduler = scheduler(source.clone(), sink.clone(), settings(2), None);

        scheduler.step().await;
        match scheduler.step().await {
            RunState::Completed(result) => assert_eq!(result.rows_written, 2),
            other => panic!("expected Completed, got {:?}", other),
        }
        assert_eq!(source.opens(), 3);
        assert_eq!(source.destroys(), 3);
        assert_eq!(scheduler.read_failures(), 0);
        assert_eq!(sink.written().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_exhausts_into_cooldown() {
        let source = Arc::new(ScriptedSource::repeating(vec![], failing_after_one_row()));
        let sink = Arc::new(RecordingSink::new());
        let mut scheduler = scheduler(source.clone(), sink.clone(), settings(2), None);

        scheduler.step().await;
        match scheduler.step().await {
            RunState::PersistentlyFailed(e) => {
                assert_eq!(e.to_string(), "Source error: Connection reset by peer");
                assert_eq!(e.context().get("reason"), Some("backendError"));
            }
            other => panic!("expected PersistentlyFailed, got {:?}", other),
        }
        assert_eq!(source.opens(), 3);
        assert_eq!(scheduler.read_failures(), 3);
        assert_eq!(sink.attempts(), 0);

        let start = Instant::now();
        assert!(matches!(scheduler.step().await, RunState::Running));
        assert_eq!(start.elapsed(), COOLDOWN);
        assert_eq!(scheduler.read_failures(), 0);

        // The next cycle starts from scratch with a full retry budget.
        assert!(matches!(scheduler.step().await, RunState::PersistentlyFailed(_)));
        assert_eq!(source.opens(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_retries_target_the_same_file() {
        let source = Arc::new(ScriptedSource::new(vec![two_rows()]));
        let sink = Arc::new(RecordingSink::failing(2));
        let mut settings = settings(2);
        settings.timestamp_format = Some("_%Y%m%d%H%M%S%f".into());
        let mut scheduler = scheduler(source.clone(), sink.clone(), settings, None);

        scheduler.step().await;
        let output = match scheduler.step().await {
            RunState::Completed(result) => result.output.clone().unwrap(),
            other => panic!("expected Completed, got {:?}", other),
        };

        assert_eq!(sink.attempts(), 3);
        assert_eq!(source.opens(), 1);
        assert_eq!(scheduler.write_failures(), 0);
        assert_eq!(sink.written()[0].0, output);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_exhaustion_is_persistent_failure() {
        let source = Arc::new(ScriptedSource::new(vec![two_rows()]));
        let sink = Arc::new(RecordingSink::failing(10));
        let mut scheduler = scheduler(source.clone(), sink.clone(), settings(1), None);

        scheduler.step().await;
        match scheduler.step().await {
            RunState::PersistentlyFailed(ExtractError::WriteError { path, .. }) => {
                assert_eq!(path, &PathBuf::from("out/data.csv"));
            }
            other => panic!("expected write failure, got {:?}", other),
        }
        assert_eq!(sink.attempts(), 2);
        assert_eq!(source.opens(), 1);
        assert_eq!(scheduler.write_failures(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timestamp_is_inserted_before_extension() {
        let source = Arc::new(ScriptedSource::new(vec![two_rows()]));
        let sink = Arc::new(RecordingSink::new());
        let mut settings = settings(0);
        settings.timestamp_format = Some("_%Y".into());
        let mut scheduler = scheduler(source, sink.clone(), settings, None);

        scheduler.run().await;

        let expected = PathBuf::from(format!("out/data_{}.csv", Local::now().format("%Y")));
        assert_eq!(sink.written()[0].0, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recurring_job_waits_for_next_fire() {
        let source = Arc::new(ScriptedSource::repeating(vec![], two_rows()));
        let sink = Arc::new(RecordingSink::new());
        let mut scheduler = scheduler(source.clone(), sink.clone(), settings(0), Some("* * * * *"));

        scheduler.step().await;
        assert!(matches!(scheduler.step().await, RunState::Completed(_)));

        let wait = match scheduler.step().await {
            RunState::Waiting { until, wait } => {
                assert!(*until > Local::now() - chrono::Duration::seconds(1));
                *wait
            }
            other => panic!("expected Waiting, got {:?}", other),
        };
        assert!(wait <= Duration::from_secs(60));
        assert!(scheduler.schedule().next_fire().is_some());

        let start = Instant::now();
        assert!(matches!(scheduler.step().await, RunState::Running));
        assert!(start.elapsed() >= wait);

        assert!(matches!(scheduler.step().await, RunState::Completed(_)));
        assert_eq!(source.opens(), 2);
        assert_eq!(sink.written().len(), 2);
    }
}
