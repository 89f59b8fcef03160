//! # BigQuery Source Adapter
//!
//! Implements [`SourcePort`] on top of the BigQuery REST API.
//!
//! - **Table**: `tables.get` resolves the schema, then `tabledata.list` is
//!   paged one page at a time.
//! - **Query**: a query job is inserted, its metadata is read to find the
//!   destination table (whose schema becomes the stream schema, if any), and
//!   `getQueryResults` is paged once the job completes.
//!
//! A page is only requested when the previous one has been fully consumed,
//! so a slow consumer naturally stops the paging.

use crate::domain::entities::{Row, Schema, SourceSpec};
use crate::domain::errors::{ExtractError, Result};
use crate::infrastructure::bigquery::client::{BigQueryClient, JobReference, TableReference, TableRow};
use crate::infrastructure::bigquery::value_decoder::decode_row;
use crate::ports::source_port::{RemoteStream, SourcePort, StreamEvent};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_PAGE_SIZE: u32 = 10_000;
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(10);

pub struct BigQuerySourceAdapter {
    client: Arc<BigQueryClient>,
    dataset: String,
    location: Option<String>,
    page_size: u32,
    poll_timeout: Duration,
}

impl BigQuerySourceAdapter {
    pub fn new(client: Arc<BigQueryClient>, dataset: impl Into<String>) -> Self {
        Self {
            client,
            dataset: dataset.into(),
            location: None,
            page_size: DEFAULT_PAGE_SIZE,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_location(mut self, location: Option<String>) -> Self {
        self.location = location;
        self
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    #[must_use]
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    async fn open_table(&self, table_id: &str) -> Result<Box<dyn RemoteStream>> {
        let table = TableReference {
            project_id: self.client.project().to_string(),
            dataset_id: self.dataset.clone(),
            table_id: table_id.to_string(),
        };

        let metadata = self
            .client
            .get_table(&table)
            .await
            .map_err(|e| e.with_property("table", table_id))?;
        let schema = metadata.schema.ok_or_else(|| {
            ExtractError::source_error(format!("Table {} has no schema", table_id))
                .with_property("table", table_id)
        })?;

        info!(
            "Reading table {}.{} ({} columns)",
            table.dataset_id,
            table.table_id,
            schema.fields.len()
        );

        Ok(Box::new(TableDataStream {
            client: self.client.clone(),
            table,
            schema: Arc::new(schema),
            page_size: self.page_size,
            pages: PageCursor::default(),
        }))
    }

    async fn open_query(&self, sql: &str) -> Result<Box<dyn RemoteStream>> {
        // --- STEP 1: SUBMIT ---
        let inserted = self
            .client
            .insert_query_job(sql, &self.dataset, self.location.as_deref())
            .await?;
        let job_ref = inserted.job_reference.clone();
        if let Some(e) = inserted.error() {
            return Err(e);
        }
        info!("Started query job {}", job_ref.job_id);

        // --- STEP 2: RESOLVE DESTINATION SCHEMA ---
        let schema = match self.destination_schema(&job_ref).await {
            Ok(schema) => schema,
            Err(e) => {
                cancel_quietly(&self.client, &job_ref).await;
                return Err(e);
            }
        };

        Ok(Box::new(QueryResultsStream {
            client: self.client.clone(),
            job: job_ref,
            schema,
            row_schema: None,
            page_size: self.page_size,
            poll_timeout: self.poll_timeout,
            job_complete: false,
            cancelled: false,
            pages: PageCursor::default(),
        }))
    }

    async fn destination_schema(&self, job_ref: &JobReference) -> Result<Option<Arc<Schema>>> {
        let job = self.client.get_job(job_ref).await?;
        if let Some(e) = job.error() {
            return Err(e);
        }

        match job.destination_table() {
            Some(dest) => {
                let metadata = self.client.get_table(dest).await?;
                Ok(metadata.schema.map(Arc::new))
            }
            None => {
                debug!("Query job {} has no destination table", job_ref.job_id);
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl SourcePort for BigQuerySourceAdapter {
    async fn open(&self, spec: &SourceSpec) -> Result<Box<dyn RemoteStream>> {
        match spec {
            SourceSpec::Table(table) => self.open_table(table).await,
            SourceSpec::Query(sql) => self.open_query(sql).await,
        }
    }
}

async fn cancel_quietly(client: &BigQueryClient, job: &JobReference) {
    match client.cancel_job(job).await {
        Ok(()) => info!("Cancelled query job {}", job.job_id),
        Err(e) => warn!("Failed to cancel query job {}: {}", job.job_id, e),
    }
}

/// Buffered rows of the current page plus the token for the next one.
#[derive(Default)]
struct PageCursor {
    buffer: VecDeque<Row>,
    next_token: Option<String>,
    fetched_any: bool,
    finished: bool,
}

impl PageCursor {
    fn pop(&mut self) -> Option<Row> {
        self.buffer.pop_front()
    }

    /// True once every page has been fetched and handed out.
    fn exhausted(&self) -> bool {
        self.finished || (self.fetched_any && self.next_token.is_none() && self.buffer.is_empty())
    }

    fn token(&self) -> Option<&str> {
        self.next_token.as_deref()
    }

    fn load(&mut self, schema: &Schema, rows: &[TableRow], next_token: Option<String>) -> Result<()> {
        for wire in rows {
            self.buffer.push_back(decode_row(schema, wire)?);
        }
        self.fetched_any = true;
        self.next_token = next_token.filter(|t| !t.is_empty());
        Ok(())
    }

    fn finish(&mut self) {
        self.finished = true;
        self.buffer.clear();
    }
}

struct TableDataStream {
    client: Arc<BigQueryClient>,
    table: TableReference,
    schema: Arc<Schema>,
    page_size: u32,
    pages: PageCursor,
}

impl TableDataStream {
    async fn fetch_page(&mut self) -> Result<()> {
        let page = self
            .client
            .list_table_data(&self.table, self.page_size, self.pages.token())
            .await?;
        debug!(
            "Fetched {} rows from {} (more: {})",
            page.rows.len(),
            self.table.table_id,
            page.page_token.is_some()
        );
        self.pages.load(&self.schema, &page.rows, page.page_token)
    }
}

#[async_trait]
impl RemoteStream for TableDataStream {
    fn schema(&self) -> Option<Arc<Schema>> {
        Some(self.schema.clone())
    }

    async fn next_event(&mut self) -> StreamEvent {
        loop {
            if let Some(row) = self.pages.pop() {
                return StreamEvent::Data(row);
            }
            if self.pages.exhausted() {
                return StreamEvent::Close;
            }
            if let Err(e) = self.fetch_page().await {
                self.pages.finish();
                return StreamEvent::Error(e.with_property("table", self.table.table_id.as_str()));
            }
        }
    }

    async fn destroy(&mut self) {
        self.pages.finish();
    }
}

struct QueryResultsStream {
    client: Arc<BigQueryClient>,
    job: JobReference,
    /// Destination-table schema, reported to the consumer.
    schema: Option<Arc<Schema>>,
    /// Schema returned with the results, used to decode rows.
    row_schema: Option<Schema>,
    page_size: u32,
    poll_timeout: Duration,
    job_complete: bool,
    cancelled: bool,
    pages: PageCursor,
}

impl QueryResultsStream {
    async fn fetch_page(&mut self) -> Result<()> {
        let page = self
            .client
            .get_query_results(&self.job, self.page_size, self.pages.token(), self.poll_timeout)
            .await?;

        if !page.job_complete {
            debug!("Query job {} still running", self.job.job_id);
            return Ok(());
        }
        if !self.job_complete {
            self.job_complete = true;
            info!(
                "Query job {} completed ({} rows)",
                self.job.job_id,
                page.total_rows.as_deref().unwrap_or("?")
            );
        }

        if self.row_schema.is_none() {
            self.row_schema = page
                .schema
                .or_else(|| self.schema.as_deref().cloned());
        }
        let empty = Schema::default();
        let schema = match &self.row_schema {
            Some(schema) => schema,
            None if page.rows.is_empty() => &empty,
            None => {
                return Err(ExtractError::source_error("Query results carry no schema")
                    .with_property("job_id", self.job.job_id.as_str()))
            }
        };
        self.pages.load(schema, &page.rows, page.page_token)
    }
}

#[async_trait]
impl RemoteStream for QueryResultsStream {
    fn schema(&self) -> Option<Arc<Schema>> {
        self.schema.clone()
    }

    async fn next_event(&mut self) -> StreamEvent {
        loop {
            if let Some(row) = self.pages.pop() {
                return StreamEvent::Data(row);
            }
            if self.pages.exhausted() {
                return StreamEvent::Close;
            }
            if let Err(e) = self.fetch_page().await {
                self.pages.finish();
                return StreamEvent::Error(e.with_property("job_id", self.job.job_id.as_str()));
            }
        }
    }

    async fn destroy(&mut self) {
        self.pages.finish();
        if !self.job_complete && !self.cancelled {
            self.cancelled = true;
            cancel_quietly(&self.client, &self.job).await;
        }
    }
}
