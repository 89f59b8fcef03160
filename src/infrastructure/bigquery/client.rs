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

//! Thin client for the BigQuery REST v2 endpoints used by the extractor.
//!
//! Only the calls needed to read a table or a query result are covered:
//! `tables.get`, `tabledata.list`, `jobs.insert`, `jobs.get`,
//! `jobs.getQueryResults` and `jobs.cancel`.

use crate::domain::entities::Schema;
use crate::domain::errors::{ExtractError, Result};
use crate::infrastructure::bigquery::auth::TokenSource;
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// Reference to a table, as used in job metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableReference {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReference {
    pub project_id: String,
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableMetadata {
    #[serde(default)]
    pub schema: Option<Schema>,
    #[serde(default)]
    pub num_rows: Option<String>,
}

/// One cell of a wire row: `{"v": ...}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TableCell {
    #[serde(default)]
    pub v: serde_json::Value,
}

/// One wire row: `{"f": [cell, ...]}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TableRow {
    #[serde(default)]
    pub f: Vec<TableCell>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDataPage {
    #[serde(default)]
    pub rows: Vec<TableRow>,
    #[serde(default)]
    pub page_token: Option<String>,
    #[serde(default)]
    pub total_rows: Option<String>,
}

/// An error as reported in `status.errorResult` / `errors[]`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorProto {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error_result: Option<ErrorProto>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryJobConfig {
    #[serde(default)]
    pub destination_table: Option<TableReference>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobConfiguration {
    #[serde(default)]
    pub query: Option<QueryJobConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_reference: JobReference,
    #[serde(default)]
    pub configuration: JobConfiguration,
    #[serde(default)]
    pub status: JobStatus,
}

impl Job {
    pub fn destination_table(&self) -> Option<&TableReference> {
        self.configuration
            .query
            .as_ref()
            .and_then(|q| q.destination_table.as_ref())
    }

    pub fn is_done(&self) -> bool {
        self.status.state.as_deref() == Some("DONE")
    }

    /// Turns `status.errorResult` into a source error, if the job failed.
    pub fn error(&self) -> Option<ExtractError> {
        self.status
            .error_result
            .as_ref()
            .map(|err| job_error(err, &self.job_reference))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResultsPage {
    #[serde(default)]
    pub job_complete: bool,
    #[serde(default)]
    pub schema: Option<Schema>,
    #[serde(default)]
    pub rows: Vec<TableRow>,
    #[serde(default)]
    pub page_token: Option<String>,
    #[serde(default)]
    pub total_rows: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

pub(crate) fn job_error(err: &ErrorProto, job: &JobReference) -> ExtractError {
    let mut e = ExtractError::source_error(err.message.clone().unwrap_or_else(|| "Query job failed".into()))
        .with_property("job_id", job.job_id.as_str());
    if let Some(reason) = &err.reason {
        e = e.with_property("reason", reason.as_str());
    }
    if let Some(location) = &err.location {
        e = e.with_property("location", location.as_str());
    }
    e
}

/// Authenticated access to one BigQuery project.
#[derive(Clone)]
pub struct BigQueryClient {
    http: reqwest::Client,
    base_url: String,
    project: String,
    tokens: Arc<dyn TokenSource>,
}

impl BigQueryClient {
    pub fn new(http: reqwest::Client, project: impl Into<String>, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            http,
            base_url: DEFAULT_API_URL.to_string(),
            project: project.into(),
            tokens,
        }
    }

    /// Points the client at another endpoint (an emulator, a mock server).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn authorized(&self, builder: RequestBuilder) -> Result<RequestBuilder> {
        let token = self.tokens.token().await?;
        Ok(builder.bearer_auth(token))
    }

    async fn handle_response<T: DeserializeOwned>(&self, response: Response) -> Result<T> {
        let status = response.status();
        let url = response.url().to_string();

        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        let mut err = match serde_json::from_str::<ApiErrorBody>(&body) {
            Ok(parsed) => {
                let first = parsed.error.errors.into_iter().next().unwrap_or_default();
                let mut e = ExtractError::source_error(parsed.error.message);
                if let Some(reason) = first.reason {
                    e = e.with_property("reason", reason);
                }
                if let Some(location) = first.location {
                    e = e.with_property("location", location);
                }
                e
            }
            Err(_) => ExtractError::source_error(body),
        };
        err = err
            .with_property("status", status.as_u16().to_string())
            .with_property("url", url);
        Err(err)
    }

    /// `tables.get`
    pub async fn get_table(&self, table: &TableReference) -> Result<TableMetadata> {
        let url = self.url(&format!(
            "projects/{}/datasets/{}/tables/{}",
            table.project_id, table.dataset_id, table.table_id
        ));
        let request = self.authorized(self.http.get(&url)).await?;
        let response = request.send().await?;
        self.handle_response(response).await
    }

    /// `tabledata.list`, one page.
    pub async fn list_table_data(
        &self,
        table: &TableReference,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<TableDataPage> {
        let url = self.url(&format!(
            "projects/{}/datasets/{}/tables/{}/data",
            table.project_id, table.dataset_id, table.table_id
        ));
        let mut query = vec![
            ("maxResults", page_size.to_string()),
            ("formatOptions.useInt64Timestamp", "true".to_string()),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }

        let request = self.authorized(self.http.get(&url).query(&query)).await?;
        let response = request.send().await?;
        self.handle_response(response).await
    }

    /// `jobs.insert` for a standard-SQL query job.
    pub async fn insert_query_job(
        &self,
        sql: &str,
        default_dataset: &str,
        location: Option<&str>,
    ) -> Result<Job> {
        let url = self.url(&format!("projects/{}/jobs", self.project));
        let mut job_reference = serde_json::json!({ "projectId": self.project });
        if let Some(location) = location {
            job_reference["location"] = serde_json::Value::String(location.to_string());
        }
        let body = serde_json::json!({
            "jobReference": job_reference,
            "configuration": {
                "query": {
                    "query": sql,
                    "useLegacySql": false,
                    "defaultDataset": {
                        "projectId": self.project,
                        "datasetId": default_dataset,
                    }
                }
            }
        });

        let request = self.authorized(self.http.post(&url).json(&body)).await?;
        let response = request.send().await?;
        self.handle_response(response).await
    }

    /// `jobs.get`
    pub async fn get_job(&self, job: &JobReference) -> Result<Job> {
        let url = self.url(&format!("projects/{}/jobs/{}", job.project_id, job.job_id));
        let request = self
            .authorized(self.http.get(&url).query(&location_param(job)))
            .await?;
        let response = request.send().await?;
        self.handle_response(response).await
    }

    /// `jobs.getQueryResults`, one page. Waits server-side up to `timeout`
    /// for the job to complete.
    pub async fn get_query_results(
        &self,
        job: &JobReference,
        page_size: u32,
        page_token: Option<&str>,
        timeout: Duration,
    ) -> Result<QueryResultsPage> {
        let url = self.url(&format!("projects/{}/queries/{}", job.project_id, job.job_id));
        let mut query = location_param(job);
        query.push(("maxResults", page_size.to_string()));
        query.push(("timeoutMs", timeout.as_millis().to_string()));
        query.push(("formatOptions.useInt64Timestamp", "true".to_string()));
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }

        let request = self.authorized(self.http.get(&url).query(&query)).await?;
        let response = request.send().await?;
        self.handle_response(response).await
    }

    /// `jobs.cancel`
    pub async fn cancel_job(&self, job: &JobReference) -> Result<()> {
        let url = self.url(&format!("projects/{}/jobs/{}/cancel", job.project_id, job.job_id));
        let request = self
            .authorized(self.http.post(&url).query(&location_param(job)))
            .await?;
        let response = request.send().await?;
        let _: serde_json::Value = self.handle_response(response).await?;
        Ok(())
    }
}

fn location_param(job: &JobReference) -> Vec<(&'static str, String)> {
    job.location
        .iter()
        .map(|l| ("location", l.clone()))
        .collect()
}
