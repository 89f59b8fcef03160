use crate::application::schedule::CronSchedule;
use crate::application::transformer::DisplayZone;
use crate::domain::entities::{OutputFormat, RetryConfig, SourceSpec};
use crate::domain::errors::{ExtractError, Result};
use chrono::format::{Item, StrftimeItems};
use clap::Parser;
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_RETRY: u32 = 5;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 10_000;
pub const DEFAULT_PERSISTENT_ERROR_COOLDOWN_MS: u64 = 600_000;
pub const DEFAULT_PAGE_SIZE: u32 = 10_000;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub bigquery: BigQueryConfig,
    pub output: OutputConfig,
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct BigQueryConfig {
    pub keyfile: Option<String>,
    pub project: Option<String>,
    pub dataset: Option<String>,
    pub table: Option<String>,
    pub sql: Option<String>,
    pub location: Option<String>,
    pub page_size: Option<u32>,
    pub api_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct OutputConfig {
    pub path: Option<String>,
    pub timestamp_format: Option<String>,
    pub sort_columns: Option<bool>,
    pub field_delimiter: Option<String>,
    pub utc_timestamps: Option<bool>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ScheduleConfig {
    pub cron: Option<String>,
    pub retry: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub persistent_error_cooldown_ms: Option<u64>,
}

#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file (YAML or JSON)
    #[arg(long, env = "EXTRACTOR_CONFIG")]
    pub config: Option<String>,
    /// Path to .env file, loaded before the other options are read
    #[arg(long, env = "ENV")]
    pub env: Option<String>,

    /// Output file path. Allowed extensions: csv, xlsx.
    #[arg(short, long, env = "OUTPUT")]
    pub output: Option<String>,
    /// Timestamp to append to output filename (strftime format)
    #[arg(short, long, env = "TIMESTAMP_FORMAT")]
    pub timestamp_format: Option<String>,

    /// Retry errors
    #[arg(short, long, env = "RETRY")]
    pub retry: Option<u32>,
    /// Time delay in ms before retrying errors
    #[arg(long, env = "RETRY_DELAY")]
    pub retry_delay: Option<u64>,
    /// Time in ms between re-extraction attempts after persistent error
    #[arg(short = 'c', long, env = "PERSISTENT_ERROR_COOLDOWN")]
    pub persistent_error_cooldown: Option<u64>,
    /// Cron expression to schedule extraction
    #[arg(long, env = "CRON")]
    pub cron: Option<String>,

    /// BigQuery key file
    #[arg(long, env = "BQKEYFILE")]
    pub bqkeyfile: Option<String>,
    /// BigQuery project name
    #[arg(long, env = "BQPROJECT")]
    pub bqproject: Option<String>,
    /// BigQuery dataset name
    #[arg(long, env = "BQDATASET")]
    pub bqdataset: Option<String>,
    /// BigQuery table name
    #[arg(long, env = "BQTABLE")]
    pub bqtable: Option<String>,
    /// Custom SQL query instead of a table name
    #[arg(long, env = "SQL")]
    pub sql: Option<String>,
    /// Location of the query job (e.g. EU, US)
    #[arg(long, env = "BQLOCATION")]
    pub bqlocation: Option<String>,
    /// Rows requested per page
    #[arg(long, env = "PAGE_SIZE")]
    pub page_size: Option<u32>,

    /// Order columns alphabetically instead of by schema
    #[arg(long, env = "SORT_COLUMNS")]
    pub sort_columns: bool,
    /// CSV field delimiter
    #[arg(long, env = "FIELD_DELIMITER")]
    pub field_delimiter: Option<String>,
    /// Render timestamps in UTC instead of local time
    #[arg(long, env = "UTC_TIMESTAMPS")]
    pub utc_timestamps: bool,
}

/// Everything needed to build the extractor, validated and typed.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub output_path: PathBuf,
    pub format: OutputFormat,
    pub timestamp_format: Option<String>,
    pub retry: RetryConfig,
    pub persistent_error_cooldown: Duration,
    pub cron: Option<CronSchedule>,
    pub keyfile: PathBuf,
    pub project: String,
    pub dataset: String,
    pub source: SourceSpec,
    pub location: Option<String>,
    pub page_size: u32,
    pub api_url: Option<String>,
    pub sort_columns: bool,
    pub delimiter: u8,
    pub display_zone: DisplayZone,
}

fn set(slot: &mut Option<String>, value: &Option<String>) {
    if let Some(v) = value {
        *slot = Some(v.clone());
    }
}

/// `None` for missing or blank values.
fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn required<'a>(value: &'a Option<String>, flag: &str) -> Result<&'a str> {
    non_empty(value).ok_or_else(|| ExtractError::ConfigError(format!("{} must be set", flag)))
}

impl AppConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        let config: AppConfig = if path.ends_with(".json") {
            serde_json::from_str(&contents)
                .map_err(|e| ExtractError::ConfigError(format!("{}: {}", path, e)))?
        } else {
            serde_yaml::from_str(&contents)
                .map_err(|e| ExtractError::ConfigError(format!("{}: {}", path, e)))?
        };

        Ok(config)
    }

    pub fn merge_cli(&mut self, args: &CliArgs) {
        set(&mut self.output.path, &args.output);
        set(&mut self.output.timestamp_format, &args.timestamp_format);
        set(&mut self.output.field_delimiter, &args.field_delimiter);
        if args.sort_columns { self.output.sort_columns = Some(true); }
        if args.utc_timestamps { self.output.utc_timestamps = Some(true); }

        if let Some(r) = args.retry { self.schedule.retry = Some(r); }
        if let Some(d) = args.retry_delay { self.schedule.retry_delay_ms = Some(d); }
        if let Some(c) = args.persistent_error_cooldown { self.schedule.persistent_error_cooldown_ms = Some(c); }
        set(&mut self.schedule.cron, &args.cron);

        set(&mut self.bigquery.keyfile, &args.bqkeyfile);
        set(&mut self.bigquery.project, &args.bqproject);
        set(&mut self.bigquery.dataset, &args.bqdataset);
        set(&mut self.bigquery.table, &args.bqtable);
        set(&mut self.bigquery.sql, &args.sql);
        set(&mut self.bigquery.location, &args.bqlocation);
        if let Some(p) = args.page_size { self.bigquery.page_size = Some(p); }
    }

    /// Validates the merged configuration.
    pub fn resolve(&self) -> Result<JobSettings> {
        // 1. Output
        let output = required(&self.output.path, "--output")?;
        let output_path = PathBuf::from(output);
        let extension = Path::new(output)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let format = OutputFormat::from_extension(&extension).ok_or_else(|| {
            ExtractError::ConfigError(format!(
                "Unsupported output extension {}. Allowed extensions: {}.",
                extension,
                OutputFormat::ALLOWED_EXTENSIONS.join(", ")
            ))
        })?;

        let timestamp_format = non_empty(&self.output.timestamp_format).map(str::to_string);
        if let Some(fmt) = &timestamp_format {
            if StrftimeItems::new(fmt).any(|item| matches!(item, Item::Error)) {
                return Err(ExtractError::ConfigError(format!(
                    "Invalid timestamp format '{}'",
                    fmt
                )));
            }
        }

        let delimiter = parse_delimiter(non_empty(&self.output.field_delimiter))?;

        // 2. Retry & schedule
        let retry = RetryConfig {
            max_attempts: self.schedule.retry.unwrap_or(DEFAULT_RETRY),
            delay: Duration::from_millis(self.schedule.retry_delay_ms.unwrap_or(DEFAULT_RETRY_DELAY_MS)),
            reset_on_success: true,
        };
        let persistent_error_cooldown = Duration::from_millis(
            self.schedule
                .persistent_error_cooldown_ms
                .unwrap_or(DEFAULT_PERSISTENT_ERROR_COOLDOWN_MS),
        );
        let cron = non_empty(&self.schedule.cron)
            .map(CronSchedule::parse)
            .transpose()?;

        // 3. Source
        let keyfile = PathBuf::from(required(&self.bigquery.keyfile, "--bqkeyfile")?);
        let project = required(&self.bigquery.project, "--bqproject")?.to_string();
        let dataset = required(&self.bigquery.dataset, "--bqdataset")?.to_string();
        let source = match (non_empty(&self.bigquery.table), non_empty(&self.bigquery.sql)) {
            (Some(table), None) => SourceSpec::Table(table.to_string()),
            (None, Some(sql)) => SourceSpec::Query(sql.to_string()),
            (None, None) => {
                return Err(ExtractError::ConfigError("--bqtable or --sql must be set".into()))
            }
            (Some(_), Some(_)) => {
                return Err(ExtractError::ConfigError(
                    "--bqtable and --sql cannot be used together".into(),
                ))
            }
        };

        let page_size = self.bigquery.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page_size == 0 {
            return Err(ExtractError::ConfigError("--page-size must be greater than 0".into()));
        }

        let display_zone = if self.output.utc_timestamps.unwrap_or(false) {
            DisplayZone::utc()
        } else {
            DisplayZone::Local
        };

        Ok(JobSettings {
            output_path,
            format,
            timestamp_format,
            retry,
            persistent_error_cooldown,
            cron,
            keyfile,
            project,
            dataset,
            source,
            location: non_empty(&self.bigquery.location).map(str::to_string),
            page_size,
            api_url: non_empty(&self.bigquery.api_url).map(str::to_string),
            sort_columns: self.output.sort_columns.unwrap_or(false),
            delimiter,
            display_zone,
        })
    }
}

/// Loads the dotenv file named by `--env` (or `ENV`) into the process
/// environment, overriding variables that are already set. Without one,
/// `./.env` is loaded if it exists.
///
/// Must run before [`CliArgs`] is parsed so the loaded values are seen.
pub fn load_env_file<I, S>(argv: I) -> Result<Option<PathBuf>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let argv: Vec<String> = argv.into_iter().map(Into::into).collect();
    let explicit = env_file_arg(&argv).or_else(|| {
        std::env::var("ENV")
            .ok()
            .filter(|v| !v.trim().is_empty())
    });

    match explicit {
        Some(path) => {
            dotenvy::from_path_override(&path).map_err(|e| {
                ExtractError::ConfigError(format!("Cannot load env file {}: {}", path, e))
            })?;
            Ok(Some(PathBuf::from(path)))
        }
        None => match dotenvy::dotenv_override() {
            Ok(path) => Ok(Some(path)),
            Err(e) if e.not_found() => Ok(None),
            Err(e) => Err(ExtractError::ConfigError(format!("Cannot load .env: {}", e))),
        },
    }
}

fn env_file_arg(argv: &[String]) -> Option<String> {
    let mut args = argv.iter().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--env" {
            return args.next().cloned();
        }
        if let Some(path) = arg.strip_prefix("--env=") {
            return Some(path.to_string());
        }
    }
    None
}

fn parse_delimiter(value: Option<&str>) -> Result<u8> {
    match value {
        None => Ok(b','),
        Some("\\t") | Some("tab") => Ok(b'\t'),
        Some(v) if v.len() == 1 && v.is_ascii() => Ok(v.as_bytes()[0]),
        Some(v) => Err(ExtractError::ConfigError(format!(
            "Field delimiter must be a single ASCII character, got '{}'",
            v
        ))),
    }
}
