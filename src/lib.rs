//! # BigQuery File Extractor
//!
//! A recurring extraction job that reads a BigQuery table (or the result of
//! a query), normalizes date and timestamp values, and writes the whole
//! result set to a single CSV or XLSX file, optionally on a cron schedule.
//!
//! This crate follows the **Hexagonal Architecture** (Ports and Adapters):
//! - `domain`: rows, schemas, errors.
//! - `ports`: the source and sink contracts.
//! - `application`: stream adapter, transformer, serializer, retry and the scheduler.
//! - `infrastructure`: BigQuery REST and local filesystem adapters.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod ports;
