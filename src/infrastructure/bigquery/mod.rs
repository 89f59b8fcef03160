pub mod auth;
pub mod bigquery_source_adapter;
pub mod client;
pub mod value_decoder;
