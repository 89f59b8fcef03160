//! Ports: the traits the application layer depends on.

pub mod sink_port;
pub mod source_port;
