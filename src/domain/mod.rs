//! Domain model: entities and errors shared by every layer.

pub mod entities;
pub mod errors;
