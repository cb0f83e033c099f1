//! Database queries

pub mod cargo;
pub mod import_batch;
