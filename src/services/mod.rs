//! Business logic services

pub mod error;
pub mod import_engine;
pub mod import_processor;
pub mod progress;
pub mod single_flight;
pub mod spreadsheet;
pub mod storage;
pub mod transform;
