//! Type definitions

pub mod cargo;
pub mod import_batch;
pub mod messages;

pub use cargo::*;
pub use import_batch::*;
pub use messages::*;
