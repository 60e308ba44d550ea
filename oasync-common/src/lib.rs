//! # oasync common library
//!
//! Shared code for the catalog sync service:
//! - Error and result types
//! - Configuration loading and root folder resolution
//! - Database bootstrap (settings table, default settings)
//! - Entity kinds and the progress event bus

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod kind;

pub use error::{Error, Result};
pub use kind::EntityKind;
