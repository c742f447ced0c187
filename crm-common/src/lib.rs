//! # CRM Common Library
//!
//! Shared code for the customer identity and classification engine:
//! - Error types
//! - Bootstrap configuration
//! - Domain models (unified customers, activities, notes, raw source records)
//! - Event bus
//! - Database schema
//! - Phone normalization and type-checked payload access

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod models;
pub mod phone;
pub mod time;
pub mod value_bag;

pub use error::{Error, Result};
pub use value_bag::ValueBag;
