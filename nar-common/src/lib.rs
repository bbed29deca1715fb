//! # NAR Common Library
//!
//! Shared code for the networked audio renderer crates:
//! - Error type and `Result` alias
//! - Configuration file resolution
//! - Jiffy timing unit and conversions

pub mod config;
pub mod error;
pub mod timing;

pub use error::{Error, Result};
