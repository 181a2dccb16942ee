//! Core error and result types shared across the crate.

pub mod error;

pub use error::{AppError, AppResult, ErrorResponse};
