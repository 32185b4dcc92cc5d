//! Data models for the OpenTransfer API.
//!
//! This module re-exports all model types used throughout the application.

pub mod application;
pub mod invocation;
pub mod result;

// Re-export commonly used types
pub use application::Application;
pub use invocation::{DecimalText, InvocationKind, InvocationRequest, Parameter, SqlValue};
pub use result::{ColumnMetadata, FromScalar, Outcome, Row, TabularResult};
