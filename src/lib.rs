//! OpenTransfer API Library
//!
//! HTTP API exposing OpenTransfer application data from PostgreSQL, built on
//! a dynamic data-access gateway that invokes database functions, procedures
//! and scalar queries for callers that do not know the schema ahead of time.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod models;
pub mod repository;
pub mod service;

pub use config::Config;
pub use db::Gateway;
pub use error::{GatewayError, ServerError};
