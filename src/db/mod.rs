//! Database access layer.
//!
//! This module provides the dynamic data-access gateway:
//! - Connection settings and the connector/session seam
//! - SQL planning and parameter encoding
//! - Argument type discovery from the system catalog
//! - Parameter binding
//! - Row and column decoding

pub mod catalog;
pub mod connection;
pub mod encoder;
pub mod gateway;
pub mod params;
pub mod types;

pub use connection::{ConnectionString, Connector, PgConnector, PgSession, Session};
pub use encoder::{ArgumentTypes, Statement, encode_literal, plan, plan_typed};
pub use gateway::{ConnectionState, Gateway, GatewayOptions};
