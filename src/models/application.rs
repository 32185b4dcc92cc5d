//! The `Application` entity served by the applikation endpoints.

use crate::models::result::Row;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// An application as returned by `kenosis.fn_get_applikationer()`.
///
/// The column set is owned by the database function and has not been pinned
/// down, so the row is carried as-is and serialized transparently.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Application {
    fields: Row,
}

impl Application {
    pub fn from_row(row: Row) -> Self {
        Self { fields: row }
    }

    pub fn fields(&self) -> &Row {
        &self.fields
    }

    /// Look up a single column value.
    pub fn get(&self, column: &str) -> Option<&JsonValue> {
        self.fields.get(column)
    }
}
