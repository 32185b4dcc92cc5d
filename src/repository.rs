//! Application repository.
//!
//! Reads OpenTransfer applications through the gateway. Every call builds
//! its own [`Gateway`], so concurrent requests never share a session.

use crate::db::{Connector, Gateway, GatewayOptions, PgConnector};
use crate::error::DbResult;
use crate::models::{Application, InvocationRequest, Outcome};
use std::future::Future;
use tracing::{debug, error};

/// Set-returning function listing every application.
pub const APPLICATIONS_FUNCTION: &str = "kenosis.fn_get_applikationer()";

/// Scalar query counting applications.
pub const APPLICATION_COUNT_QUERY: &str = "SELECT kenosis.fn_get_antal_applikationer()";

pub trait ApplicationRepository: Send + Sync + 'static {
    /// All applications; an empty list when the function returns no rows.
    fn applications(&self) -> impl Future<Output = DbResult<Vec<Application>>> + Send;

    fn application_count(&self) -> impl Future<Output = DbResult<i32>> + Send;
}

/// Repository backed by the PostgreSQL functions in the `kenosis` schema.
#[derive(Debug, Clone)]
pub struct DbApplicationRepository<C = PgConnector> {
    connector: C,
    options: GatewayOptions,
}

impl<C: Connector + Clone> DbApplicationRepository<C> {
    pub fn new(connector: C, options: GatewayOptions) -> Self {
        Self { connector, options }
    }

    fn gateway(&self) -> Gateway<C> {
        Gateway::new(self.connector.clone(), self.options.clone())
    }
}

impl<C> ApplicationRepository for DbApplicationRepository<C>
where
    C: Connector + Clone + 'static,
{
    async fn applications(&self) -> DbResult<Vec<Application>> {
        let request = InvocationRequest::function(APPLICATIONS_FUNCTION);
        match self.gateway().invoke_outcome(&request).await {
            Outcome::Rows(table) => {
                debug!(rows = table.row_count(), "Fetched applikationer");
                Ok(table
                    .into_rows()
                    .into_iter()
                    .map(Application::from_row)
                    .collect())
            }
            Outcome::Empty => {
                debug!("No applikationer returned");
                Ok(Vec::new())
            }
            Outcome::Failed(err) => {
                error!(kind = %err.kind(), error = %err, "Error fetching applikationer");
                Err(err)
            }
        }
    }

    async fn application_count(&self) -> DbResult<i32> {
        self.gateway()
            .invoke_scalar::<i32>(APPLICATION_COUNT_QUERY, &[])
            .await
            .inspect_err(|err| {
                error!(kind = %err.kind(), error = %err, "Error fetching applikationer count");
            })
    }
}
