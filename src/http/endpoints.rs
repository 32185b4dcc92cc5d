//! Applikation endpoints.

use crate::error::{ErrorKind, GatewayError, message_response};
use crate::http::AppState;
use crate::repository::ApplicationRepository;
use axum::{
    Json,
    extract::{Path, State, rejection::PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const APPLICATIONS_NOT_FOUND_MESSAGE: &str = "Applikationer not found";

/// Body of `GET /v1/applikationer/antal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountBody {
    pub antal: i32,
}

/// `GET /v1/applikation/{id}/afhaengigheder`
///
/// `id` must be a 32-bit integer; anything else is 404. The id does not
/// narrow the query.
pub async fn application_dependencies<R: ApplicationRepository>(
    State(state): State<AppState<R>>,
    id: Result<Path<i32>, PathRejection>,
) -> Response {
    let Ok(Path(id)) = id else {
        return StatusCode::NOT_FOUND.into_response();
    };
    debug!(id, "Fetching applikation afhaengigheder");

    match state.service().applications().await {
        Ok(applications) => Json(applications).into_response(),
        Err(err) if signals_absence(&err) => {
            warn!(id, kind = %err.kind(), "Applikationer not available");
            message_response(StatusCode::NOT_FOUND, APPLICATIONS_NOT_FOUND_MESSAGE)
        }
        Err(err) => err.into_response(),
    }
}

/// `GET /v1/applikationer/antal`
pub async fn application_count<R: ApplicationRepository>(
    State(state): State<AppState<R>>,
) -> Result<Json<CountBody>, GatewayError> {
    let antal = state.service().application_count().await?;
    Ok(Json(CountBody { antal }))
}

/// Data-store failures surface as "not found" on the list endpoint.
fn signals_absence(err: &GatewayError) -> bool {
    matches!(
        err.kind(),
        ErrorKind::ConnectionFailure
            | ErrorKind::ExecutionFailure
            | ErrorKind::Timeout
            | ErrorKind::NullResult
    )
}
