//! HTTP layer for the OpenTransfer API.
//!
//! - `endpoints`: the applikation handlers
//! - `server`: listener and graceful shutdown

pub mod endpoints;
pub mod server;

pub use server::HttpServer;

use crate::auth::{ApiKeyConfig, api_key_middleware};
use crate::config::LocaleSettings;
use crate::error::ServerError;
use crate::repository::ApplicationRepository;
use crate::service::ApplicationService;
use axum::{
    Router,
    http::{HeaderValue, header},
    middleware,
    routing::get,
};
use std::sync::Arc;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

/// Shared handler state.
pub struct AppState<R> {
    service: Arc<ApplicationService<R>>,
    content_language: HeaderValue,
}

impl<R> Clone for AppState<R> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            content_language: self.content_language.clone(),
        }
    }
}

impl<R: ApplicationRepository> AppState<R> {
    pub fn new(service: ApplicationService<R>, locale: &LocaleSettings) -> Result<Self, ServerError> {
        let content_language = HeaderValue::from_str(&locale.culture).map_err(|_| {
            ServerError::Config(format!("Culture '{}' is not a valid header value", locale.culture))
        })?;
        Ok(Self {
            service: Arc::new(service),
            content_language,
        })
    }

    pub fn service(&self) -> &ApplicationService<R> {
        &self.service
    }

    pub fn content_language(&self) -> &HeaderValue {
        &self.content_language
    }
}

/// Build the router with authentication, tracing and the culture header.
pub fn router<R: ApplicationRepository>(state: AppState<R>, api_key: ApiKeyConfig) -> Router {
    let content_language = state.content_language().clone();

    Router::new()
        .route(
            "/v1/applikation/{id}/afhaengigheder",
            get(endpoints::application_dependencies::<R>),
        )
        .route(
            "/v1/applikationer/antal",
            get(endpoints::application_count::<R>),
        )
        .with_state(state)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CONTENT_LANGUAGE,
            content_language,
        ))
        .layer(middleware::from_fn_with_state(
            Arc::new(api_key),
            api_key_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}
