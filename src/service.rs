//! Application service used by the HTTP endpoints.

use crate::error::DbResult;
use crate::models::Application;
use crate::repository::ApplicationRepository;

#[derive(Debug)]
pub struct ApplicationService<R> {
    repository: R,
}

impl<R: ApplicationRepository> ApplicationService<R> {
    pub fn new(repository: R) -> Self {
        Self { repository }
    }

    pub async fn applications(&self) -> DbResult<Vec<Application>> {
        self.repository.applications().await
    }

    pub async fn application_count(&self) -> DbResult<i32> {
        self.repository.application_count().await
    }
}
