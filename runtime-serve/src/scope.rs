//! `RunnableScope` extraction from `x-org-id`/`x-user-id`/`x-project-id`
//! headers (spec §6 "Scope headers").

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use runtime_core::RunnableScope;

use crate::error::ApiError;

pub struct Scope(pub RunnableScope);

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for Scope
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let org_id = header_str(parts, "x-org-id")
            .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", "missing x-org-id header"))?;
        let user_id = header_str(parts, "x-user-id")
            .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", "missing x-user-id header"))?;
        let mut scope = RunnableScope::new(org_id, user_id);
        if let Some(project_id) = header_str(parts, "x-project-id") {
            scope = scope.with_project(project_id);
        }
        Ok(Scope(scope))
    }
}

fn header_str(parts: &Parts, name: &str) -> Option<String> {
    parts.headers.get(name)?.to_str().ok().map(str::to_string)
}
