use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Redirect},
    Json,
};
use portal_core::models::RequestView;
use portal_core::portal::{Description, FieldErrors};
use portal_core::results::{LogStream, ARCHIVE_NAME};
use tracing::info;

use crate::api::{ChoicesResponse, DescriptionQuery, LogQuery, ResultsQuery, SubmitForm};
use crate::auth::{CurrentUser, MaybeUser};
use crate::error::ApiError;
use crate::AppState;

pub async fn health_check() -> &'static str {
    "Portal Gateway: Operational"
}

// GET /: the APIs this caller may submit against; anonymous visitors see guest APIs
pub async fn home(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
) -> Result<Json<ChoicesResponse>, ApiError> {
    let apis = state.portal.choices(user.as_ref()).await?;
    Ok(Json(ChoicesResponse { apis }))
}

// POST /: validate, persist, enqueue, then send the caller to the status page
pub async fn submit(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    body: Result<Json<SubmitForm>, JsonRejection>,
) -> Result<Redirect, ApiError> {
    let Json(form) = body.map_err(|rejection| {
        let mut errors = FieldErrors::default();
        errors.add("non_field_errors", rejection.body_text());
        ApiError::Validation(errors)
    })?;
    let submission = form.into_submission().map_err(ApiError::Validation)?;
    info!("User '{}' submitting api {:?}", user.username, submission.api_id);
    state.portal.submit(&user, submission).await?;
    Ok(Redirect::to("/requests"))
}

pub async fn list_requests(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
) -> Result<Json<Vec<RequestView>>, ApiError> {
    Ok(Json(state.portal.list_requests(user.as_ref()).await?))
}

pub async fn download_results(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<ResultsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let archive = state.portal.package_results(&user, query.request_id).await?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/x-zip-compressed".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename={ARCHIVE_NAME}")),
        ],
        archive,
    ))
}

pub async fn download_logs(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<LogQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let stream: LogStream = query.file.parse().map_err(ApiError::BadRequest)?;
    let content = state.portal.read_log(&user, query.request_id, stream).await?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/text".to_string()),
            (header::CONTENT_DISPOSITION, format!("inline; filename={}", stream.file_name())),
        ],
        content,
    ))
}

pub async fn api_description(
    State(state): State<AppState>,
    Query(query): Query<DescriptionQuery>,
) -> Json<Description> {
    let api_id = query.api_id.as_deref().and_then(|raw| raw.trim().parse().ok());
    Json(state.portal.describe(api_id).await)
}
