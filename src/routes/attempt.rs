use axum::{
    extract::{Path, State},
    Extension, Json,
};

use crate::dto::attempt_dto::{SubmitPreview, SubmitSummary};
use crate::error::Result;
use crate::middleware::auth::StudentId;
use crate::AppState;

#[axum::debug_handler]
pub async fn submit_preview(
    State(state): State<AppState>,
    Extension(student): Extension<StudentId>,
    Path(attempt_id): Path<i64>,
) -> Result<Json<SubmitPreview>> {
    let preview = state.finalize_service.submit_preview(attempt_id, student.0).await?;
    Ok(Json(preview))
}

#[axum::debug_handler]
pub async fn submit(
    State(state): State<AppState>,
    Extension(student): Extension<StudentId>,
    Path(attempt_id): Path<i64>,
) -> Result<Json<SubmitSummary>> {
    let summary = state.finalize_service.submit(attempt_id, student.0).await?;
    Ok(Json(summary))
}
