use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;

/// Set by the upstream authentication layer.
pub const STUDENT_ID_HEADER: &str = "x-student-id";

/// Caller identity, inserted into request extensions by [`require_student`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StudentId(pub i64);

pub fn parse_student_id(raw: &str) -> Option<StudentId> {
    raw.trim().parse::<i64>().ok().filter(|id| *id > 0).map(StudentId)
}

pub async fn require_student(mut req: Request, next: Next) -> Response {
    let Some(header) = req.headers().get(STUDENT_ID_HEADER) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "unauthorized", "message": "Missing X-Student-Id header"})),
        )
            .into_response();
    };
    let Some(student) = header.to_str().ok().and_then(parse_student_id) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "unauthorized", "message": "Invalid X-Student-Id header"})),
        )
            .into_response();
    };

    req.extensions_mut().insert(student);
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn student_ids_must_be_positive_integers() {
        assert_eq!(parse_student_id(" 42 "), Some(StudentId(42)));
        assert_eq!(parse_student_id("0"), None);
        assert_eq!(parse_student_id("-3"), None);
        assert_eq!(parse_student_id("abc"), None);
    }
}
