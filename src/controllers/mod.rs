pub mod admin;
pub mod health;
pub mod reporting;

use actix_web::HttpResponse;

use crate::error::TriageError;

/// Map a triage error onto an HTTP response.
pub(crate) fn error_response(err: TriageError) -> HttpResponse {
    match &err {
        TriageError::NotFound(_) => HttpResponse::NotFound().json(serde_json::json!({
            "error": err.to_string()
        })),
        TriageError::InvalidExpression(_) => HttpResponse::BadRequest().json(serde_json::json!({
            "error": err.to_string()
        })),
        TriageError::UnsupportedReplayTarget => {
            HttpResponse::UnprocessableEntity().json(serde_json::json!({
                "error": err.to_string()
            }))
        }
        TriageError::Timeout => HttpResponse::NotFound().finish(),
        TriageError::Publish(_) => {
            log::error!("Bus publish failed: {}", err);
            HttpResponse::BadGateway().json(serde_json::json!({
                "error": err.to_string()
            }))
        }
        _ => {
            log::error!("Internal error: {}", err);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Internal server error"
            }))
        }
    }
}
