//! Reporting surface, consumed by worker services.

use actix_web::{HttpResponse, Responder, web};

use super::error_response;
use crate::AppState;
use crate::models::{ExceptionReport, PeekReply, SkippedMessage};

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.route("/reportexception", web::post().to(report_exception))
        .route("/peekreply", web::post().to(peek_reply))
        .route("/storeskippedmessage", web::post().to(store_skipped_message));
}

/// A worker failed to process a message; answer with the triage verdict.
async fn report_exception(
    data: web::Data<AppState>,
    body: web::Json<ExceptionReport>,
) -> impl Responder {
    let report = body.into_inner();
    let verdict = data
        .store
        .triage(&report, data.config.retries_before_logging);
    HttpResponse::Ok().json(verdict)
}

/// A worker delivered the payload capture an operator asked for.
async fn peek_reply(data: web::Data<AppState>, body: web::Json<PeekReply>) -> impl Responder {
    let reply = body.into_inner();
    data.store
        .peek()
        .submit_reply(&reply.message_hash, reply.message_payload);
    HttpResponse::Ok().finish()
}

/// A worker skipped a message; persist the audit copy and the durable
/// quarantine record.
async fn store_skipped_message(
    data: web::Data<AppState>,
    body: web::Json<SkippedMessage>,
) -> impl Responder {
    match data.quarantine.store_skipped(&data.store, body.into_inner()) {
        Ok(_) => HttpResponse::Ok().finish(),
        Err(e) => error_response(e),
    }
}
