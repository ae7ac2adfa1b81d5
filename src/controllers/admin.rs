//! Admin surface, consumed by operators.

use std::time::Duration;

use actix_web::{HttpResponse, Responder, web};
use serde::Deserialize;

use super::error_response;
use crate::AppState;
use crate::error::TriageError;
use crate::models::CreateQuarantineRuleRequest;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.route("/badmessages", web::get().to(bad_messages))
        .route("/badmessages/summary", web::get().to(bad_messages_summary))
        .route("/badmessage/{messageHash}", web::get().to(bad_message_details))
        .route("/skipmessage/{messageHash}", web::get().to(skip_message))
        .route("/peekmessage/{messageHash}", web::get().to(peek_message))
        .route("/skippedmessages", web::get().to(all_skipped_messages))
        .route("/skippedmessage/{messageHash}", web::get().to(skipped_message))
        .route("/reset", web::get().to(reset))
        .route("/quarantinerule", web::get().to(list_quarantine_rules))
        .route("/quarantinerule", web::post().to(add_quarantine_rule))
        .route("/quarantinerule/{id}", web::delete().to(delete_quarantine_rule))
        .route("/quarantinedmessages", web::get().to(quarantined_messages))
        .route(
            "/replayquarantinedmessage/{id}",
            web::get().to(replay_quarantined_message),
        );
}

#[derive(Deserialize)]
struct MinimumSeenQuery {
    #[serde(rename = "minimumSeenCount")]
    minimum_seen_count: Option<u64>,
}

async fn bad_messages(
    data: web::Data<AppState>,
    query: web::Query<MinimumSeenQuery>,
) -> impl Responder {
    HttpResponse::Ok().json(data.store.seen_hashes(query.minimum_seen_count))
}

async fn bad_messages_summary(
    data: web::Data<AppState>,
    query: web::Query<MinimumSeenQuery>,
) -> impl Responder {
    HttpResponse::Ok().json(data.store.summaries(query.minimum_seen_count))
}

async fn bad_message_details(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    HttpResponse::Ok().json(data.store.bad_message_reports(&path.into_inner()))
}

/// Mark a message hash to be skipped by the next worker that reports it.
async fn skip_message(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    data.store.skip_message(&path.into_inner());
    HttpResponse::Ok().finish()
}

/// Ask the reporting workers for a live payload capture and wait for it,
/// bounded by the configured timeout.
async fn peek_message(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let message_hash = path.into_inner();
    let wait = Duration::from_millis(data.config.peek_timeout_ms);

    match data.store.peek().await_peek(&message_hash, wait).await {
        Some(payload) => HttpResponse::Ok()
            .content_type("application/octet-stream")
            .body(payload),
        None => error_response(TriageError::Timeout),
    }
}

async fn all_skipped_messages(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(data.store.all_skipped_messages())
}

async fn skipped_message(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    HttpResponse::Ok().json(data.store.skipped_messages_for(&path.into_inner()))
}

#[derive(Deserialize)]
struct ResetQuery {
    #[serde(rename = "lastSeenCutoffSeconds")]
    last_seen_cutoff_seconds: Option<i64>,
}

async fn reset(data: web::Data<AppState>, query: web::Query<ResetQuery>) -> impl Responder {
    data.store
        .reset(query.last_seen_cutoff_seconds.map(chrono::Duration::seconds));
    HttpResponse::Ok().finish()
}

async fn list_quarantine_rules(data: web::Data<AppState>) -> impl Responder {
    match data.store.list_rules() {
        Ok(rules) => HttpResponse::Ok().json(rules),
        Err(e) => error_response(e),
    }
}

async fn add_quarantine_rule(
    data: web::Data<AppState>,
    body: web::Json<CreateQuarantineRuleRequest>,
) -> impl Responder {
    match data.store.add_rule(body.into_inner()) {
        Ok(rule) => HttpResponse::Created().json(rule),
        Err(e) => error_response(e),
    }
}

async fn delete_quarantine_rule(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    match data.store.delete_rule(&path.into_inner()) {
        Ok(()) => HttpResponse::Ok().finish(),
        Err(e) => error_response(e),
    }
}

async fn quarantined_messages(data: web::Data<AppState>) -> impl Responder {
    match data.quarantine.list() {
        Ok(messages) => HttpResponse::Ok().json(messages),
        Err(e) => error_response(e),
    }
}

async fn replay_quarantined_message(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    match data.quarantine.replay(&path.into_inner()).await {
        Ok(()) => HttpResponse::Ok().finish(),
        Err(e) => error_response(e),
    }
}
