//! Liveness, readiness and metrics endpoints

use actix_web::{web, HttpResponse, Responder};
use serde::Serialize;
use tokio::sync::watch;

use crate::services::PipelineState;

#[derive(Clone)]
pub struct HealthState {
    pub pipeline: watch::Receiver<PipelineState>,
}

#[derive(Serialize)]
struct ReadinessResponse {
    status: &'static str,
    pipeline: String,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/ready", web::get().to(ready))
        .route("/metrics", web::get().to(metrics));
}

async fn health() -> impl Responder {
    "OK"
}

async fn ready(state: web::Data<HealthState>) -> HttpResponse {
    let pipeline = *state.pipeline.borrow();
    let body = ReadinessResponse {
        status: if pipeline == PipelineState::Running {
            "ready"
        } else {
            "not_ready"
        },
        pipeline: pipeline.to_string(),
    };

    if pipeline == PipelineState::Running {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

async fn metrics() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(crate::metrics::render())
}
