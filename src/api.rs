//! Admin HTTP surface over the records core.

use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, ResponseError};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

use crate::database::{Correction, Database, Profile};
use crate::error::{SchemaError, WriteError};
use crate::lifecycle::Sweeper;
use crate::model::{EntityKind, RowId};
use crate::value::FieldMap;

pub struct AppState {
    pub db: Arc<Database>,
    pub sweeper: Arc<Sweeper>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error("{0}")]
    BadRequest(String),

    #[error("background task failed: {0}")]
    Blocking(#[from] actix_web::error::BlockingError),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Schema(SchemaError::UnknownEntity(_)) => StatusCode::NOT_FOUND,
            ApiError::Schema(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Write(err) => match err {
                WriteError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                WriteError::Stale(_) | WriteError::Inactive(_) => StatusCode::CONFLICT,
                WriteError::NotFound { .. } => StatusCode::NOT_FOUND,
                WriteError::NotDeactivatable(_) | WriteError::NotCorrectable(_) => {
                    StatusCode::BAD_REQUEST
                }
                WriteError::Schema(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Blocking(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            ApiError::Write(WriteError::Validation(err)) => json!({
                "error": self.to_string(),
                "entity": err.entity,
                "violations": err.violations,
            }),
            ApiError::Write(WriteError::Stale(err)) => json!({
                "error": self.to_string(),
                "expected": err.expected,
                "actual": err.actual,
            }),
            _ => json!({ "error": self.to_string() }),
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}

#[derive(Deserialize)]
pub struct UpdateRequest {
    pub version: u64,
    pub fields: FieldMap,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionRequest {
    pub reason: String,
    pub corrected_by: RowId,
    pub fields: FieldMap,
}

/// An account plus exactly one of `student` or `faculty`.
#[derive(Deserialize)]
pub struct EnrollmentRequest {
    pub account: FieldMap,
    #[serde(default)]
    pub student: Option<FieldMap>,
    #[serde(default)]
    pub faculty: Option<FieldMap>,
}

fn entity(state: &AppState, name: &str) -> Result<EntityKind, ApiError> {
    Ok(state.db.validator().schema().resolve(name)?)
}

async fn health_check() -> HttpResponse {
    HttpResponse::Ok().body("College records core is running")
}

async fn list_entities(state: web::Data<AppState>) -> HttpResponse {
    let names: Vec<&str> = state
        .db
        .validator()
        .schema()
        .kinds()
        .map(EntityKind::as_str)
        .collect();
    HttpResponse::Ok().json(names)
}

async fn describe_entity(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let kind = entity(&state, &path)?;
    Ok(HttpResponse::Ok().json(state.db.validator().schema().entity(kind)))
}

async fn entity_edges(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let graph = state.db.validator().graph();
    let edges = graph.edges_of(&path)?;
    let kind = entity(&state, &path)?;
    let dependents: Vec<_> = graph.dependents_of(kind).collect();
    Ok(HttpResponse::Ok().json(json!({ "edges": edges, "dependents": dependents })))
}

async fn validate_record(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<FieldMap>,
) -> Result<HttpResponse, ApiError> {
    let kind = entity(&state, &path)?;
    let row = state.db.dry_run(kind, &body).map_err(WriteError::from)?;
    Ok(HttpResponse::Ok().json(row))
}

async fn create_record(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<FieldMap>,
) -> Result<HttpResponse, ApiError> {
    let kind = entity(&state, &path)?;
    let record = state.db.create(kind, &body)?;
    Ok(HttpResponse::Created().json(record))
}

async fn list_records(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let kind = entity(&state, &path)?;
    Ok(HttpResponse::Ok().json(state.db.list(kind)))
}

async fn get_record(
    state: web::Data<AppState>,
    path: web::Path<(String, u64)>,
) -> Result<HttpResponse, ApiError> {
    let (name, id) = path.into_inner();
    let kind = entity(&state, &name)?;
    Ok(HttpResponse::Ok().json(state.db.get(kind, RowId(id))?))
}

async fn update_record(
    state: web::Data<AppState>,
    path: web::Path<(String, u64)>,
    body: web::Json<UpdateRequest>,
) -> Result<HttpResponse, ApiError> {
    let (name, id) = path.into_inner();
    let kind = entity(&state, &name)?;
    let record = state.db.update(kind, RowId(id), body.version, &body.fields)?;
    Ok(HttpResponse::Ok().json(record))
}

async fn correct_record(
    state: web::Data<AppState>,
    path: web::Path<(String, u64)>,
    body: web::Json<CorrectionRequest>,
) -> Result<HttpResponse, ApiError> {
    let (name, id) = path.into_inner();
    let kind = entity(&state, &name)?;
    let body = body.into_inner();
    let correction = Correction {
        reason: body.reason,
        corrected_by: body.corrected_by,
    };
    let record = state.db.correct(kind, RowId(id), &body.fields, &correction)?;
    Ok(HttpResponse::Ok().json(record))
}

async fn enroll(
    state: web::Data<AppState>,
    body: web::Json<EnrollmentRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    let profile = match (body.student, body.faculty) {
        (Some(fields), None) => Profile::Student(fields),
        (None, Some(fields)) => Profile::Faculty(fields),
        _ => {
            return Err(ApiError::BadRequest(
                "an enrollment needs exactly one of 'student' or 'faculty'".to_string(),
            ))
        }
    };
    let enrollment = state.db.enroll(&body.account, &profile)?;
    Ok(HttpResponse::Created().json(enrollment))
}

async fn deactivate_account(
    state: web::Data<AppState>,
    path: web::Path<u64>,
) -> Result<HttpResponse, ApiError> {
    let record = state.db.deactivate(EntityKind::Account, RowId(path.into_inner()))?;
    Ok(HttpResponse::Ok().json(record))
}

async fn run_sweep(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let sweeper = Arc::clone(&state.sweeper);
    let report = web::block(move || sweeper.sweep_now()).await?;
    Ok(HttpResponse::Ok().json(report))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/schema", web::get().to(list_entities))
        .route("/schema/{entity}", web::get().to(describe_entity))
        .route("/schema/{entity}/edges", web::get().to(entity_edges))
        .route("/validate/{entity}", web::post().to(validate_record))
        .route("/records/{entity}", web::post().to(create_record))
        .route("/records/{entity}", web::get().to(list_records))
        .route("/records/{entity}/{id}", web::get().to(get_record))
        .route("/records/{entity}/{id}", web::patch().to(update_record))
        .route("/records/{entity}/{id}/corrections", web::post().to(correct_record))
        .route("/enrollments", web::post().to(enroll))
        .route("/accounts/{id}/deactivate", web::post().to(deactivate_account))
        .route("/sweep", web::post().to(run_sweep));
}
