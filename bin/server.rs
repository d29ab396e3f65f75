// Clearance Ledger - Web Server
// JSON API over the same Ledger the CLI uses

use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use chrono::NaiveDate;
use clearance_ledger::{
    logging, Activity, ActivityInput, ActivityRow, Class, Clearance, ClearancePreview, DuplicateGroup, Grade, Ledger,
    LedgerConfig, LedgerError, Punishment, PunishmentDeletion, PunishmentEdit, PunishmentFilter, PunishmentRow,
    PunishmentType, RecordedActivity, ServiceRecord, StatisticsFilter, StudentAggregate, StudentDeletion,
    StudentDetail, StudentIdentity, StudentStatistics,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

const ENV_ADDR: &str = "LEDGER_ADDR";
const DEFAULT_ADDR: &str = "0.0.0.0:3000";

/// Shared application state
#[derive(Clone)]
struct AppState {
    ledger: Arc<Mutex<Ledger>>,
}

impl AppState {
    fn ledger(&self) -> Result<MutexGuard<'_, Ledger>, ApiError> {
        self.ledger
            .lock()
            .map_err(|_| ApiError::Internal("ledger lock poisoned".to_string()))
    }
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<&'static str>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            kind: None,
        }
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::ok(data)))
}

// ============================================================================
// Errors
// ============================================================================

enum ApiError {
    Ledger(LedgerError),
    Internal(String),
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError::Ledger(err)
    }
}

fn status_for(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::NotFound { .. } => StatusCode::NOT_FOUND,
        LedgerError::AmbiguousMatch { .. }
        | LedgerError::AlreadyCleared(_)
        | LedgerError::InsufficientPoints { .. } => StatusCode::CONFLICT,
        LedgerError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        LedgerError::ReferenceDataUnavailable { .. } | LedgerError::Store(_) | LedgerError::Io(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match &self {
            ApiError::Ledger(err) => (status_for(err), err.kind(), err.to_string()),
            ApiError::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", message.clone()),
        };

        if status.is_server_error() {
            tracing::error!(%status, error = %message, "request failed");
        } else {
            tracing::debug!(%status, error = %message, "request rejected");
        }

        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(message),
            kind: Some(kind),
        };
        (status, Json(body)).into_response()
    }
}

// ============================================================================
// Request bodies
// ============================================================================

#[derive(Deserialize)]
struct IdentityBody {
    name: String,
    gender: String,
    grade_id: i64,
    class_id: i64,
}

impl IdentityBody {
    fn identity(&self) -> StudentIdentity {
        StudentIdentity::new(&self.name, &self.gender, self.grade_id, self.class_id)
    }
}

#[derive(Deserialize)]
struct NewTypeBody {
    name: String,
    required_points: i64,
    display_order: Option<i64>,
}

#[derive(Deserialize)]
struct PointsBody {
    required_points: i64,
}

#[derive(Deserialize)]
struct NewPunishmentBody {
    #[serde(flatten)]
    student: IdentityBody,
    type_id: i64,
    reason: String,
    date: NaiveDate,
}

#[derive(Deserialize)]
struct EditPunishmentBody {
    #[serde(flatten)]
    edit: PunishmentEdit,
    student: Option<IdentityBody>,
}

#[derive(Deserialize)]
struct NewActivityBody {
    #[serde(flatten)]
    student: IdentityBody,
    content: String,
    date: NaiveDate,
    duration: f64,
    points: i64,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

async fn list_grades(State(state): State<AppState>) -> ApiResult<Vec<Grade>> {
    let ledger = state.ledger()?;
    ok(ledger.list_grades()?)
}

async fn list_classes(State(state): State<AppState>) -> ApiResult<Vec<Class>> {
    let ledger = state.ledger()?;
    ok(ledger.list_classes()?)
}

async fn list_types(State(state): State<AppState>) -> ApiResult<Vec<PunishmentType>> {
    let ledger = state.ledger()?;
    ok(ledger.list_punishment_types()?)
}

/// POST /api/types
async fn create_type(State(state): State<AppState>, Json(body): Json<NewTypeBody>) -> ApiResult<PunishmentType> {
    let mut ledger = state.ledger()?;
    ok(ledger.create_punishment_type(&body.name, body.required_points, body.display_order)?)
}

/// PUT /api/types/:id/points
async fn set_type_points(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<PointsBody>,
) -> ApiResult<PunishmentType> {
    let mut ledger = state.ledger()?;
    ok(ledger.set_type_required_points(id, body.required_points)?)
}

/// GET /api/punishments?name=&grade_id=&class_id=
async fn search_punishments(
    State(state): State<AppState>,
    Query(filter): Query<PunishmentFilter>,
) -> ApiResult<Vec<PunishmentRow>> {
    let ledger = state.ledger()?;
    ok(ledger.search_punishments(&filter)?)
}

/// POST /api/punishments - resolve or create the student, then punish
async fn add_punishment(
    State(state): State<AppState>,
    Json(body): Json<NewPunishmentBody>,
) -> ApiResult<Punishment> {
    let mut ledger = state.ledger()?;
    ok(ledger.add_punishment(&body.student.identity(), body.type_id, &body.reason, body.date)?)
}

/// PUT /api/punishments/:id
async fn edit_punishment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<EditPunishmentBody>,
) -> ApiResult<Punishment> {
    let identity = body.student.as_ref().map(IdentityBody::identity);
    let mut ledger = state.ledger()?;
    ok(ledger.edit_punishment(id, &body.edit, identity.as_ref())?)
}

async fn delete_punishment(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<PunishmentDeletion> {
    let mut ledger = state.ledger()?;
    ok(ledger.delete_punishment(id)?)
}

/// POST /api/punishments/:id/clear
async fn clear_punishment(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Clearance> {
    let mut ledger = state.ledger()?;
    ok(ledger.check_and_clear(id)?)
}

async fn preview_clearance(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<ClearancePreview> {
    let ledger = state.ledger()?;
    ok(ledger.preview_clearance(id)?)
}

async fn list_activities(State(state): State<AppState>) -> ApiResult<Vec<ActivityRow>> {
    let ledger = state.ledger()?;
    ok(ledger.list_activities()?)
}

/// POST /api/activities - student must already exist
async fn record_activity(
    State(state): State<AppState>,
    Json(body): Json<NewActivityBody>,
) -> ApiResult<RecordedActivity> {
    let record = ServiceRecord {
        content: body.content,
        date: body.date,
        duration: body.duration,
        points: body.points,
    };
    let mut ledger = state.ledger()?;
    ok(ledger.record_activity(&body.student.identity(), &record)?)
}

async fn edit_activity(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<ActivityInput>,
) -> ApiResult<Activity> {
    let mut ledger = state.ledger()?;
    ok(ledger.edit_activity(id, &input)?)
}

async fn delete_activity(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<i64> {
    let mut ledger = state.ledger()?;
    ledger.delete_activity(id)?;
    ok(id)
}

async fn student_detail(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<StudentDetail> {
    let ledger = state.ledger()?;
    ok(ledger.student_detail(id)?)
}

async fn student_summary(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<StudentAggregate> {
    let ledger = state.ledger()?;
    ok(ledger.aggregate_for_student(id)?)
}

async fn delete_student(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<StudentDeletion> {
    let mut ledger = state.ledger()?;
    ok(ledger.delete_student(id)?)
}

/// GET /api/statistics?name=&grade_id=&class_id=&punishment_type=
async fn statistics(
    State(state): State<AppState>,
    Query(filter): Query<StatisticsFilter>,
) -> ApiResult<Vec<StudentStatistics>> {
    let ledger = state.ledger()?;
    ok(ledger.student_statistics(&filter)?)
}

async fn duplicates(State(state): State<AppState>) -> ApiResult<Vec<DuplicateGroup>> {
    let ledger = state.ledger()?;
    ok(ledger.duplicate_students()?)
}

fn app(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/grades", get(list_grades))
        .route("/classes", get(list_classes))
        .route("/types", get(list_types).post(create_type))
        .route("/types/:id/points", put(set_type_points))
        .route("/punishments", get(search_punishments).post(add_punishment))
        .route("/punishments/:id", put(edit_punishment).delete(delete_punishment))
        .route("/punishments/:id/clear", post(clear_punishment))
        .route("/punishments/:id/preview", get(preview_clearance))
        .route("/activities", get(list_activities).post(record_activity))
        .route("/activities/:id", put(edit_activity).delete(delete_activity))
        .route("/students/:id", get(student_detail).delete(delete_student))
        .route("/students/:id/summary", get(student_summary))
        .route("/statistics", get(statistics))
        .route("/duplicates", get(duplicates))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let config = LedgerConfig::load(config_path.as_deref())?;
    logging::init(&config.log_filter);

    let ledger = Ledger::open(&config)
        .with_context(|| format!("Failed to open ledger at {}", config.database_path.display()))?;

    let state = AppState {
        ledger: Arc::new(Mutex::new(ledger)),
    };

    let addr = std::env::var(ENV_ADDR).unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!(%addr, database = %config.database_path.display(), "ledger server listening");

    axum::serve(listener, app(state))
        .await
        .context("Server error")?;

    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
