//! API routes for deskd

use crate::error::{ApiError, ApiResult};
use crate::identity::Caller;
use crate::server::AppState;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use desk_common::{
    Admission, Clock, CompanyBinding, CompanyDetails, GrantId, Month, QuotaStatus,
    ServiceRequestReceipt, SupportPlan, Ticket, TicketCounts, TicketDraft, ADMIN_GRANTOR,
    VERSION,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

type AppStateArc = Arc<AppState>;

// ============================================================================
// Health & Metrics
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

pub fn health_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/v1/health", get(health))
        .route("/metrics", get(metrics))
}

async fn health(State(state): State<AppStateArc>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: VERSION.to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

async fn metrics(State(state): State<AppStateArc>) -> ApiResult<impl IntoResponse> {
    let body = state
        .metrics
        .export()
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}

// ============================================================================
// Catalog Routes
// ============================================================================

pub fn catalog_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/v1/plans", get(list_plans).post(upsert_plan))
        .route("/v1/companies", get(list_companies).post(register_company))
        .route("/v1/companies/:company", get(company_details))
}

async fn list_plans(State(state): State<AppStateArc>) -> ApiResult<Json<Vec<SupportPlan>>> {
    Ok(Json(state.engine.list_plans().await?))
}

async fn upsert_plan(
    State(state): State<AppStateArc>,
    Json(plan): Json<SupportPlan>,
) -> ApiResult<Json<SupportPlan>> {
    state.engine.upsert_plan(plan.clone()).await?;
    Ok(Json(plan))
}

async fn list_companies(
    State(state): State<AppStateArc>,
) -> ApiResult<Json<Vec<CompanyBinding>>> {
    Ok(Json(state.engine.list_companies().await?))
}

async fn register_company(
    State(state): State<AppStateArc>,
    Json(binding): Json<CompanyBinding>,
) -> ApiResult<(StatusCode, Json<CompanyBinding>)> {
    state.engine.register_company(binding.clone()).await?;
    Ok((StatusCode::CREATED, Json(binding)))
}

async fn company_details(
    State(state): State<AppStateArc>,
    Path(company): Path<String>,
) -> ApiResult<Json<CompanyDetails>> {
    Ok(Json(state.engine.company_details(&company).await?))
}

// ============================================================================
// Quota Routes
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct AdmissionRequest {
    pub company: String,
    /// Defaults to the current month
    #[serde(default)]
    pub month: Option<Month>,
    #[serde(default, rename = "override")]
    pub override_requested: bool,
}

pub fn quota_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/v1/quota", get(own_quota))
        .route("/v1/quota/:company", get(company_quota_current))
        .route("/v1/quota/:company/:month", get(company_quota))
        .route("/v1/quota/admission", post(request_admission))
}

async fn own_quota(
    State(state): State<AppStateArc>,
    Caller(caller): Caller,
) -> ApiResult<Json<QuotaStatus>> {
    Ok(Json(state.engine.current_status(&caller.company).await?))
}

async fn company_quota_current(
    State(state): State<AppStateArc>,
    Path(company): Path<String>,
) -> ApiResult<Json<QuotaStatus>> {
    Ok(Json(state.engine.current_status(&company).await?))
}

async fn company_quota(
    State(state): State<AppStateArc>,
    Path((company, month)): Path<(String, String)>,
) -> ApiResult<Json<QuotaStatus>> {
    let month: Month = month.parse()?;
    Ok(Json(state.engine.quota_status(&company, month).await?))
}

async fn request_admission(
    State(state): State<AppStateArc>,
    Json(req): Json<AdmissionRequest>,
) -> ApiResult<Json<Admission>> {
    let month = req
        .month
        .unwrap_or_else(|| state.engine.clock().current_month());
    let admission = state
        .engine
        .request_admission(&req.company, month, req.override_requested)
        .await?;
    Ok(Json(admission))
}

// ============================================================================
// Bundle Routes
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct AddBundleRequest {
    pub company: String,
    pub month: Month,
    pub tickets: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub tickets: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BundleResponse {
    pub id: GrantId,
    pub company: String,
    pub month: Month,
    pub tickets: u32,
    pub added_by: String,
}

pub fn bundle_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/v1/bundles", post(add_bundle))
        .route("/v1/bundles/purchase", post(purchase_bundle))
}

async fn add_bundle(
    State(state): State<AppStateArc>,
    Json(req): Json<AddBundleRequest>,
) -> ApiResult<(StatusCode, Json<BundleResponse>)> {
    let id = state
        .engine
        .add_manual_bundle(&req.company, req.month, req.tickets, ADMIN_GRANTOR)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(BundleResponse {
            id,
            company: req.company,
            month: req.month,
            tickets: req.tickets,
            added_by: ADMIN_GRANTOR.to_string(),
        }),
    ))
}

async fn purchase_bundle(
    State(state): State<AppStateArc>,
    Caller(caller): Caller,
    Json(req): Json<PurchaseRequest>,
) -> ApiResult<(StatusCode, Json<BundleResponse>)> {
    let month = state.engine.clock().current_month();
    let id = state.engine.purchase_bundle(&caller, req.tickets).await?;
    info!(
        "  {} bought {} SR tickets for {}",
        caller.user, req.tickets, caller.company
    );
    Ok((
        StatusCode::CREATED,
        Json(BundleResponse {
            id,
            company: caller.company,
            month,
            tickets: req.tickets,
            added_by: caller.user,
        }),
    ))
}

// ============================================================================
// Ticket Routes
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateServiceRequest {
    #[serde(flatten)]
    pub draft: TicketDraft,
    #[serde(default, rename = "override")]
    pub override_requested: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AssignRequest {
    pub engineer: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CloseRequest {
    pub comment: String,
}

pub fn ticket_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/v1/tickets/sr", post(create_service_request))
        .route("/v1/tickets/ft", post(create_fault_ticket))
        .route("/v1/tickets/counts", get(ticket_counts))
        .route("/v1/tickets/:id/assign", post(assign_ticket))
        .route("/v1/tickets/:id/close", post(close_ticket))
}

async fn create_service_request(
    State(state): State<AppStateArc>,
    Caller(caller): Caller,
    Json(req): Json<CreateServiceRequest>,
) -> ApiResult<(StatusCode, Json<ServiceRequestReceipt>)> {
    match state
        .engine
        .create_service_request(&caller, req.draft, req.override_requested)
        .await
    {
        Ok(receipt) => {
            state.metrics.record_admission(&Admission::Allow {
                consumes_grace: receipt.consumed_grace,
            });
            Ok((StatusCode::CREATED, Json(receipt)))
        }
        Err(e) => {
            state.metrics.record_admission_error(&e);
            Err(e.into())
        }
    }
}

async fn create_fault_ticket(
    State(state): State<AppStateArc>,
    Caller(caller): Caller,
    Json(draft): Json<TicketDraft>,
) -> ApiResult<(StatusCode, Json<Ticket>)> {
    let ticket = state.engine.create_fault_ticket(&caller, draft).await?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

async fn ticket_counts(
    State(state): State<AppStateArc>,
    Caller(caller): Caller,
) -> ApiResult<Json<TicketCounts>> {
    Ok(Json(state.engine.ticket_counts(&caller.company).await?))
}

async fn assign_ticket(
    State(state): State<AppStateArc>,
    Path(id): Path<i64>,
    Json(req): Json<AssignRequest>,
) -> ApiResult<Json<Ticket>> {
    if req.engineer.trim().is_empty() {
        return Err(ApiError::BadRequest("engineer is required".into()));
    }
    Ok(Json(state.engine.assign_ticket(id, &req.engineer).await?))
}

async fn close_ticket(
    State(state): State<AppStateArc>,
    Path(id): Path<i64>,
    Json(req): Json<CloseRequest>,
) -> ApiResult<Json<Ticket>> {
    Ok(Json(state.engine.close_ticket(id, &req.comment).await?))
}
