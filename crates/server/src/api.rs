//! JSON entity API over [`AppServices`].
//!
//! Every request carries a correlation id (`x-correlation-id`, generated when
//! absent) that is echoed on the response and threaded into audit events.
//! The caller identity arrives as opaque `x-principal-*` headers.

use std::convert::Infallible;

use axum::extract::{FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use tradein_core::audit::AuditContext;
use tradein_core::domain::bulk_quote::{BulkQuoteId, BulkQuoteStatus, BusinessContact};
use tradein_core::domain::commission::LedgerEntryId;
use tradein_core::domain::device::{CategoryId, DeviceId};
use tradein_core::domain::grade::Grade;
use tradein_core::domain::order::{OrderId, OrderStatus};
use tradein_core::domain::partner::PartnerId;
use tradein_core::domain::price_list::PriceListId;
use tradein_core::domain::principal::Principal;
use tradein_core::domain::quote::{QuoteId, QuoteStatus};
use tradein_core::errors::{ApplicationError, InterfaceError};
use tradein_core::estimate::ManifestRow;
use tradein_core::flows::TransitionPayload;
use tradein_db::services::{AdjustmentRequest, EstimateSubmission, PriceListImport, QuoteRequest};
use tradein_db::AppServices;

pub const CORRELATION_HEADER: &str = "x-correlation-id";
const PRINCIPAL_ID_HEADER: &str = "x-principal-id";
const PRINCIPAL_EMAIL_HEADER: &str = "x-principal-email";
const PARTNER_HEADER: &str = "x-partner-id";
const ADMIN_HEADER: &str = "x-principal-admin";

#[derive(Clone)]
pub struct ApiState {
    services: AppServices,
}

pub fn router(services: AppServices) -> Router {
    Router::new()
        .route("/estimates", post(submit_estimate))
        .route("/estimates/{id}", get(get_estimate))
        .route("/quotes", post(create_quote))
        .route("/quotes/{id}/status", post(transition_quote))
        .route("/bulk-quotes/{id}/status", post(transition_bulk_quote))
        .route("/bulk-quotes/{id}/lines/{line_no}/correction", post(correct_line))
        .route("/bulk-quotes/{id}/lines/{line_no}/inspection", post(record_inspection))
        .route("/orders/{id}/status", post(transition_order))
        .route("/price-lists", post(import_price_list))
        .route("/price-lists/{id}/adjust", post(adjust_price_list))
        .route("/price-lists/{id}/activate", post(activate_price_list))
        .route("/aliases", post(record_alias).delete(delete_alias))
        .route("/partners/{id}/balance", get(partner_balance))
        .route("/partners/{id}/ledger", get(partner_ledger))
        .route("/partners/{id}/payouts", get(list_payouts).post(settle_payout))
        .with_state(ApiState { services })
}

/// Per-request caller identity and correlation id.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub principal: Principal,
    pub correlation_id: String,
}

impl RequestContext {
    fn audit(&self) -> AuditContext {
        self.principal.audit_context(self.correlation_id.clone())
    }

    fn fail(&self) -> impl Fn(ApplicationError) -> ApiError + '_ {
        move |error| ApiError(error.into_interface(self.correlation_id.clone()))
    }

    fn respond<T: Serialize>(&self, status: StatusCode, body: T) -> Response {
        let mut response = (status, Json(body)).into_response();
        attach_correlation(response.headers_mut(), &self.correlation_id);
        response
    }
}

impl<S: Send + Sync> FromRequestParts<S> for RequestContext {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        let correlation_id =
            header(CORRELATION_HEADER).unwrap_or_else(|| format!("req-{}", Uuid::new_v4()));
        let principal = match header(PRINCIPAL_ID_HEADER) {
            Some(id) => Principal {
                email: header(PRINCIPAL_EMAIL_HEADER).unwrap_or_else(|| id.clone()),
                id,
                partner_id: header(PARTNER_HEADER).map(PartnerId),
                modes: Default::default(),
                admin: header(ADMIN_HEADER).is_some_and(|value| value.eq_ignore_ascii_case("true")),
            },
            None => Principal {
                id: "anonymous".to_string(),
                email: "anonymous".to_string(),
                partner_id: None,
                modes: Default::default(),
                admin: false,
            },
        };
        Ok(Self { principal, correlation_id })
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'static str,
    message: &'a str,
    user_message: &'static str,
    correlation_id: &'a str,
}

#[derive(Debug)]
pub struct ApiError(pub InterfaceError);

impl ApiError {
    fn class(&self) -> &'static str {
        match self.0 {
            InterfaceError::BadRequest { .. } => "bad_request",
            InterfaceError::Forbidden { .. } => "forbidden",
            InterfaceError::NotFound { .. } => "not_found",
            InterfaceError::Conflict { .. } => "conflict",
            InterfaceError::ServiceUnavailable { .. } => "service_unavailable",
            InterfaceError::Internal { .. } => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!(
                event_name = "api.request_failed",
                correlation_id = %self.0.correlation_id(),
                status = status.as_u16(),
                error = %self.0,
                "request failed"
            );
        }
        let body = ErrorBody {
            error: self.class(),
            message: self.0.message(),
            user_message: self.0.user_message(),
            correlation_id: self.0.correlation_id(),
        };
        let mut response = (status, Json(body)).into_response();
        attach_correlation(response.headers_mut(), self.0.correlation_id());
        response
    }
}

fn attach_correlation(headers: &mut HeaderMap, correlation_id: &str) {
    if let Ok(value) = HeaderValue::from_str(correlation_id) {
        headers.insert(HeaderName::from_static(CORRELATION_HEADER), value);
    }
}

type ApiResult = Result<Response, ApiError>;

#[derive(Debug, Deserialize)]
pub struct EstimateRequest {
    pub contact: BusinessContact,
    pub category: String,
    #[serde(default)]
    pub assumed_grade: Option<Grade>,
    /// Raw CSV manifest text.
    #[serde(default)]
    pub manifest: Option<String>,
    /// Manifest rows already split into fields.
    #[serde(default)]
    pub rows: Option<Vec<Vec<String>>>,
    #[serde(default)]
    pub referral_code: Option<String>,
}

async fn submit_estimate(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Json(request): Json<EstimateRequest>,
) -> ApiResult {
    let rows = match (request.manifest.as_deref(), request.rows) {
        (_, Some(rows)) => rows.into_iter().map(ManifestRow::new).collect(),
        (Some(manifest), None) => split_manifest(manifest).map_err(ctx.fail())?,
        (None, None) => {
            return Err(ctx.fail()(ApplicationError::validation(
                "manifest",
                "either `manifest` or `rows` is required",
            )))
        }
    };
    let submission = EstimateSubmission {
        contact: request.contact,
        category: CategoryId(request.category),
        assumed_grade: request.assumed_grade.unwrap_or(Grade::A),
        rows,
        referral_code: request.referral_code,
    };
    let detail = state
        .services
        .estimates
        .submit(submission, &ctx.principal, &ctx.correlation_id)
        .await
        .map_err(ctx.fail())?;
    Ok(ctx.respond(StatusCode::CREATED, detail))
}

fn split_manifest(manifest: &str) -> Result<Vec<ManifestRow>, ApplicationError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(manifest.as_bytes());
    reader
        .records()
        .enumerate()
        .map(|(index, record)| {
            record.map(|record| ManifestRow::new(record.iter())).map_err(|error| {
                ApplicationError::validation(format!("line {}", index + 1), error.to_string())
            })
        })
        .collect()
}

async fn get_estimate(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> ApiResult {
    let detail = state.services.estimates.get(&BulkQuoteId(id)).await.map_err(ctx.fail())?;
    Ok(ctx.respond(StatusCode::OK, detail))
}

async fn create_quote(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Json(request): Json<QuoteRequest>,
) -> ApiResult {
    let quote = state
        .services
        .estimates
        .quote_device(request, &ctx.principal, &ctx.correlation_id)
        .await
        .map_err(ctx.fail())?;
    Ok(ctx.respond(StatusCode::CREATED, quote))
}

#[derive(Debug, Deserialize)]
pub struct StatusChange<S> {
    pub status: S,
    #[serde(flatten)]
    pub payload: TransitionPayload,
}

async fn transition_quote(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Path(id): Path<String>,
    Json(change): Json<StatusChange<QuoteStatus>>,
) -> ApiResult {
    let report = state
        .services
        .lifecycle
        .transition_quote(&QuoteId(id), change.status, &change.payload, &ctx.audit())
        .await
        .map_err(ctx.fail())?;
    Ok(ctx.respond(StatusCode::OK, report))
}

async fn transition_bulk_quote(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Path(id): Path<String>,
    Json(change): Json<StatusChange<BulkQuoteStatus>>,
) -> ApiResult {
    let report = state
        .services
        .lifecycle
        .transition_bulk_quote(&BulkQuoteId(id), change.status, &change.payload, &ctx.audit())
        .await
        .map_err(ctx.fail())?;
    Ok(ctx.respond(StatusCode::OK, report))
}

async fn transition_order(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Path(id): Path<String>,
    Json(change): Json<StatusChange<OrderStatus>>,
) -> ApiResult {
    let report = state
        .services
        .lifecycle
        .transition_order(&OrderId(id), change.status, &change.payload, &ctx.audit())
        .await
        .map_err(ctx.fail())?;
    Ok(ctx.respond(StatusCode::OK, report))
}

#[derive(Debug, Deserialize)]
pub struct LineCorrection {
    pub device_id: DeviceId,
}

async fn correct_line(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Path((id, line_no)): Path<(String, u32)>,
    Json(correction): Json<LineCorrection>,
) -> ApiResult {
    let detail = state
        .services
        .aliases
        .correct_line(
            &BulkQuoteId(id),
            line_no,
            correction.device_id,
            &ctx.principal,
            &ctx.correlation_id,
        )
        .await
        .map_err(ctx.fail())?;
    Ok(ctx.respond(StatusCode::OK, detail))
}

#[derive(Debug, Deserialize)]
pub struct LineInspection {
    pub grade: Grade,
    #[serde(default)]
    pub price: Option<Decimal>,
}

async fn record_inspection(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Path((id, line_no)): Path<(String, u32)>,
    Json(inspection): Json<LineInspection>,
) -> ApiResult {
    let detail = state
        .services
        .estimates
        .record_inspection(&BulkQuoteId(id), line_no, inspection.grade, inspection.price, &ctx.audit())
        .await
        .map_err(ctx.fail())?;
    Ok(ctx.respond(StatusCode::OK, detail))
}

async fn import_price_list(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Json(import): Json<PriceListImport>,
) -> ApiResult {
    require_admin(&ctx, "price list import")?;
    let report = state.services.pricing.import(import, &ctx.audit()).await.map_err(ctx.fail())?;
    Ok(ctx.respond(StatusCode::CREATED, report))
}

async fn adjust_price_list(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Path(id): Path<String>,
    Json(request): Json<AdjustmentRequest>,
) -> ApiResult {
    require_admin(&ctx, "price list adjustment")?;
    let report = state
        .services
        .pricing
        .adjust(&PriceListId(id), request, &ctx.audit())
        .await
        .map_err(ctx.fail())?;
    Ok(ctx.respond(StatusCode::OK, report))
}

async fn activate_price_list(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> ApiResult {
    require_admin(&ctx, "price list activation")?;
    let category = state
        .services
        .pricing
        .activate(&PriceListId(id), &ctx.audit())
        .await
        .map_err(ctx.fail())?;
    Ok(ctx.respond(StatusCode::OK, category))
}

#[derive(Debug, Deserialize)]
pub struct AliasRequest {
    pub raw_text: String,
    pub device_id: DeviceId,
}

#[derive(Debug, Deserialize)]
pub struct AliasDeletion {
    pub raw_text: String,
}

#[derive(Debug, Serialize)]
struct Deleted {
    deleted: u64,
}

async fn record_alias(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Json(request): Json<AliasRequest>,
) -> ApiResult {
    let alias = state
        .services
        .aliases
        .record_alias(&request.raw_text, request.device_id, &ctx.principal, &ctx.correlation_id)
        .await
        .map_err(ctx.fail())?;
    Ok(ctx.respond(StatusCode::CREATED, alias))
}

async fn delete_alias(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Json(request): Json<AliasDeletion>,
) -> ApiResult {
    let deleted = state
        .services
        .aliases
        .delete_alias(&request.raw_text, &ctx.principal, &ctx.correlation_id)
        .await
        .map_err(ctx.fail())?;
    Ok(ctx.respond(StatusCode::OK, Deleted { deleted }))
}

async fn partner_balance(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> ApiResult {
    let balance = state.services.commissions.balance(&PartnerId(id)).await.map_err(ctx.fail())?;
    Ok(ctx.respond(StatusCode::OK, balance))
}

async fn partner_ledger(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> ApiResult {
    let entries = state.services.commissions.entries(&PartnerId(id)).await.map_err(ctx.fail())?;
    Ok(ctx.respond(StatusCode::OK, entries))
}

async fn list_payouts(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> ApiResult {
    let payouts = state.services.commissions.payouts(&PartnerId(id)).await.map_err(ctx.fail())?;
    Ok(ctx.respond(StatusCode::OK, payouts))
}

#[derive(Debug, Deserialize)]
pub struct PayoutRequest {
    pub entry_ids: Vec<LedgerEntryId>,
    pub reference: String,
}

async fn settle_payout(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Path(id): Path<String>,
    Json(request): Json<PayoutRequest>,
) -> ApiResult {
    require_admin(&ctx, "payout settlement")?;
    let payout = state
        .services
        .commissions
        .settle(&PartnerId(id), &request.entry_ids, &request.reference, &ctx.audit())
        .await
        .map_err(ctx.fail())?;
    Ok(ctx.respond(StatusCode::CREATED, payout))
}

/// Price-list writes and payouts are operator actions.
fn require_admin(ctx: &RequestContext, action: &str) -> Result<(), ApiError> {
    if ctx.principal.admin {
        return Ok(());
    }
    Err(ctx.fail()(ApplicationError::forbidden(action)))
}
