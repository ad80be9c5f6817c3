use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use super::appointments::{BookingRequest, TransitionRequest};
use super::directory::{CenterRegistration, DonorRegistration};
use super::domain::{
    Actor, AppointmentId, CenterId, DonationId, DonationStatus, DonorId, Role, TestResults,
};
use super::donations::{DonationQuery, DonationRequest};
use super::error::EngineError;
use super::notify::NotificationGateway;
use super::repository::{AppointmentFilter, DonationFilter, LedgerStore, StockFilter};
use super::service::BloodBankService;
use super::stock::StockUpdate;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

const DEFAULT_SLOT_MINUTES: u32 = 30;

type SharedService<S, G> = Arc<BloodBankService<S, G>>;

/// HTTP surface over the engine. Identity is asserted by an upstream gateway through the
/// `x-actor-id` and `x-actor-role` headers.
pub fn ledger_router<S, G>(service: SharedService<S, G>) -> Router
where
    S: LedgerStore + 'static,
    G: NotificationGateway + 'static,
{
    Router::new()
        .route("/api/v1/donors", post(register_donor_handler::<S, G>))
        .route(
            "/api/v1/donors/:donor_id/eligibility",
            get(eligibility_handler::<S, G>),
        )
        .route("/api/v1/centers", post(register_center_handler::<S, G>))
        .route(
            "/api/v1/centers/:center_id/availability",
            get(availability_handler::<S, G>),
        )
        .route(
            "/api/v1/appointments",
            post(create_appointment_handler::<S, G>).get(list_appointments_handler::<S, G>),
        )
        .route(
            "/api/v1/appointments/:appointment_id",
            patch(transition_handler::<S, G>),
        )
        .route(
            "/api/v1/donations",
            post(record_donation_handler::<S, G>).get(list_donations_handler::<S, G>),
        )
        .route(
            "/api/v1/donations/:donation_id/validate",
            post(validate_donation_handler::<S, G>),
        )
        .route("/api/v1/stock", get(stock_levels_handler::<S, G>))
        .route("/api/v1/stock/alerts", get(stock_alerts_handler::<S, G>))
        .route("/api/v1/stock/:center_id", put(update_stock_handler::<S, G>))
        .route("/api/v1/stats/dashboard", get(dashboard_handler::<S, G>))
        .with_state(service)
}

/// Actor asserted by the upstream gateway.
pub(crate) fn actor_from(headers: &HeaderMap) -> Result<Actor, Response> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    let (Some(id), Some(role)) = (header(ACTOR_ID_HEADER), header(ACTOR_ROLE_HEADER)) else {
        return Err(unauthorized("missing actor headers"));
    };
    let role = role
        .parse::<Role>()
        .map_err(|role| unauthorized(&format!("unknown role '{role}'")))?;
    Ok(Actor::new(id, role))
}

fn unauthorized(detail: &str) -> Response {
    let payload = json!({
        "error": "UNAUTHENTICATED",
        "detail": detail,
    });
    (StatusCode::UNAUTHORIZED, Json(payload)).into_response()
}

fn forbidden(actor: &Actor, action: &'static str) -> EngineError {
    EngineError::Forbidden {
        actor: actor.id.clone(),
        action,
    }
}

/// Donor to restrict a listing to. Donor actors are pinned to their own id; staff see
/// whatever they asked for.
fn donor_scope(actor: &Actor, requested: Option<DonorId>) -> Result<Option<DonorId>, EngineError> {
    if actor.role.is_staff() {
        return Ok(requested);
    }
    match requested {
        Some(donor) if actor.may_act_for(donor) => Ok(Some(donor)),
        Some(_) => Err(forbidden(actor, "read another donor's records")),
        None => actor
            .id
            .parse::<DonorId>()
            .map(Some)
            .map_err(|_| forbidden(actor, "read donor records")),
    }
}

fn respond<T: Serialize>(status: StatusCode, result: Result<T, EngineError>) -> Response {
    match result {
        Ok(value) => (status, Json(value)).into_response(),
        Err(error) => {
            if matches!(error, EngineError::TransactionFailed(_)) {
                warn!(%error, "request failed in storage");
            }
            error.into_response()
        }
    }
}

pub(crate) async fn register_donor_handler<S, G>(
    State(service): State<SharedService<S, G>>,
    headers: HeaderMap,
    Json(registration): Json<DonorRegistration>,
) -> Response
where
    S: LedgerStore + 'static,
    G: NotificationGateway + 'static,
{
    let actor = match actor_from(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::CREATED,
        service.register_donor(registration, &actor),
    )
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct EligibilityParams {
    at: Option<DateTime<Utc>>,
}

pub(crate) async fn eligibility_handler<S, G>(
    State(service): State<SharedService<S, G>>,
    headers: HeaderMap,
    Path(donor_id): Path<DonorId>,
    Query(params): Query<EligibilityParams>,
) -> Response
where
    S: LedgerStore + 'static,
    G: NotificationGateway + 'static,
{
    let actor = match actor_from(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        service.eligibility(donor_id, params.at, &actor),
    )
}

pub(crate) async fn register_center_handler<S, G>(
    State(service): State<SharedService<S, G>>,
    headers: HeaderMap,
    Json(registration): Json<CenterRegistration>,
) -> Response
where
    S: LedgerStore + 'static,
    G: NotificationGateway + 'static,
{
    let actor = match actor_from(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::CREATED,
        service.register_center(registration, &actor),
    )
}

#[derive(Debug, Deserialize)]
pub(crate) struct AvailabilityParams {
    date: NaiveDate,
    duration: Option<u32>,
}

pub(crate) async fn availability_handler<S, G>(
    State(service): State<SharedService<S, G>>,
    headers: HeaderMap,
    Path(center_id): Path<CenterId>,
    Query(params): Query<AvailabilityParams>,
) -> Response
where
    S: LedgerStore + 'static,
    G: NotificationGateway + 'static,
{
    if let Err(response) = actor_from(&headers) {
        return response;
    }
    let duration = params.duration.unwrap_or(DEFAULT_SLOT_MINUTES);
    let result = service
        .available_slots(center_id, params.date, duration)
        .map(|slots| {
            json!({
                "center_id": center_id,
                "date": params.date,
                "duration_minutes": duration,
                "slots": slots,
            })
        });
    respond(StatusCode::OK, result)
}

pub(crate) async fn create_appointment_handler<S, G>(
    State(service): State<SharedService<S, G>>,
    headers: HeaderMap,
    Json(request): Json<BookingRequest>,
) -> Response
where
    S: LedgerStore + 'static,
    G: NotificationGateway + 'static,
{
    let actor = match actor_from(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::CREATED,
        service.create_appointment(request, &actor),
    )
}

pub(crate) async fn list_appointments_handler<S, G>(
    State(service): State<SharedService<S, G>>,
    headers: HeaderMap,
    Query(filter): Query<AppointmentFilter>,
) -> Response
where
    S: LedgerStore + 'static,
    G: NotificationGateway + 'static,
{
    let actor = match actor_from(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    let result = donor_scope(&actor, filter.donor).and_then(|donor| {
        service.appointments(&AppointmentFilter { donor, ..filter })
    });
    respond(StatusCode::OK, result)
}

pub(crate) async fn transition_handler<S, G>(
    State(service): State<SharedService<S, G>>,
    headers: HeaderMap,
    Path(appointment_id): Path<AppointmentId>,
    Json(request): Json<TransitionRequest>,
) -> Response
where
    S: LedgerStore + 'static,
    G: NotificationGateway + 'static,
{
    let actor = match actor_from(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        service.transition_appointment(appointment_id, request, &actor),
    )
}

pub(crate) async fn record_donation_handler<S, G>(
    State(service): State<SharedService<S, G>>,
    headers: HeaderMap,
    Json(request): Json<DonationRequest>,
) -> Response
where
    S: LedgerStore + 'static,
    G: NotificationGateway + 'static,
{
    let actor = match actor_from(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::CREATED,
        service.record_donation(request, &actor),
    )
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct DonationParams {
    center: Option<CenterId>,
    donor: Option<DonorId>,
    status: Option<DonationStatus>,
    page: Option<usize>,
    limit: Option<usize>,
}

pub(crate) async fn list_donations_handler<S, G>(
    State(service): State<SharedService<S, G>>,
    headers: HeaderMap,
    Query(params): Query<DonationParams>,
) -> Response
where
    S: LedgerStore + 'static,
    G: NotificationGateway + 'static,
{
    let actor = match actor_from(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    let result = donor_scope(&actor, params.donor).and_then(|donor| {
        service.donations(&DonationQuery {
            filter: DonationFilter {
                center: params.center,
                donor,
                status: params.status,
            },
            page: params.page,
            limit: params.limit,
        })
    });
    respond(StatusCode::OK, result)
}

pub(crate) async fn validate_donation_handler<S, G>(
    State(service): State<SharedService<S, G>>,
    headers: HeaderMap,
    Path(donation_id): Path<DonationId>,
    Json(results): Json<TestResults>,
) -> Response
where
    S: LedgerStore + 'static,
    G: NotificationGateway + 'static,
{
    let actor = match actor_from(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        service.validate_donation(donation_id, results, &actor),
    )
}

pub(crate) async fn stock_levels_handler<S, G>(
    State(service): State<SharedService<S, G>>,
    headers: HeaderMap,
    Query(filter): Query<StockFilter>,
) -> Response
where
    S: LedgerStore + 'static,
    G: NotificationGateway + 'static,
{
    if let Err(response) = actor_from(&headers) {
        return response;
    }
    respond(StatusCode::OK, service.stock_levels(&filter))
}

pub(crate) async fn stock_alerts_handler<S, G>(
    State(service): State<SharedService<S, G>>,
    headers: HeaderMap,
) -> Response
where
    S: LedgerStore + 'static,
    G: NotificationGateway + 'static,
{
    let actor = match actor_from(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    if !actor.role.can_manage_stock() {
        return forbidden(&actor, "view stock alerts").into_response();
    }
    respond(StatusCode::OK, service.critical_stock())
}

pub(crate) async fn update_stock_handler<S, G>(
    State(service): State<SharedService<S, G>>,
    headers: HeaderMap,
    Path(center_id): Path<CenterId>,
    Json(update): Json<StockUpdate>,
) -> Response
where
    S: LedgerStore + 'static,
    G: NotificationGateway + 'static,
{
    let actor = match actor_from(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };

    respond(
        StatusCode::OK,
        service.update_stock(center_id, update, &actor),
    )
}

pub(crate) async fn dashboard_handler<S, G>(
    State(service): State<SharedService<S, G>>,
    headers: HeaderMap,
) -> Response
where
    S: LedgerStore + 'static,
    G: NotificationGateway + 'static,
{
    let actor = match actor_from(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    if !actor.role.is_staff() {
        return forbidden(&actor, "view the dashboard").into_response();
    }
    respond(StatusCode::OK, service.dashboard())
}
