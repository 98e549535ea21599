//! Simple REST API server example for the registration engine.
//!
//! Run with: `cargo run --example server`
//!
//! ## Endpoints
//!
//! - `POST /sections` - Create a class section
//! - `GET /sections` - List all sections
//! - `GET /sections/{id}` - Get a section by ID
//! - `POST /registrations` - Register a student into a section
//! - `POST /registrations/{id}/cancel` - Cancel a registration
//! - `POST /registrations/{id}/transfer` - Transfer to another section
//! - `POST /payments` - Initiate a tuition payment
//! - `POST /callbacks/{provider}` - Payment gateway webhook (IPN)
//!
//! ## Example Usage
//!
//! ```bash
//! # Create a section
//! curl -X POST http://localhost:3000/sections \
//!   -H "Content-Type: application/json" \
//!   -d '{"section_id": 101, "course_id": 1, "term_id": 20251, "max_capacity": 30, "schedule_code": null}'
//!
//! # Register
//! curl -X POST http://localhost:3000/registrations \
//!   -H "Content-Type: application/json" \
//!   -d '{"student": 1, "section": 101}'
//!
//! # Gateway callback (signature computed with the demo secret)
//! curl -X POST http://localhost:3000/callbacks/momo \
//!   -H "Content-Type: application/json" \
//!   -d '{"orderId": "ORD-1", "resultCode": "0", "signature": "..."}'
//! ```

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use registrar_rs::{
    CallbackAck, CallbackError, EnrollError, OrderId, ProviderProfile, Registrar, RegistrationId,
    SectionId, SectionSpec, StudentId, TermId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;

// === Request/Response DTOs ===

/// Request body for registering a student.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub student: u32,
    pub section: u32,
}

/// Request body for transferring a registration.
#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub section: u32,
}

/// Request body for initiating a payment.
#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    pub student: u32,
    pub term: u16,
    pub amount: Decimal,
    pub provider: String,
    pub order: String,
}

/// Response body for a created registration.
#[derive(Debug, Serialize)]
pub struct RegistrationResponse {
    pub registration: u64,
    pub conflict: bool,
}

/// Response body for errors.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// === Application State ===

/// Shared application state containing the registration engine.
#[derive(Clone)]
pub struct AppState {
    pub registrar: Arc<Registrar>,
}

// === Error Handling ===

/// Wrapper for converting `EnrollError` into HTTP responses.
pub struct AppError(EnrollError);

impl From<EnrollError> for AppError {
    fn from(err: EnrollError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            EnrollError::CapacityExceeded => (StatusCode::CONFLICT, "CAPACITY_EXCEEDED"),
            EnrollError::DuplicateRegistration => {
                (StatusCode::CONFLICT, "DUPLICATE_REGISTRATION")
            }
            EnrollError::LockTimeout => (StatusCode::SERVICE_UNAVAILABLE, "LOCK_TIMEOUT"),
            EnrollError::Cancelled => (StatusCode::REQUEST_TIMEOUT, "CANCELLED"),
            EnrollError::InvalidTransition { .. } => (StatusCode::CONFLICT, "INVALID_TRANSITION"),
            EnrollError::SectionNotFound => (StatusCode::NOT_FOUND, "SECTION_NOT_FOUND"),
            EnrollError::RegistrationNotFound => {
                (StatusCode::NOT_FOUND, "REGISTRATION_NOT_FOUND")
            }
            EnrollError::RegistrationNotActive => (StatusCode::CONFLICT, "REGISTRATION_NOT_ACTIVE"),
            EnrollError::InvalidCapacity => (StatusCode::BAD_REQUEST, "INVALID_CAPACITY"),
            EnrollError::DuplicateSection => (StatusCode::CONFLICT, "DUPLICATE_SECTION"),
            EnrollError::DuplicateOrder => (StatusCode::CONFLICT, "DUPLICATE_ORDER"),
            EnrollError::UnknownProvider(_) => (StatusCode::BAD_REQUEST, "UNKNOWN_PROVIDER"),
            EnrollError::SeatCountUnderflow => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

/// Wrapper for converting `CallbackError` into webhook rejections.
pub struct WebhookError(CallbackError);

impl From<CallbackError> for WebhookError {
    fn from(err: CallbackError) -> Self {
        WebhookError(err)
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        // Non-2xx tells the gateway to retry later.
        let (status, code) = match &self.0 {
            CallbackError::UnknownProvider(_) => (StatusCode::NOT_FOUND, "UNKNOWN_PROVIDER"),
            CallbackError::MalformedPayload(_) => (StatusCode::BAD_REQUEST, "MALFORMED_PAYLOAD"),
            CallbackError::SignatureMismatch => (StatusCode::UNAUTHORIZED, "SIGNATURE_MISMATCH"),
            CallbackError::UnknownTransaction(_) => (StatusCode::NOT_FOUND, "UNKNOWN_TRANSACTION"),
        };

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

// === Handlers ===

/// POST /sections - Create a section.
async fn create_section(
    State(state): State<AppState>,
    Json(spec): Json<SectionSpec>,
) -> Result<StatusCode, AppError> {
    state.registrar.add_section(spec)?;
    Ok(StatusCode::CREATED)
}

/// GET /sections - List all section rosters.
async fn list_sections(State(state): State<AppState>) -> Json<Vec<registrar_rs::SectionSnapshot>> {
    let sections: Vec<_> = state
        .registrar
        .sections()
        .map(|entry| entry.value().snapshot())
        .collect();
    Json(sections)
}

/// GET /sections/{id} - Get one section roster.
async fn get_section(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<Json<registrar_rs::SectionSnapshot>, AppError> {
    state
        .registrar
        .section(SectionId(id))
        .map(Json)
        .ok_or(AppError(EnrollError::SectionNotFound))
}

/// POST /registrations - Register a student.
async fn create_registration(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegistrationResponse>), AppError> {
    let id = state
        .registrar
        .register(StudentId(request.student), SectionId(request.section))?;
    let conflict = state
        .registrar
        .registration(id)
        .map(|snap| snap.conflict)
        .unwrap_or(false);
    Ok((
        StatusCode::CREATED,
        Json(RegistrationResponse {
            registration: id.0,
            conflict,
        }),
    ))
}

/// POST /registrations/{id}/cancel - Cancel a registration.
async fn cancel_registration(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<StatusCode, AppError> {
    state.registrar.cancel(RegistrationId(id))?;
    Ok(StatusCode::OK)
}

/// POST /registrations/{id}/transfer - Move to another section.
async fn transfer_registration(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<TransferRequest>,
) -> Result<StatusCode, AppError> {
    state
        .registrar
        .transfer(RegistrationId(id), SectionId(request.section))?;
    Ok(StatusCode::OK)
}

/// POST /payments - Initiate a tuition payment.
async fn create_payment(
    State(state): State<AppState>,
    Json(request): Json<PaymentRequest>,
) -> Result<StatusCode, AppError> {
    state.registrar.initiate_payment(
        StudentId(request.student),
        TermId(request.term),
        request.amount,
        &request.provider,
        OrderId(request.order),
    )?;
    Ok(StatusCode::CREATED)
}

/// POST /callbacks/{provider} - Gateway IPN webhook.
///
/// Replays of an already-finalized order are acknowledged with 200 so the
/// gateway stops retrying; everything else non-2xx invites a retry.
async fn gateway_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    body: String,
) -> Result<StatusCode, WebhookError> {
    match state.registrar.handle_callback(&provider, &body)? {
        CallbackAck::Finalized(_) | CallbackAck::Replayed(_) => Ok(StatusCode::OK),
    }
}

// === Router ===

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/sections", post(create_section).get(list_sections))
        .route("/sections/{id}", get(get_section))
        .route("/registrations", post(create_registration))
        .route("/registrations/{id}/cancel", post(cancel_registration))
        .route("/registrations/{id}/transfer", post(transfer_registration))
        .route("/payments", post(create_payment))
        .route("/callbacks/{provider}", post(gateway_callback))
        .with_state(state)
}

// === Main ===

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let registrar = Arc::new(Registrar::new());

    // Demo secrets; a real deployment loads these from configuration.
    registrar.gateways().register(ProviderProfile::momo("demo-momo-secret"));
    registrar.gateways().register(ProviderProfile::vnpay("demo-vnpay-secret"));
    registrar.gateways().register(ProviderProfile::zalopay("demo-zalopay-secret"));

    let state = AppState { registrar };
    let app = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:3000").await.unwrap();
    println!("Registrar API server running on http://127.0.0.1:3000");
    println!();
    println!("Endpoints:");
    println!("  POST /sections                     - Create a section");
    println!("  GET  /sections                     - List section rosters");
    println!("  POST /registrations                - Register a student");
    println!("  POST /registrations/:id/cancel     - Cancel a registration");
    println!("  POST /registrations/:id/transfer   - Transfer a registration");
    println!("  POST /payments                     - Initiate a payment");
    println!("  POST /callbacks/:provider          - Gateway webhook");

    axum::serve(listener, app).await.unwrap();
}
