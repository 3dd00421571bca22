//! Simple REST API server example for the marketplace engine.
//!
//! Run with: `cargo run --example server`
//!
//! ## Endpoints
//!
//! - `POST /users` - Register a user
//! - `POST /notes` - Publish a note for sale
//! - `POST /purchase` - Settle a note purchase
//! - `POST /withdrawals` - Open a withdrawal request
//! - `POST /withdrawals/:id/review` - Accept or reject a pending withdrawal
//! - `POST /withdrawals/:id/completed` - Complete an accepted withdrawal
//! - `GET /users/:id` - Get a user's balance
//! - `GET /users/:id/notifications` - Get a user's inbox
//! - `GET /sales` - List all settled sales
//!
//! ## Example Usage
//!
//! ```bash
//! # Register seller and buyer
//! curl -X POST http://localhost:3000/users \
//!   -H "Content-Type: application/json" -d '{"name": "alice"}'
//! curl -X POST http://localhost:3000/users \
//!   -H "Content-Type: application/json" -d '{"name": "bob"}'
//!
//! # Publish and buy a note
//! curl -X POST http://localhost:3000/notes \
//!   -H "Content-Type: application/json" \
//!   -d '{"owner_id": 1, "title": "Linear Algebra II", "price": "100.00", "cover_path": "covers/la2.png", "file_path": "files/la2.pdf"}'
//! curl -X POST http://localhost:3000/purchase \
//!   -H "Content-Type: application/json" \
//!   -d '{"note_id": 1, "buyer_id": 2, "invoice_id": "inv-001"}'
//!
//! # Pay out the seller
//! curl -X POST http://localhost:3000/withdrawals \
//!   -H "Content-Type: application/json" -d '{"user_id": 1, "amount": "50.00"}'
//! curl -X POST http://localhost:3000/withdrawals/1/review \
//!   -H "Content-Type: application/json" -d '{"decision": "accept"}'
//! curl -X POST http://localhost:3000/withdrawals/1/completed \
//!   -H "Content-Type: application/json" -d '{"routing_number": "DE02-1234"}'
//! ```

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use notemarket_rs::{
    MarketEngine, MarketError, NoteId, Notification, Sale, UserId, WithdrawalDecision,
    WithdrawalId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;

// === Request/Response DTOs ===

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub owner_id: u32,
    pub title: String,
    pub price: Decimal,
    pub cover_path: String,
    pub file_path: String,
}

#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    pub note_id: u32,
    pub buyer_id: u32,
    pub invoice_id: String,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawalRequest {
    pub user_id: u32,
    pub amount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub decision: WithdrawalDecision,
}

#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub routing_number: String,
}

#[derive(Debug, Serialize)]
pub struct CreatedResponse {
    pub id: u32,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub user: u32,
    pub name: String,
    pub balance: Decimal,
    pub purchases: usize,
    pub unread: usize,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub balance: Decimal,
}

/// Response body for errors.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// === Application State ===

/// Shared application state containing the marketplace engine.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<MarketEngine>,
}

// === Error Handling ===

/// Wrapper for converting `MarketError` into HTTP responses.
pub struct AppError(MarketError);

impl From<MarketError> for AppError {
    fn from(err: MarketError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            MarketError::UserNotFound => (StatusCode::NOT_FOUND, "USER_NOT_FOUND"),
            MarketError::NoteNotFound => (StatusCode::NOT_FOUND, "NOTE_NOT_FOUND"),
            MarketError::WithdrawalNotFound => (StatusCode::NOT_FOUND, "WITHDRAWAL_NOT_FOUND"),
            MarketError::CourseNotFound => (StatusCode::NOT_FOUND, "COURSE_NOT_FOUND"),
            MarketError::ModuleNotFound => (StatusCode::NOT_FOUND, "MODULE_NOT_FOUND"),
            MarketError::NotificationNotFound => {
                (StatusCode::NOT_FOUND, "NOTIFICATION_NOT_FOUND")
            }
            MarketError::SelfPurchase => (StatusCode::BAD_REQUEST, "SELF_PURCHASE"),
            MarketError::AlreadyPurchased => (StatusCode::CONFLICT, "ALREADY_PURCHASED"),
            MarketError::AccessDenied => (StatusCode::FORBIDDEN, "ACCESS_DENIED"),
            MarketError::AlreadyReviewed => (StatusCode::CONFLICT, "ALREADY_REVIEWED"),
            MarketError::ReviewNotFound => (StatusCode::NOT_FOUND, "REVIEW_NOT_FOUND"),
            MarketError::InvalidRating => (StatusCode::BAD_REQUEST, "INVALID_RATING"),
            MarketError::SelfRating => (StatusCode::BAD_REQUEST, "SELF_RATING"),
            MarketError::InvalidAmount => (StatusCode::BAD_REQUEST, "INVALID_AMOUNT"),
            MarketError::InsufficientBalance => {
                (StatusCode::UNPROCESSABLE_ENTITY, "INSUFFICIENT_BALANCE")
            }
            MarketError::InvalidTransition => (StatusCode::CONFLICT, "INVALID_TRANSITION"),
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

/// POST /users - Register a user.
async fn register_user(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> (StatusCode, Json<CreatedResponse>) {
    let user_id = state.engine.register_user(&request.name);
    (StatusCode::CREATED, Json(CreatedResponse { id: user_id.0 }))
}

/// POST /notes - Publish a note for sale.
async fn publish_note(
    State(state): State<AppState>,
    Json(request): Json<PublishRequest>,
) -> Result<(StatusCode, Json<CreatedResponse>), AppError> {
    let note_id = state.engine.publish_note(
        UserId(request.owner_id),
        &request.title,
        request.price,
        &request.cover_path,
        &request.file_path,
    )?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id: note_id.0 })))
}

/// POST /purchase - Settle a note purchase.
async fn create_purchase(
    State(state): State<AppState>,
    Json(request): Json<PurchaseRequest>,
) -> Response {
    // The gateway invoice is recorded as-is; the only check is presence.
    if request.invoice_id.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "invoice id must not be empty".to_string(),
                code: "INVALID_INVOICE".to_string(),
            }),
        )
            .into_response();
    }

    match state.engine.purchase(
        NoteId(request.note_id),
        UserId(request.buyer_id),
        &request.invoice_id,
    ) {
        Ok(sale) => (StatusCode::CREATED, Json(sale)).into_response(),
        Err(err) => AppError(err).into_response(),
    }
}

/// POST /withdrawals - Open a withdrawal request.
async fn create_withdrawal(
    State(state): State<AppState>,
    Json(request): Json<WithdrawalRequest>,
) -> Result<(StatusCode, Json<CreatedResponse>), AppError> {
    let id = state
        .engine
        .request_withdrawal(UserId(request.user_id), request.amount)?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id: id.0 })))
}

/// POST /withdrawals/:id/review - Accept or reject a pending withdrawal.
async fn review_withdrawal(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    Json(request): Json<ReviewRequest>,
) -> Result<StatusCode, AppError> {
    state
        .engine
        .review_withdrawal(WithdrawalId(id), request.decision)?;
    Ok(StatusCode::OK)
}

/// POST /withdrawals/:id/completed - Complete an accepted withdrawal.
async fn complete_withdrawal(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    Json(request): Json<CompleteRequest>,
) -> Result<Json<BalanceResponse>, AppError> {
    let balance = state.engine.complete_withdrawal(
        WithdrawalId(id),
        &request.routing_number,
        Utc::now(),
    )?;
    Ok(Json(BalanceResponse { balance }))
}

/// GET /users/:id - Get a user's balance.
async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<Json<UserResponse>, (StatusCode, Json<ErrorResponse>)> {
    let user_id = UserId(id);

    state
        .engine
        .get_user(&user_id)
        .map(|user| {
            Json(UserResponse {
                user: user_id.0,
                name: user.display_name(),
                balance: user.balance(),
                purchases: user.purchase_count(),
                unread: state.engine.unread_count(user_id),
            })
        })
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: "User not found".to_string(),
                    code: "USER_NOT_FOUND".to_string(),
                }),
            )
        })
}

/// GET /users/:id/notifications - Get a user's inbox.
async fn get_notifications(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Json<Vec<Notification>> {
    state.engine.deliver_notifications();
    Json(state.engine.notifications(UserId(id)))
}

/// GET /sales - List all settled sales.
async fn list_sales(State(state): State<AppState>) -> Json<Vec<Arc<Sale>>> {
    Json(state.engine.sales())
}

// === Router ===

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/users", post(register_user))
        .route("/users/{id}", get(get_user))
        .route("/users/{id}/notifications", get(get_notifications))
        .route("/notes", post(publish_note))
        .route("/purchase", post(create_purchase))
        .route("/withdrawals", post(create_withdrawal))
        .route("/withdrawals/{id}/review", post(review_withdrawal))
        .route("/withdrawals/{id}/completed", post(complete_withdrawal))
        .route("/sales", get(list_sales))
        .with_state(state)
}

// === Main ===

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let state = AppState {
        engine: Arc::new(MarketEngine::new()),
    };

    let app = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:3000").await.unwrap();
    println!("Marketplace API server running on http://127.0.0.1:3000");
    println!();
    println!("Endpoints:");
    println!("  POST /users                       - Register a user");
    println!("  POST /notes                       - Publish a note");
    println!("  POST /purchase                    - Settle a purchase");
    println!("  POST /withdrawals                 - Request a withdrawal");
    println!("  POST /withdrawals/:id/review      - Review a withdrawal");
    println!("  POST /withdrawals/:id/completed   - Complete a withdrawal");
    println!("  GET  /users/:id                   - Get a user");
    println!("  GET  /users/:id/notifications     - Get a user's inbox");
    println!("  GET  /sales                       - List sales");

    axum::serve(listener, app).await.unwrap();
}
