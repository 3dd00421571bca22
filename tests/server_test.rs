// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Integration tests for the REST API server with concurrent requests.
//!
//! These tests verify that the server keeps settlement consistent while
//! handling many concurrent purchase and withdrawal requests.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use notemarket_rs::{
    MarketEngine, MarketError, NoteId, Sale, UserId, WithdrawalDecision, WithdrawalId,
};
use reqwest::Client;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;

// === DTOs (duplicated from the demo server for test isolation) ===

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRequest {
    pub owner_id: u32,
    pub title: String,
    pub price: Decimal,
    pub cover_path: String,
    pub file_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub note_id: u32,
    pub buyer_id: u32,
    pub invoice_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub user_id: u32,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub decision: WithdrawalDecision,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteRequest {
    pub routing_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedResponse {
    pub id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub balance: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// === Server Setup ===

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<MarketEngine>,
}

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

async fn register_user(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> (StatusCode, Json<CreatedResponse>) {
    let user_id = state.engine.register_user(&request.name);
    (StatusCode::CREATED, Json(CreatedResponse { id: user_id.0 }))
}

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

async fn create_purchase(
    State(state): State<AppState>,
    Json(request): Json<PurchaseRequest>,
) -> Result<(StatusCode, Json<Arc<Sale>>), AppError> {
    let sale = state.engine.purchase(
        NoteId(request.note_id),
        UserId(request.buyer_id),
        &request.invoice_id,
    )?;
    Ok((StatusCode::CREATED, Json(sale)))
}

async fn create_withdrawal(
    State(state): State<AppState>,
    Json(request): Json<WithdrawalRequest>,
) -> Result<(StatusCode, Json<CreatedResponse>), AppError> {
    let id = state
        .engine
        .request_withdrawal(UserId(request.user_id), request.amount)?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id: id.0 })))
}

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

async fn complete_withdrawal(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    Json(request): Json<CompleteRequest>,
) -> Result<Json<BalanceResponse>, AppError> {
    let balance =
        state
            .engine
            .complete_withdrawal(WithdrawalId(id), &request.routing_number, Utc::now())?;
    Ok(Json(BalanceResponse { balance }))
}

async fn list_sales(State(state): State<AppState>) -> Json<Vec<Arc<Sale>>> {
    Json(state.engine.sales())
}

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/users", post(register_user))
        .route("/notes", post(publish_note))
        .route("/purchase", post(create_purchase))
        .route("/withdrawals", post(create_withdrawal))
        .route("/withdrawals/{id}/review", post(review_withdrawal))
        .route("/withdrawals/{id}/completed", post(complete_withdrawal))
        .route("/sales", get(list_sales))
        .with_state(state)
}

/// Test server that binds to an ephemeral port.
struct TestServer {
    base_url: String,
    engine: Arc<MarketEngine>,
}

impl TestServer {
    async fn new() -> Self {
        let engine = Arc::new(MarketEngine::new());
        let state = AppState {
            engine: engine.clone(),
        };

        let app = create_router(state);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait for server to be ready by polling with retries
        let client = Client::new();
        let health_url = format!("{}/sales", base_url);
        for _ in 0..50 {
            match client.get(&health_url).send().await {
                Ok(_) => break,
                Err(_) => tokio::time::sleep(tokio::time::Duration::from_millis(50)).await,
            }
        }

        TestServer { base_url, engine }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Registers a user over HTTP and returns the assigned ID.
    async fn register(&self, client: &Client, name: &str) -> u32 {
        let response = client
            .post(self.url("/users"))
            .json(&RegisterRequest {
                name: name.to_owned(),
            })
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        response.json::<CreatedResponse>().await.unwrap().id
    }

    /// Publishes a note over HTTP and returns the assigned ID.
    async fn publish(&self, client: &Client, owner: u32, price: &str) -> u32 {
        let response = client
            .post(self.url("/notes"))
            .json(&PublishRequest {
                owner_id: owner,
                title: "Linear Algebra II".to_owned(),
                price: price.parse().unwrap(),
                cover_path: "covers/la2.png".to_owned(),
                file_path: "files/la2.pdf".to_owned(),
            })
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        response.json::<CreatedResponse>().await.unwrap().id
    }
}

// === Tests ===
// These tests are ignored in CI due to connection issues on some platforms.
// Run manually with: cargo test --test server_test -- --ignored

/// Concurrent purchase attempts for the same (note, buyer) pair:
/// exactly one succeeds, the rest get 409 ALREADY_PURCHASED.
#[tokio::test]
#[ignore = "requires running server, may fail in CI"]
async fn concurrent_duplicate_purchases_rejected() {
    let server = TestServer::new().await;
    let client = Client::new();

    const ATTEMPTS: usize = 100;

    let seller = server.register(&client, "alice").await;
    let buyer = server.register(&client, "bob").await;
    let note = server.publish(&client, seller, "100.00").await;

    let mut handles = Vec::with_capacity(ATTEMPTS);
    for i in 0..ATTEMPTS {
        let client = client.clone();
        let url = server.url("/purchase");

        let handle = tokio::spawn(async move {
            let request = PurchaseRequest {
                note_id: note,
                buyer_id: buyer,
                invoice_id: format!("inv-{i}"),
            };
            let response = client.post(&url).json(&request).send().await.unwrap();
            response.status()
        });

        handles.push(handle);
    }

    let results: Vec<_> = futures::future::join_all(handles).await;

    let successful = results
        .iter()
        .filter(|r| *r.as_ref().unwrap() == StatusCode::CREATED)
        .count();
    let conflicts = results
        .iter()
        .filter(|r| *r.as_ref().unwrap() == StatusCode::CONFLICT)
        .count();

    assert_eq!(successful, 1, "Exactly one purchase should settle");
    assert_eq!(conflicts, ATTEMPTS - 1, "Others should be conflicts");

    // Seller credited exactly once: 100.00 - 15.00 commission.
    let account = server.engine.get_user(&UserId(seller)).unwrap();
    assert_eq!(account.balance(), dec!(85.00));
    assert_eq!(server.engine.sales().len(), 1);
}

/// Many distinct buyers purchase the same note concurrently; every
/// purchase settles and the seller balance is the exact payout sum.
#[tokio::test]
#[ignore = "requires running server, may fail in CI"]
async fn concurrent_purchases_distinct_buyers() {
    let server = TestServer::new().await;
    let client = Client::new();

    const BUYERS: usize = 50;

    let seller = server.register(&client, "alice").await;
    let note = server.publish(&client, seller, "100.00").await;

    let mut buyer_ids = Vec::with_capacity(BUYERS);
    for i in 0..BUYERS {
        buyer_ids.push(server.register(&client, &format!("buyer{i}")).await);
    }

    let mut handles = Vec::with_capacity(BUYERS);
    for buyer in buyer_ids {
        let client = client.clone();
        let url = server.url("/purchase");

        let handle = tokio::spawn(async move {
            let request = PurchaseRequest {
                note_id: note,
                buyer_id: buyer,
                invoice_id: format!("inv-{buyer}"),
            };
            let response = client.post(&url).json(&request).send().await.unwrap();
            response.status()
        });

        handles.push(handle);
    }

    let results: Vec<_> = futures::future::join_all(handles).await;
    let successful = results
        .iter()
        .filter(|r| r.as_ref().unwrap().is_success())
        .count();

    assert_eq!(successful, BUYERS, "All purchases should settle");

    // 85.00 payout per sale.
    let account = server.engine.get_user(&UserId(seller)).unwrap();
    assert_eq!(account.balance(), dec!(85.00) * Decimal::from(BUYERS as u32));
    assert_eq!(server.engine.sales().len(), BUYERS);
}

/// Concurrent completion requests for the same withdrawal: exactly one
/// debits the balance, the rest get 409 INVALID_TRANSITION.
#[tokio::test]
#[ignore = "requires running server, may fail in CI"]
async fn concurrent_completions_debit_once() {
    let server = TestServer::new().await;
    let client = Client::new();

    const ATTEMPTS: usize = 50;

    let seller = server.register(&client, "alice").await;
    let buyer = server.register(&client, "bob").await;
    let note = server.publish(&client, seller, "100.00").await;

    // Settle one purchase so there is a balance to withdraw.
    let response = client
        .post(server.url("/purchase"))
        .json(&PurchaseRequest {
            note_id: note,
            buyer_id: buyer,
            invoice_id: "inv-001".to_owned(),
        })
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    // Open and accept a withdrawal over half the balance.
    let response = client
        .post(server.url("/withdrawals"))
        .json(&WithdrawalRequest {
            user_id: seller,
            amount: "50.00".parse().unwrap(),
        })
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let withdrawal = response.json::<CreatedResponse>().await.unwrap().id;

    let response = client
        .post(server.url(&format!("/withdrawals/{withdrawal}/review")))
        .json(&ReviewRequest {
            decision: WithdrawalDecision::Accept,
        })
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Fire completion requests concurrently.
    let mut handles = Vec::with_capacity(ATTEMPTS);
    for _ in 0..ATTEMPTS {
        let client = client.clone();
        let url = server.url(&format!("/withdrawals/{withdrawal}/completed"));

        let handle = tokio::spawn(async move {
            let request = CompleteRequest {
                routing_number: "DE02-1234".to_owned(),
            };
            let response = client.post(&url).json(&request).send().await.unwrap();
            response.status()
        });

        handles.push(handle);
    }

    let results: Vec<_> = futures::future::join_all(handles).await;

    let successful = results
        .iter()
        .filter(|r| r.as_ref().unwrap().is_success())
        .count();
    let conflicts = results
        .iter()
        .filter(|r| *r.as_ref().unwrap() == StatusCode::CONFLICT)
        .count();

    assert_eq!(successful, 1, "Exactly one completion should settle");
    assert_eq!(conflicts, ATTEMPTS - 1, "Others should be conflicts");

    // Debited exactly once: 85.00 - 50.00.
    let account = server.engine.get_user(&UserId(seller)).unwrap();
    assert_eq!(account.balance(), dec!(35.00));
}

/// Mixed load: concurrent purchases of many notes plus withdrawal
/// traffic; every account ends in a consistent state.
#[tokio::test]
#[ignore = "requires running server, may fail in CI"]
async fn stress_test_mixed_settlement() {
    let server = TestServer::new().await;
    let client = Client::new();

    const SELLERS: usize = 10;
    const BUYERS: usize = 20;

    let mut sellers = Vec::with_capacity(SELLERS);
    let mut notes = Vec::with_capacity(SELLERS);
    for i in 0..SELLERS {
        let seller = server.register(&client, &format!("seller{i}")).await;
        let note = server.publish(&client, seller, "10.00").await;
        sellers.push(seller);
        notes.push(note);
    }

    let mut buyers = Vec::with_capacity(BUYERS);
    for i in 0..BUYERS {
        buyers.push(server.register(&client, &format!("buyer{i}")).await);
    }

    // Every buyer buys every note, all at once.
    let mut handles = Vec::with_capacity(SELLERS * BUYERS);
    for &note in &notes {
        for &buyer in &buyers {
            let client = client.clone();
            let url = server.url("/purchase");

            let handle = tokio::spawn(async move {
                let request = PurchaseRequest {
                    note_id: note,
                    buyer_id: buyer,
                    invoice_id: format!("inv-{note}-{buyer}"),
                };
                let response = client.post(&url).json(&request).send().await.unwrap();
                response.status()
            });

            handles.push(handle);
        }
    }

    let results: Vec<_> = futures::future::join_all(handles).await;
    let successful = results
        .iter()
        .filter(|r| r.as_ref().unwrap().is_success())
        .count();
    assert_eq!(successful, SELLERS * BUYERS, "All purchases should settle");

    // 10.00 note -> 1.00 + 2.00 + 0.30 commission, 6.70 payout each.
    for &seller in &sellers {
        let account = server.engine.get_user(&UserId(seller)).unwrap();
        assert_eq!(account.balance(), dec!(6.70) * Decimal::from(BUYERS as u32));
    }

    assert_eq!(server.engine.sales().len(), SELLERS * BUYERS);
}
