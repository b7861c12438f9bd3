//! Wallet endpoints: balance, audit history, spends, and the payment
//! provider webhook.

use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use kindred_ledger::{credit, deduct, get_or_create_wallet, history, Wallet, WalletTransaction};
use kindred_types::TransactionKind;

use crate::middleware::UserContext;
use crate::{ApiError, AppState};

/// GET /api/wallet
///
/// Returns the caller's wallet, creating it with the starting grant on
/// first touch.
pub async fn get_wallet_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(UserContext(user_id)): Extension<UserContext>,
) -> Result<Json<Wallet>, ApiError> {
    let pool = state.pool.clone();
    let starting_balance = state.policy.starting_balance;
    let wallet = tokio::task::spawn_blocking(move || -> Result<Wallet, ApiError> {
        let mut conn = pool.get().map_err(ApiError::internal)?;
        Ok(get_or_create_wallet(&mut conn, &user_id, starting_balance)?)
    })
    .await
    .map_err(ApiError::internal)??;

    Ok(Json(wallet))
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// GET /api/wallet/history
///
/// Pages through the caller's audit trail, newest entries first.
pub async fn wallet_history_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(UserContext(user_id)): Extension<UserContext>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<WalletTransaction>>, ApiError> {
    let pool = state.pool.clone();
    let entries = tokio::task::spawn_blocking(move || -> Result<Vec<WalletTransaction>, ApiError> {
        let conn = pool.get().map_err(ApiError::internal)?;
        Ok(history(&conn, &user_id, params.limit, params.offset)?)
    })
    .await
    .map_err(ApiError::internal)??;

    Ok(Json(entries))
}

#[derive(Debug, Deserialize)]
pub struct DeductRequest {
    pub amount: i64,
    pub description: String,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// POST /api/wallet/deduct
///
/// Spends coins from the caller's balance. Responds 402 with the
/// `insufficient_funds` reason rather than ever overdrawing.
pub async fn deduct_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(UserContext(user_id)): Extension<UserContext>,
    Json(req): Json<DeductRequest>,
) -> Result<Json<Value>, ApiError> {
    let pool = state.pool.clone();
    let starting_balance = state.policy.starting_balance;
    let (wallet, transaction) = tokio::task::spawn_blocking(
        move || -> Result<(Wallet, WalletTransaction), ApiError> {
            let mut conn = pool.get().map_err(ApiError::internal)?;
            Ok(deduct(
                &mut conn,
                &user_id,
                req.amount,
                &req.description,
                req.metadata.as_ref(),
                starting_balance,
            )?)
        },
    )
    .await
    .map_err(ApiError::internal)??;

    Ok(Json(json!({ "balance": wallet.balance, "transaction": transaction })))
}

#[derive(Debug, Deserialize)]
pub struct PaymentCompletedRequest {
    pub user_id: String,
    pub package_id: String,
    pub coins: i64,
}

/// POST /api/payments/completed
///
/// Called by the payment provider once a coin package clears; signature
/// verification happens at the edge before the call is forwarded here.
/// Credits the package to the user's wallet, creating it if needed.
pub async fn payment_completed_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<PaymentCompletedRequest>,
) -> Result<Json<Value>, ApiError> {
    if req.user_id.trim().is_empty() {
        return Err(ApiError::validation("user_id must not be empty"));
    }

    let pool = state.pool.clone();
    let starting_balance = state.policy.starting_balance;
    let (wallet, transaction) = tokio::task::spawn_blocking(
        move || -> Result<(Wallet, WalletTransaction), ApiError> {
            let mut conn = pool.get().map_err(ApiError::internal)?;
            let description = format!("coin package {}", req.package_id);
            let metadata = json!({ "package_id": req.package_id.clone() });
            Ok(credit(
                &mut conn,
                &req.user_id,
                req.coins,
                TransactionKind::Purchase,
                &description,
                Some(req.package_id.as_str()),
                Some(&metadata),
                starting_balance,
            )?)
        },
    )
    .await
    .map_err(ApiError::internal)??;

    tracing::info!(
        user = %wallet.user_id,
        amount = transaction.amount,
        balance = wallet.balance,
        "credited coin purchase"
    );
    Ok(Json(json!({ "balance": wallet.balance, "transaction": transaction })))
}
