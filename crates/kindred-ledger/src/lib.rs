//! Coin wallet ledger for the Kindred platform.
//!
//! Every balance mutation runs inside an immediate SQLite transaction and
//! writes a matching row to the `wallet_transactions` audit trail, so a
//! wallet's history always replays to its current balance. Deductions are
//! conditional on sufficient funds at UPDATE time; there is no window in
//! which a concurrent writer can observe the balance between check and
//! spend.

use kindred_types::TransactionKind;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Package ids beginning with this prefix grant lifetime status.
const LIFETIME_PACKAGE_PREFIX: &str = "lifetime";

/// Errors that can occur during wallet operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("insufficient funds: need {needed}, have {available}")]
    InsufficientFunds {
        /// Coins the operation asked for.
        needed: i64,
        /// Coins actually on the wallet.
        available: i64,
    },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("metadata serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A user's coin wallet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Wallet {
    /// Internal database ID.
    pub id: i64,
    /// Owning user.
    pub user_id: String,
    /// Spendable coins. Never negative.
    pub balance: i64,
    /// Whether a lifetime package has ever been purchased.
    pub lifetime: bool,
    /// Coins credited through lifetime packages.
    pub lifetime_coins: i64,
    /// Total coins ever deducted.
    pub total_spent: i64,
    /// Total coins ever purchased.
    pub total_purchased: i64,
    /// Creation timestamp (ISO 8601).
    pub created_at: String,
    /// Last mutation timestamp (ISO 8601).
    pub updated_at: String,
}

/// One entry in a wallet's audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalletTransaction {
    /// Internal database ID. Also the ordering key within a wallet.
    pub id: i64,
    /// Owning user.
    pub user_id: String,
    /// What produced this entry.
    pub kind: TransactionKind,
    /// Signed coin delta: positive for credits, negative for deductions.
    pub amount: i64,
    /// Wallet balance immediately after this entry was applied.
    pub balance_after: i64,
    /// Human-readable summary (e.g. "voice turn").
    pub description: String,
    /// Structured context (persona id, package id, ...).
    pub metadata: Option<serde_json::Value>,
    /// Creation timestamp (ISO 8601).
    pub created_at: String,
}

const SELECT_WALLET: &str = "SELECT id, user_id, balance, lifetime, lifetime_coins, total_spent,
        total_purchased, created_at, updated_at
     FROM wallets WHERE user_id = ?1";

/// Fetches a user's wallet, creating it with the starting balance on first
/// reference.
///
/// Creation grants `starting_balance` coins and records a `bonus` audit
/// entry. Concurrent callers race on the `user_id` unique constraint; the
/// loser of the race sees the winner's wallet and grants nothing.
pub fn get_or_create_wallet(
    conn: &mut Connection,
    user_id: &str,
    starting_balance: i64,
) -> Result<Wallet, LedgerError> {
    if user_id.trim().is_empty() {
        return Err(LedgerError::Validation("user id must not be empty".into()));
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let inserted = tx.execute(
        "INSERT INTO wallets (user_id, balance) VALUES (?1, ?2)
         ON CONFLICT(user_id) DO NOTHING",
        params![user_id, starting_balance],
    )?;

    if inserted > 0 && starting_balance > 0 {
        tx.execute(
            "INSERT INTO wallet_transactions (user_id, kind, amount, balance_after, description)
             VALUES (?1, 'bonus', ?2, ?2, 'starting balance')",
            params![user_id, starting_balance],
        )?;
    }

    let wallet = tx.query_row(SELECT_WALLET, [user_id], map_row_to_wallet)?;
    tx.commit()?;

    Ok(wallet)
}

/// Fetches a user's wallet without creating it.
pub fn find_wallet(conn: &Connection, user_id: &str) -> Result<Option<Wallet>, LedgerError> {
    let wallet = conn
        .query_row(SELECT_WALLET, [user_id], map_row_to_wallet)
        .optional()?;
    Ok(wallet)
}

/// Deducts `amount` coins from a user's wallet.
///
/// The deduction is conditional: the UPDATE only matches when the balance
/// covers the amount, so two concurrent deductions can never overspend.
/// On success returns the updated wallet and the `deduction` audit entry
/// (with a negative `amount`). The wallet is created first if the user has
/// never been seen.
///
/// # Errors
///
/// Returns `LedgerError::InsufficientFunds` with the current balance when
/// the wallet cannot cover the amount. Nothing is written in that case.
pub fn deduct(
    conn: &mut Connection,
    user_id: &str,
    amount: i64,
    description: &str,
    metadata: Option<&serde_json::Value>,
    starting_balance: i64,
) -> Result<(Wallet, WalletTransaction), LedgerError> {
    if amount <= 0 {
        return Err(LedgerError::Validation(
            "deduction amount must be positive".into(),
        ));
    }

    get_or_create_wallet(conn, user_id, starting_balance)?;
    let metadata_json = metadata.map(serde_json::to_string).transpose()?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let updated = tx.execute(
        "UPDATE wallets
         SET balance = balance - ?1,
             total_spent = total_spent + ?1,
             updated_at = datetime('now')
         WHERE user_id = ?2 AND balance >= ?1",
        params![amount, user_id],
    )?;

    if updated == 0 {
        let available: i64 =
            tx.query_row("SELECT balance FROM wallets WHERE user_id = ?1", [user_id], |row| {
                row.get(0)
            })?;
        return Err(LedgerError::InsufficientFunds {
            needed: amount,
            available,
        });
    }

    // balance_after comes from the wallet row inside the same transaction,
    // so the audit entry cannot drift from the balance it describes.
    let record = tx.query_row(
        "INSERT INTO wallet_transactions (user_id, kind, amount, balance_after, description, metadata_json)
         SELECT ?1, 'deduction', -?2, balance, ?3, ?4 FROM wallets WHERE user_id = ?1
         RETURNING id, user_id, kind, amount, balance_after, description, metadata_json, created_at",
        params![user_id, amount, description, metadata_json],
        map_row_to_transaction,
    )?;

    let wallet = tx.query_row(SELECT_WALLET, [user_id], map_row_to_wallet)?;
    tx.commit()?;

    Ok((wallet, record))
}

/// Credits `amount` coins to a user's wallet.
///
/// `kind` distinguishes purchases from bonuses and refunds; deductions are
/// rejected here. Purchases additionally bump `total_purchased`, and a
/// `package_id` beginning with `lifetime` flips the wallet's lifetime flag
/// and accumulates `lifetime_coins`. The wallet is created first if the
/// user has never been seen.
pub fn credit(
    conn: &mut Connection,
    user_id: &str,
    amount: i64,
    kind: TransactionKind,
    description: &str,
    package_id: Option<&str>,
    metadata: Option<&serde_json::Value>,
    starting_balance: i64,
) -> Result<(Wallet, WalletTransaction), LedgerError> {
    if amount <= 0 {
        return Err(LedgerError::Validation(
            "credit amount must be positive".into(),
        ));
    }
    if kind == TransactionKind::Deduction {
        return Err(LedgerError::Validation(
            "credits cannot use the deduction kind".into(),
        ));
    }

    get_or_create_wallet(conn, user_id, starting_balance)?;
    let metadata_json = metadata.map(serde_json::to_string).transpose()?;
    let purchased_delta = if kind == TransactionKind::Purchase {
        amount
    } else {
        0
    };
    let is_lifetime = package_id
        .map(|p| p.starts_with(LIFETIME_PACKAGE_PREFIX))
        .unwrap_or(false);

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    tx.execute(
        "UPDATE wallets
         SET balance = balance + ?1,
             total_purchased = total_purchased + ?2,
             updated_at = datetime('now')
         WHERE user_id = ?3",
        params![amount, purchased_delta, user_id],
    )?;

    if is_lifetime {
        tx.execute(
            "UPDATE wallets
             SET lifetime = 1, lifetime_coins = lifetime_coins + ?1
             WHERE user_id = ?2",
            params![amount, user_id],
        )?;
    }

    let record = tx.query_row(
        "INSERT INTO wallet_transactions (user_id, kind, amount, balance_after, description, metadata_json)
         SELECT ?1, ?2, ?3, balance, ?4, ?5 FROM wallets WHERE user_id = ?1
         RETURNING id, user_id, kind, amount, balance_after, description, metadata_json, created_at",
        params![user_id, kind.as_str(), amount, description, metadata_json],
        map_row_to_transaction,
    )?;

    let wallet = tx.query_row(SELECT_WALLET, [user_id], map_row_to_wallet)?;
    tx.commit()?;

    Ok((wallet, record))
}

/// Reads a page of a user's audit trail, newest entries first.
///
/// `limit` defaults to 50 and is capped at 200; `offset` skips past newer
/// entries for pagination.
pub fn history(
    conn: &Connection,
    user_id: &str,
    limit: Option<u32>,
    offset: Option<u32>,
) -> Result<Vec<WalletTransaction>, LedgerError> {
    let limit = limit.unwrap_or(50).min(200);
    let offset = offset.unwrap_or(0);

    let mut stmt = conn.prepare(
        "SELECT id, user_id, kind, amount, balance_after, description, metadata_json, created_at
         FROM wallet_transactions
         WHERE user_id = ?1
         ORDER BY id DESC
         LIMIT ?2 OFFSET ?3",
    )?;

    let rows = stmt.query_map(params![user_id, limit, offset], map_row_to_transaction)?;
    let mut entries = Vec::new();
    for row in rows {
        entries.push(row?);
    }
    Ok(entries)
}

fn map_row_to_wallet(row: &Row) -> rusqlite::Result<Wallet> {
    Ok(Wallet {
        id: row.get(0)?,
        user_id: row.get(1)?,
        balance: row.get(2)?,
        lifetime: row.get(3)?,
        lifetime_coins: row.get(4)?,
        total_spent: row.get(5)?,
        total_purchased: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn map_row_to_transaction(row: &Row) -> rusqlite::Result<WalletTransaction> {
    let kind_str: String = row.get(2)?;
    let kind = TransactionKind::from_str(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown transaction kind: {kind_str}").into(),
        )
    })?;

    let metadata_json: Option<String> = row.get(6)?;
    let metadata = match metadata_json {
        Some(s) => Some(serde_json::from_str(&s).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?),
        None => None,
    };

    Ok(WalletTransaction {
        id: row.get(0)?,
        user_id: row.get(1)?,
        kind,
        amount: row.get(3)?,
        balance_after: row.get(4)?,
        description: row.get(5)?,
        metadata,
        created_at: row.get(7)?,
    })
}
