//! Concurrency tests for the wallet ledger.
//!
//! These use a file-backed pool because every pooled connection must see the
//! same database; `:memory:` gives each connection a private one.

use kindred_db::{create_pool, run_migrations, DbPool, DbRuntimeSettings};
use kindred_ledger::{credit, deduct, find_wallet, get_or_create_wallet, history, LedgerError};
use kindred_types::TransactionKind;
use tempfile::TempDir;

const STARTING_BALANCE: i64 = 100;

fn setup_pool() -> (DbPool, TempDir) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let path = dir.path().join("ledger.db");
    let path = path.to_str().expect("temp path should be utf-8");

    let pool = create_pool(path, DbRuntimeSettings::default()).expect("failed to create pool");
    let conn = pool.get().expect("failed to get connection");
    run_migrations(&conn).expect("failed to run migrations");
    (pool, dir)
}

#[test]
fn concurrent_deductions_never_overspend() {
    let (pool, _dir) = setup_pool();

    {
        let mut conn = pool.get().expect("failed to get connection");
        get_or_create_wallet(&mut conn, "user-1", STARTING_BALANCE).expect("create failed");
    }

    // 100 coins cover exactly three 30-coin deductions.
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let pool = pool.clone();
            std::thread::spawn(move || {
                let mut conn = pool.get().expect("failed to get connection");
                deduct(&mut conn, "user-1", 30, "race", None, STARTING_BALANCE)
            })
        })
        .collect();

    let mut successes = 0;
    for handle in handles {
        match handle.join().expect("thread panicked") {
            Ok(_) => successes += 1,
            Err(LedgerError::InsufficientFunds { .. }) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(successes, 3, "exactly three deductions fit the balance");

    let conn = pool.get().expect("failed to get connection");
    let wallet = find_wallet(&conn, "user-1")
        .expect("find failed")
        .expect("wallet should exist");
    assert_eq!(wallet.balance, 10);
    assert_eq!(wallet.total_spent, 90);

    // Bonus plus three deductions.
    let trail = history(&conn, "user-1", None, None).expect("history failed");
    assert_eq!(trail.len(), 4);
}

#[test]
fn competing_deductions_leave_exactly_one_winner() {
    let (pool, _dir) = setup_pool();

    {
        let mut conn = pool.get().expect("failed to get connection");
        deduct(&mut conn, "user-1", 25, "first spend", None, STARTING_BALANCE)
            .expect("first deduct failed");
    }

    // 75 coins cover either amount alone but never both.
    let handles: Vec<_> = [25i64, 60]
        .into_iter()
        .map(|amount| {
            let pool = pool.clone();
            std::thread::spawn(move || {
                let mut conn = pool.get().expect("failed to get connection");
                deduct(&mut conn, "user-1", amount, "race", None, STARTING_BALANCE)
                    .map(|_| amount)
            })
        })
        .collect();

    let mut winners = Vec::new();
    for handle in handles {
        match handle.join().expect("thread panicked") {
            Ok(amount) => winners.push(amount),
            Err(LedgerError::InsufficientFunds { .. }) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(winners.len(), 1, "exactly one deduction fits");

    let conn = pool.get().expect("failed to get connection");
    let wallet = find_wallet(&conn, "user-1")
        .expect("find failed")
        .expect("wallet should exist");
    assert_eq!(wallet.balance, 75 - winners[0]);
    assert_eq!(wallet.total_spent, 25 + winners[0]);
}

#[test]
fn concurrent_first_references_create_one_wallet() {
    let (pool, _dir) = setup_pool();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let pool = pool.clone();
            std::thread::spawn(move || {
                let mut conn = pool.get().expect("failed to get connection");
                get_or_create_wallet(&mut conn, "user-1", STARTING_BALANCE)
                    .expect("get_or_create failed")
            })
        })
        .collect();

    for handle in handles {
        let wallet = handle.join().expect("thread panicked");
        assert_eq!(wallet.balance, 100, "every caller sees the same wallet");
    }

    let conn = pool.get().expect("failed to get connection");
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM wallets WHERE user_id = 'user-1'",
            [],
            |row| row.get(0),
        )
        .expect("count failed");
    assert_eq!(count, 1);

    let trail = history(&conn, "user-1", None, None).expect("history failed");
    assert_eq!(trail.len(), 1, "the starting bonus is granted exactly once");
}

#[test]
fn mixed_churn_keeps_audit_replayable() {
    let (pool, _dir) = setup_pool();

    {
        let mut conn = pool.get().expect("failed to get connection");
        get_or_create_wallet(&mut conn, "user-1", STARTING_BALANCE).expect("create failed");
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        let pool = pool.clone();
        handles.push(std::thread::spawn(move || {
            let mut conn = pool.get().expect("failed to get connection");
            for _ in 0..5 {
                match deduct(&mut conn, "user-1", 7, "churn spend", None, STARTING_BALANCE) {
                    Ok(_) | Err(LedgerError::InsufficientFunds { .. }) => {}
                    Err(other) => panic!("unexpected error: {other:?}"),
                }
            }
        }));
    }
    for _ in 0..2 {
        let pool = pool.clone();
        handles.push(std::thread::spawn(move || {
            let mut conn = pool.get().expect("failed to get connection");
            for _ in 0..5 {
                credit(
                    &mut conn,
                    "user-1",
                    11,
                    TransactionKind::Bonus,
                    "churn grant",
                    None,
                    None,
                    STARTING_BALANCE,
                )
                .expect("credit failed");
            }
        }));
    }

    for handle in handles {
        handle.join().expect("thread panicked");
    }

    let conn = pool.get().expect("failed to get connection");
    let wallet = find_wallet(&conn, "user-1")
        .expect("find failed")
        .expect("wallet should exist");
    assert!(wallet.balance >= 0);

    // Every entry, newest first; the signed amounts must replay to the final
    // balance and each snapshot must be non-negative.
    let trail = history(&conn, "user-1", Some(200), None).expect("history failed");
    let replayed: i64 = trail.iter().map(|t| t.amount).sum();
    assert_eq!(replayed, wallet.balance);
    assert!(trail.iter().all(|t| t.balance_after >= 0));
    assert_eq!(trail[0].balance_after, wallet.balance);
}
