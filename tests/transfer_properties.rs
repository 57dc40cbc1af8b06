use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tempfile::TempDir;
use vaultline::config::StorageConfig;
use vaultline::ledger::TransferStatus;
use vaultline::models::{Account, TransactionKind};
use vaultline::{Bank, BankError, TransferRequest};

fn storage(dir: &TempDir) -> StorageConfig {
    StorageConfig {
        data_dir: dir.path().to_path_buf(),
        sync_writes: false,
    }
}

/// Bank with one account per balance; account ids start at 1
fn bank_with(dir: &TempDir, balances: &[f64]) -> Bank {
    let bank = Bank::open(&storage(dir)).unwrap();
    for (i, balance) in balances.iter().enumerate() {
        let mut account = Account::new(i as i32 + 1);
        account.balance = *balance;
        bank.accounts().append(&account).unwrap();
    }
    bank
}

fn balance(bank: &Bank, id: i32) -> f64 {
    bank.account(id).unwrap().balance
}

fn request(from: i32, to: i32, amount: f64) -> TransferRequest {
    TransferRequest { from, to, amount }
}

#[test]
fn end_to_end_transfer() {
    let dir = TempDir::new().unwrap();
    let bank = bank_with(&dir, &[5000.0, 10000.0]);

    let receipt = bank.transfer(&request(1, 2, 1500.0)).unwrap();
    assert_eq!(balance(&bank, 1), 3500.0);
    assert_eq!(balance(&bank, 2), 11500.0);
    assert_eq!(receipt.from_balance, 3500.0);

    let wal = bank.ledger().entries().unwrap();
    let starts = wal.iter().filter(|e| e.status == TransferStatus::Start).count();
    let commits = wal.iter().filter(|e| e.status == TransferStatus::Commit).count();
    assert_eq!((starts, commits), (1, 1));
    assert!(wal.iter().all(|e| e.transfer_id == receipt.transfer_id));

    let out = bank.history(1).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].kind, TransactionKind::TransferOut);
    assert_eq!(out[0].new_balance, 3500.0);
    assert_eq!(out[0].counterparty, "SB-2");

    let incoming = bank.history(2).unwrap();
    assert_eq!(incoming[0].kind, TransactionKind::TransferIn);
    assert_eq!(incoming[0].new_balance, 11500.0);
    assert_eq!(incoming[0].counterparty, "SB-1");
}

#[test]
fn concurrent_transfers_conserve_total() {
    let dir = TempDir::new().unwrap();
    let balances = [1000.0, 2000.0, 3000.0, 4000.0];
    let bank = Arc::new(bank_with(&dir, &balances));
    let total: f64 = balances.iter().sum();

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let bank = bank.clone();
            thread::spawn(move || {
                for i in 0..25 {
                    let from = (t + i) % 4 + 1;
                    let to = (t * 3 + i * 7 + 1) % 4 + 1;
                    // Same-account and overdraft attempts fail cleanly
                    let _ = bank.transfer(&request(from, to, (i % 5 + 1) as f64 * 10.0));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let after: f64 = (1..=4).map(|id| balance(&bank, id)).sum();
    assert_eq!(after, total);
    assert!(bank.accounts().locks().is_idle());
}

#[test]
fn opposite_direction_transfers_do_not_deadlock() {
    let dir = TempDir::new().unwrap();
    let bank = Arc::new(bank_with(&dir, &[10_000.0, 10_000.0]));
    let (done_tx, done_rx) = mpsc::channel();

    for t in 0..8 {
        let bank = bank.clone();
        let done = done_tx.clone();
        thread::spawn(move || {
            let (from, to) = if t % 2 == 0 { (1, 2) } else { (2, 1) };
            for _ in 0..50 {
                bank.transfer(&request(from, to, 1.0)).unwrap();
            }
            done.send(()).unwrap();
        });
    }
    drop(done_tx);

    for _ in 0..8 {
        done_rx
            .recv_timeout(Duration::from_secs(30))
            .expect("transfer threads stalled");
    }
    assert_eq!(balance(&bank, 1) + balance(&bank, 2), 20_000.0);
    assert_eq!(balance(&bank, 1), 10_000.0);
}

#[test]
fn cent_amounts_stay_exact() {
    let dir = TempDir::new().unwrap();
    let bank = bank_with(&dir, &[0.0, 0.0]);
    for _ in 0..100 {
        bank.deposit(1, 0.1).unwrap();
    }
    assert_eq!(balance(&bank, 1), 10.0);

    for _ in 0..10 {
        bank.transfer(&request(1, 2, 0.3)).unwrap();
    }
    assert_eq!(balance(&bank, 1), 7.0);
    assert_eq!(balance(&bank, 2), 3.0);
    bank.withdraw(1, 7.0).unwrap();
    assert_eq!(balance(&bank, 1), 0.0);
}

#[test]
fn concurrent_appends_get_distinct_consecutive_ids() {
    let dir = TempDir::new().unwrap();
    let bank = Arc::new(bank_with(&dir, &[]));
    let first = bank.accounts().peek_next_id().unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let bank = bank.clone();
            thread::spawn(move || {
                (0..10)
                    .map(|_| {
                        bank.accounts()
                            .append_with(|next| Ok(Account::new(next as i32)))
                            .unwrap()
                            .1
                            .account_id as i64
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut ids: Vec<i64> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    ids.sort_unstable();
    let expected: Vec<i64> = (first..first + 80).collect();
    assert_eq!(ids, expected);
}

#[test]
fn concurrent_transfers_get_distinct_ids() {
    let dir = TempDir::new().unwrap();
    let bank = Arc::new(bank_with(&dir, &[1000.0, 1000.0, 1000.0]));

    let handles: Vec<_> = (0..6)
        .map(|t| {
            let bank = bank.clone();
            thread::spawn(move || {
                let from = t % 3 + 1;
                let to = (t + 1) % 3 + 1;
                (0..10)
                    .map(|_| bank.transfer(&request(from, to, 1.0)).unwrap().transfer_id)
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut ids: Vec<i64> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, (1..=60).collect::<Vec<_>>());
}

#[test]
fn crash_after_start_changes_nothing() {
    let dir = TempDir::new().unwrap();
    {
        let bank = bank_with(&dir, &[500.0, 100.0]);
        bank.ledger().begin(1, 2, 200.0).unwrap();
    }

    let bank = Bank::open(&storage(&dir)).unwrap();
    let report = bank.recover(16).unwrap();
    assert_eq!(report.closed_without_debit, 1);
    assert_eq!(balance(&bank, 1), 500.0);
    assert_eq!(balance(&bank, 2), 100.0);
}

/// START logged and the sender debited, credit never written
fn crash_after_debit(dir: &TempDir, with_marker: bool) {
    let bank = bank_with(dir, &[500.0, 100.0]);
    let start = bank.ledger().begin(1, 2, 200.0).unwrap();
    bank.accounts()
        .update_at(0, |a| {
            a.balance -= 200.0;
            a.debit_stamp = start.transfer_id;
            Ok(())
        })
        .unwrap();
    if with_marker {
        bank.ledger().mark(&start, TransferStatus::Debited).unwrap();
    }
}

#[test]
fn crash_after_debit_refunds_sender() {
    for with_marker in [true, false] {
        let dir = TempDir::new().unwrap();
        crash_after_debit(&dir, with_marker);

        let bank = Bank::open(&storage(&dir)).unwrap();
        assert_eq!(balance(&bank, 1), 300.0);
        let report = bank.recover(16).unwrap();
        assert_eq!(report.rolled_back, 1, "marker={}", with_marker);
        assert_eq!(balance(&bank, 1), 500.0);
        assert_eq!(balance(&bank, 2), 100.0);

        let refund = bank.history(1).unwrap();
        assert_eq!(refund.len(), 1);
        assert_eq!(refund[0].kind, TransactionKind::Rollback);
        assert_eq!(refund[0].amount, 200.0);
    }
}

#[test]
fn recovery_is_idempotent() {
    let dir = TempDir::new().unwrap();
    crash_after_debit(&dir, false);

    let bank = Bank::open(&storage(&dir)).unwrap();
    assert_eq!(bank.recover(16).unwrap().resolved(), 1);
    let after_first = (balance(&bank, 1), balance(&bank, 2));
    let wal_len = bank.ledger().entries().unwrap().len();

    assert_eq!(bank.recover(16).unwrap().resolved(), 0);
    assert_eq!((balance(&bank, 1), balance(&bank, 2)), after_first);
    assert_eq!(bank.ledger().entries().unwrap().len(), wal_len);
}

#[test]
fn transfer_ids_keep_rising_across_restarts() {
    let dir = TempDir::new().unwrap();
    {
        let bank = bank_with(&dir, &[500.0, 100.0]);
        bank.transfer(&request(1, 2, 10.0)).unwrap();
        bank.ledger().begin(1, 2, 10.0).unwrap();
    }

    let bank = Bank::open(&storage(&dir)).unwrap();
    bank.recover(16).unwrap();
    // The last WAL entry is a RECOVERED for id 2
    let receipt = bank.transfer(&request(2, 1, 5.0)).unwrap();
    assert_eq!(receipt.transfer_id, 3);
}

#[test]
fn second_process_cannot_open_the_data_dir() {
    let dir = TempDir::new().unwrap();
    let _bank = Bank::open(&storage(&dir)).unwrap();
    assert!(matches!(
        Bank::open(&storage(&dir)),
        Err(BankError::Conflict(_))
    ));
}
