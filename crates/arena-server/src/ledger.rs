//! Reward ledger
//!
//! The only writer of balances. Every change is an appended entry carrying the
//! running `balance_after`; the balance snapshot is upserted in the same
//! commit. Callers that need several ledger writes to land together with other
//! rows use the `*_in` variants against their own [`Transaction`].

use std::collections::HashMap;
use std::time::Instant;

use arena_core::{
    covers, round_points, Address, BalanceSnapshot, DebitReceipt, LedgerAudit, LedgerEntry,
    LedgerError, LedgerReason, LedgerResult, NewLedgerEntry,
};
use rust_decimal::Decimal;

use crate::db::{Database, Transaction};

#[derive(Clone)]
pub struct RewardLedger {
    db: Database,
    enabled: bool,
}

impl RewardLedger {
    pub fn new(db: Database, enabled: bool) -> Self {
        tracing::debug!(enabled, "Initializing reward ledger");
        Self { db, enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn ensure_enabled(&self) -> LedgerResult<()> {
        if self.enabled {
            Ok(())
        } else {
            Err(LedgerError::Disabled)
        }
    }

    /// Latest balance per address, optionally row-locked for the rest of `tx`.
    ///
    /// Addresses without history resolve to zero and are still present in the
    /// returned map.
    pub async fn fetch_balances(
        &self,
        tx: &mut Transaction,
        addresses: &[Address],
        lock_rows: bool,
    ) -> LedgerResult<HashMap<Address, Decimal>> {
        if lock_rows {
            tx.lock_rows(addresses).await;
        }
        let mut balances = HashMap::with_capacity(addresses.len());
        for address in addresses {
            balances.insert(address.clone(), tx.latest_balance(address).await?);
        }
        Ok(balances)
    }

    /// Display read. Never blocks writers and may be slightly stale, so it must
    /// not gate a debit.
    pub async fn fetch_reward_balances(
        &self,
        addresses: &[Address],
    ) -> LedgerResult<HashMap<Address, BalanceSnapshot>> {
        let balances = self.db.read_balances(addresses).await?;
        let mut snapshots = HashMap::with_capacity(balances.len());
        for (address, current_balance) in balances {
            let updated_at = match self.db.balance_row(&address).await? {
                Some(row) => row.into_snapshot()?.updated_at,
                None => None,
            };
            snapshots.insert(
                address.clone(),
                BalanceSnapshot {
                    address,
                    current_balance,
                    updated_at,
                },
            );
        }
        Ok(snapshots)
    }

    /// Apply `entries` in one all-or-nothing transaction.
    pub async fn apply_entries(&self, entries: Vec<NewLedgerEntry>) -> LedgerResult<HashMap<Address, Decimal>> {
        self.ensure_enabled()?;
        let start = Instant::now();
        let mut tx = self.db.begin();
        let balances = self.apply_entries_in(&mut tx, entries).await?;
        let summary = tx.commit().await?;

        tracing::info!(
            entries = summary.entry_ids.len(),
            addresses = balances.len(),
            duration_ms = %start.elapsed().as_millis(),
            "Ledger entries committed"
        );
        Ok(balances)
    }

    /// Stage `entries` on `tx`, folding same-address entries in order.
    ///
    /// Zero deltas are dropped. Returns the new balance of every address that
    /// appeared in `entries`, including ones whose deltas were all zero.
    pub async fn apply_entries_in(
        &self,
        tx: &mut Transaction,
        entries: Vec<NewLedgerEntry>,
    ) -> LedgerResult<HashMap<Address, Decimal>> {
        self.ensure_enabled()?;

        let addresses: Vec<Address> = entries.iter().map(|e| e.address.clone()).collect();
        let mut running = self.fetch_balances(tx, &addresses, true).await?;

        for entry in entries {
            let delta = round_points(entry.delta);
            if delta.is_zero() {
                tracing::debug!(address = %entry.address, reason = %entry.reason, "Dropping zero-value ledger entry");
                continue;
            }

            let balance = running.entry(entry.address.clone()).or_insert(Decimal::ZERO);
            let balance_after = balance
                .checked_add(delta)
                .map(round_points)
                .ok_or_else(|| {
                    tracing::warn!(address = %entry.address, delta = %delta, "Ledger entry overflows the balance");
                    LedgerError::Overflow {
                        address: entry.address.to_string(),
                    }
                })?;
            tx.stage_entry(&entry.address, entry.reason, delta, balance_after, &entry.metadata)?;
            *balance = balance_after;

            tracing::debug!(
                address = %entry.address,
                reason = %entry.reason,
                delta = %delta,
                balance_after = %balance_after,
                "Ledger entry staged"
            );
        }

        Ok(running)
    }

    pub async fn debit(
        &self,
        address: &Address,
        amount: Decimal,
        reason: LedgerReason,
        metadata: serde_json::Value,
    ) -> LedgerResult<DebitReceipt> {
        self.ensure_enabled()?;
        let mut tx = self.db.begin();
        let receipt = self.debit_in(&mut tx, address, amount, reason, metadata).await?;
        tx.commit().await?;

        tracing::info!(
            address = %address,
            reason = %reason,
            amount = %amount,
            balance_after = %receipt.balance_after,
            "Debit committed"
        );
        Ok(receipt)
    }

    /// Debit inside `tx`. Fails without staging anything when `amount` is not
    /// positive or the balance does not cover it.
    pub async fn debit_in(
        &self,
        tx: &mut Transaction,
        address: &Address,
        amount: Decimal,
        reason: LedgerReason,
        metadata: serde_json::Value,
    ) -> LedgerResult<DebitReceipt> {
        self.ensure_enabled()?;
        let amount = round_points(amount);
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let balances = self.fetch_balances(tx, std::slice::from_ref(address), true).await?;
        let balance_before = balances.get(address).copied().unwrap_or(Decimal::ZERO);

        if !covers(balance_before, amount) {
            tracing::warn!(
                address = %address,
                required = %amount,
                available = %balance_before,
                "Debit rejected: insufficient balance"
            );
            return Err(LedgerError::InsufficientBalance {
                required: amount,
                available: balance_before,
            });
        }

        let entry = NewLedgerEntry::new(address.clone(), -amount, reason).with_metadata(metadata);
        let after = self.apply_entries_in(tx, vec![entry]).await?;
        let balance_after = after.get(address).copied().unwrap_or(balance_before);

        Ok(DebitReceipt {
            balance_before,
            balance_after,
        })
    }

    pub async fn history(&self, address: &Address) -> LedgerResult<Vec<LedgerEntry>> {
        Ok(self.db.ledger_history(address).await?)
    }

    /// Replay every delta for `address` in id order and compare against the
    /// stored `balance_after` values and the snapshot.
    pub async fn verify(&self, address: &Address) -> LedgerResult<LedgerAudit> {
        let history = self.history(address).await?;
        let mut replayed = Decimal::ZERO;
        let mut mismatched = Vec::new();
        for entry in &history {
            replayed = round_points(replayed + entry.delta);
            if replayed != entry.balance_after {
                mismatched.push(entry.id);
            }
        }

        let snapshot_balance = match self.db.balance_row(address).await? {
            Some(row) => row.into_snapshot()?.current_balance,
            None => Decimal::ZERO,
        };

        let audit = LedgerAudit {
            address: address.clone(),
            entry_count: history.len(),
            replayed_balance: replayed,
            snapshot_balance,
            mismatched_entry_ids: mismatched,
        };
        if !audit.is_consistent() {
            tracing::error!(
                address = %address,
                replayed = %audit.replayed_balance,
                snapshot = %audit.snapshot_balance,
                mismatched = audit.mismatched_entry_ids.len(),
                "Ledger audit found inconsistencies"
            );
        }
        Ok(audit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::LedgerEntryRow;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn address(byte: u8) -> Address {
        Address::parse(&bs58::encode([byte; 32]).into_string()).unwrap()
    }

    fn grant(address: &Address, amount: Decimal) -> NewLedgerEntry {
        NewLedgerEntry::new(address.clone(), amount, LedgerReason::RewardGrant)
    }

    #[tokio::test]
    async fn test_apply_folds_same_address_entries_in_order() {
        let ledger = RewardLedger::new(Database::in_memory().unwrap(), true);
        let a = address(1);
        let b = address(2);

        let balances = ledger
            .apply_entries(vec![grant(&a, dec!(10)), grant(&b, dec!(3)), grant(&a, dec!(-4.5))])
            .await
            .unwrap();

        assert_eq!(balances[&a], dec!(5.5));
        assert_eq!(balances[&b], dec!(3));

        let history = ledger.history(&a).await.unwrap();
        let after: Vec<_> = history.iter().map(|e| e.balance_after).collect();
        assert_eq!(after, vec![dec!(10), dec!(5.5)]);
    }

    #[tokio::test]
    async fn test_zero_deltas_are_dropped_but_address_is_reported() {
        let db = Database::in_memory().unwrap();
        let ledger = RewardLedger::new(db.clone(), true);
        let a = address(1);

        let balances = ledger.apply_entries(vec![grant(&a, dec!(0.0000001))]).await.unwrap();
        assert_eq!(balances[&a], Decimal::ZERO);
        assert_eq!(db.ledger_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_disabled_ledger_rejects_writes_but_allows_reads() {
        let db = Database::in_memory().unwrap();
        let enabled = RewardLedger::new(db.clone(), true);
        let disabled = RewardLedger::new(db.clone(), false);
        let a = address(1);

        enabled.apply_entries(vec![grant(&a, dec!(7))]).await.unwrap();

        assert!(matches!(
            disabled.apply_entries(vec![grant(&a, dec!(1))]).await,
            Err(LedgerError::Disabled)
        ));
        assert!(matches!(
            disabled.debit(&a, dec!(1), LedgerReason::RenameDebit, json!({})).await,
            Err(LedgerError::Disabled)
        ));
        let snapshots = disabled.fetch_reward_balances(&[a.clone()]).await.unwrap();
        assert_eq!(snapshots[&a].current_balance, dec!(7));
    }

    #[tokio::test]
    async fn test_unknown_addresses_resolve_to_zero() {
        let ledger = RewardLedger::new(Database::in_memory().unwrap(), true);
        let a = address(9);
        let snapshots = ledger.fetch_reward_balances(&[a.clone()]).await.unwrap();
        assert_eq!(snapshots[&a].current_balance, Decimal::ZERO);
        assert_eq!(snapshots[&a].updated_at, None);
    }

    #[tokio::test]
    async fn test_debit_rejects_overdraft_without_writing() {
        let db = Database::in_memory().unwrap();
        let ledger = RewardLedger::new(db.clone(), true);
        let a = address(1);
        ledger.apply_entries(vec![grant(&a, dec!(5))]).await.unwrap();

        let err = ledger
            .debit(&a, dec!(5.01), LedgerReason::RenameDebit, json!({"name": "blobby"}))
            .await
            .unwrap_err();
        match err {
            LedgerError::InsufficientBalance { required, available } => {
                assert_eq!(required, dec!(5.01));
                assert_eq!(available, dec!(5));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(db.ledger_len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_debit_within_epsilon_never_goes_negative() {
        let ledger = RewardLedger::new(Database::in_memory().unwrap(), true);
        let a = address(1);
        ledger.apply_entries(vec![grant(&a, dec!(4.999999))]).await.unwrap();

        let receipt = ledger
            .debit(&a, dec!(5), LedgerReason::RenameDebit, json!({}))
            .await
            .unwrap();
        assert_eq!(receipt.balance_before, dec!(4.999999));
        // Overdraft is bounded by the rounding tolerance
        assert!(receipt.balance_after >= -arena_core::POINT_EPSILON);
        assert_eq!(ledger.history(&a).await.unwrap().last().unwrap().balance_after, receipt.balance_after);
    }

    #[tokio::test]
    async fn test_overflowing_entries_are_refused_without_writing() {
        let db = Database::in_memory().unwrap();
        let ledger = RewardLedger::new(db.clone(), true);
        let a = address(1);

        let err = ledger
            .apply_entries(vec![grant(&a, Decimal::MAX), grant(&a, dec!(1))])
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Overflow { .. }));
        assert_eq!(db.ledger_len().await.unwrap(), 0);

        let snapshots = ledger.fetch_reward_balances(&[a.clone()]).await.unwrap();
        assert_eq!(snapshots[&a].current_balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_debit_refuses_non_positive_amounts() {
        let db = Database::in_memory().unwrap();
        let ledger = RewardLedger::new(db.clone(), true);
        let a = address(1);
        ledger.apply_entries(vec![grant(&a, dec!(10))]).await.unwrap();

        for amount in [dec!(-5), Decimal::ZERO, dec!(0.0000001)] {
            let err = ledger
                .debit(&a, amount, LedgerReason::RenameDebit, json!({}))
                .await
                .unwrap_err();
            assert!(matches!(err, LedgerError::InvalidAmount(_)), "amount {amount}");
        }
        assert_eq!(db.ledger_len().await.unwrap(), 1);
        assert_eq!(ledger.verify(&a).await.unwrap().replayed_balance, dec!(10));
    }

    #[tokio::test]
    async fn test_failed_commit_applies_nothing() {
        let db = Database::in_memory().unwrap();
        let ledger = RewardLedger::new(db.clone(), true);
        let a = address(1);
        let b = address(2);
        db.fail_next_commit();

        let result = ledger.apply_entries(vec![grant(&a, dec!(1)), grant(&b, dec!(2))]).await;
        assert!(matches!(result, Err(LedgerError::StorageFailure(_))));
        assert_eq!(db.ledger_len().await.unwrap(), 0);
        assert!(db.balance_row(&a).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replay_reproduces_every_balance_after() {
        let ledger = RewardLedger::new(Database::in_memory().unwrap(), true);
        let a = address(1);
        for delta in [dec!(12.5), dec!(-3.25), dec!(0.000001), dec!(100), dec!(-50.5)] {
            ledger.apply_entries(vec![grant(&a, delta)]).await.unwrap();
        }

        let audit = ledger.verify(&a).await.unwrap();
        assert!(audit.is_consistent());
        assert_eq!(audit.entry_count, 5);
        assert_eq!(audit.replayed_balance, dec!(58.750001));
    }

    #[tokio::test]
    async fn test_corrupt_latest_row_falls_back_to_delta_sum() {
        let db = Database::in_memory().unwrap();
        let ledger = RewardLedger::new(db.clone(), true);
        let a = address(1);
        ledger.apply_entries(vec![grant(&a, dec!(10))]).await.unwrap();
        db.insert_raw_entry(LedgerEntryRow {
            id: 0,
            address: a.to_string(),
            reason: "admin_adjustment".to_string(),
            delta: "2".to_string(),
            balance_after: "NaN".to_string(),
            created_at: 0,
            metadata: "null".to_string(),
        })
        .await
        .unwrap();

        let snapshots = ledger.fetch_reward_balances(&[a.clone()]).await.unwrap();
        assert_eq!(snapshots[&a].current_balance, dec!(12));

        let balances = ledger.apply_entries(vec![grant(&a, dec!(1))]).await.unwrap();
        assert_eq!(balances[&a], dec!(13));
    }

    #[tokio::test]
    async fn test_concurrent_debits_serialize_on_the_row_lock() {
        let ledger = RewardLedger::new(Database::in_memory().unwrap(), true);
        let a = address(1);
        ledger.apply_entries(vec![grant(&a, dec!(10))]).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..5 {
            let ledger = ledger.clone();
            let a = a.clone();
            handles.push(tokio::spawn(async move {
                ledger.debit(&a, dec!(3), LedgerReason::RenameDebit, json!({})).await
            }));
        }

        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                succeeded += 1;
            }
        }

        assert_eq!(succeeded, 3);
        let audit = ledger.verify(&a).await.unwrap();
        assert!(audit.is_consistent());
        assert_eq!(audit.replayed_balance, dec!(1));
    }
}
