//! Charge (energize) handling on top of the pure care state machine.

use arena_core::{
    build_status, Address, CareError, CareResult, CareRules, CareState, ChargeStatus, LedgerReason,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;

use crate::db::{Database, Transaction};
use crate::ledger::RewardLedger;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeOutcome {
    pub state: CareState,
    pub status: ChargeStatus,
    pub cost: Decimal,
    /// Balance after the charge debit, when the charge cost anything.
    pub balance_after: Option<Decimal>,
}

#[derive(Clone)]
pub struct CareService {
    db: Database,
    ledger: RewardLedger,
    rules: CareRules,
}

impl CareService {
    pub fn new(db: Database, ledger: RewardLedger, rules: CareRules) -> Self {
        Self { db, ledger, rules }
    }

    pub async fn build_charge_status(&self, address: &Address, now: DateTime<Utc>) -> CareResult<ChargeStatus> {
        let bloblet = self
            .db
            .bloblet(address)
            .await?
            .ok_or_else(|| CareError::BlobletNotFound(address.to_string()))?;
        let state = self.db.care_state(address).await?.unwrap_or_default();
        Ok(build_status(&state, now, &self.rules, bloblet.is_newcomer))
    }

    /// Lock the bloblet's row and load its care state.
    async fn open(&self, address: &Address) -> CareResult<(Transaction, CareState, bool)> {
        let mut tx = self.db.begin();
        tx.lock_rows(std::slice::from_ref(address)).await;

        let bloblet = tx
            .bloblet(address)
            .await?
            .ok_or_else(|| CareError::BlobletNotFound(address.to_string()))?;
        if !bloblet.is_alive {
            return Err(CareError::BlobletDead(address.to_string()));
        }
        let state = tx.care_state(address).await?.unwrap_or_default();
        Ok((tx, state, bloblet.is_newcomer))
    }

    pub async fn charge(&self, address: &Address, now: DateTime<Utc>) -> CareResult<ChargeOutcome> {
        let (mut tx, mut state, is_newcomer) = self.open(address).await?;

        let status = build_status(&state, now, &self.rules, is_newcomer);
        if status.cooldown_active || status.booster_active {
            let ready_at = status
                .cooldown_ends_at
                .into_iter()
                .chain(status.boosters_active_until)
                .max()
                .unwrap_or(now);
            tracing::info!(address = %address, ready_at = %ready_at, "Charge rejected: cooldown active");
            return Err(CareError::ChargeCooldown { ready_at });
        }

        let cost = self.rules.charge_cost;
        let balance_after = if cost > Decimal::ZERO {
            let receipt = self
                .ledger
                .debit_in(&mut tx, address, cost, LedgerReason::ChargeDebit, json!({ "chargedAt": now }))
                .await?;
            Some(receipt.balance_after)
        } else {
            None
        };

        state.apply_charge(now, &self.rules);
        tx.put_care_state(address, &state, now)?;
        tx.commit().await?;

        tracing::info!(
            address = %address,
            cost = %cost,
            cooldown_ends_at = ?state.cooldown_ends_at,
            boosters_active_until = ?state.boosters_active_until,
            "Bloblet charged"
        );

        let status = build_status(&state, now, &self.rules, is_newcomer);
        Ok(ChargeOutcome {
            state,
            status,
            cost,
            balance_after,
        })
    }

    /// Spend one of today's bursts to end the current cooldown early.
    pub async fn fast_forward(&self, address: &Address, now: DateTime<Utc>) -> CareResult<ChargeStatus> {
        let (mut tx, mut state, is_newcomer) = self.open(address).await?;

        if !state.fast_forward_eligible(now, &self.rules, is_newcomer) {
            return Err(CareError::FastForwardUnavailable("not eligible"));
        }
        if !state.cooldown_ends_at.is_some_and(|end| end > now) {
            return Err(CareError::FastForwardUnavailable("no cooldown to skip"));
        }

        state.apply_fast_forward(now, &self.rules);
        tx.put_care_state(address, &state, now)?;
        tx.commit().await?;

        let status = build_status(&state, now, &self.rules, is_newcomer);
        tracing::info!(
            address = %address,
            bursts_remaining = status.fast_forward_bursts_remaining,
            "Cooldown fast-forwarded"
        );
        Ok(status)
    }

    /// Block charging and fast-forwarding until `until`. Abuse prevention
    /// calls this; the debt survives charges while it is in the future.
    pub async fn impose_fast_forward_debt(
        &self,
        address: &Address,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> CareResult<CareState> {
        let (mut tx, mut state, _) = self.open(address).await?;
        state.fast_forward_debt_until = Some(until);
        tx.put_care_state(address, &state, now)?;
        tx.commit().await?;

        tracing::warn!(address = %address, until = %until, "Fast-forward debt imposed");
        Ok(state)
    }
}
