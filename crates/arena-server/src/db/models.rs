//! Storage rows and the conversions between rows and domain types.
//!
//! Decimal values are stored as TEXT and timestamps as epoch millis, so every
//! read goes through a parse that can report a corrupt row.

use std::str::FromStr;

use arena_core::{
    Address, BalanceSnapshot, BattleResult, CareState, LedgerEntry, LedgerReason, StorageError,
};
use chrono::{DateTime, Utc};
use rusqlite::Row;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntryRow {
    pub id: i64,
    pub address: String,
    pub reason: String,
    pub delta: String,
    pub balance_after: String,
    pub created_at: i64,
    pub metadata: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceRow {
    pub address: String,
    pub current_balance: String,
    pub updated_at: i64,
}

/// Care state is kept as an opaque JSON blob in storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CareStateRow {
    pub address: String,
    pub state: String,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobletRow {
    pub address: String,
    pub is_alive: bool,
    pub is_newcomer: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadoutRow {
    pub address: String,
    pub weapon_item_id: Option<i64>,
    pub shield_item_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleRow {
    pub battle_id: String,
    pub attacker: String,
    pub defender: String,
    pub result: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairCooldownRow {
    pub address: String,
    pub opponent: String,
    pub until: i64,
}

impl LedgerEntryRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            address: row.get("address")?,
            reason: row.get("reason")?,
            delta: row.get("delta")?,
            balance_after: row.get("balance_after")?,
            created_at: row.get("created_at")?,
            metadata: row.get("metadata")?,
        })
    }
}

impl BalanceRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            address: row.get("address")?,
            current_balance: row.get("current_balance")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

impl BlobletRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            address: row.get("address")?,
            is_alive: row.get("is_alive")?,
            is_newcomer: row.get("is_newcomer")?,
        })
    }
}

impl LoadoutRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            address: row.get("address")?,
            weapon_item_id: row.get("weapon_item_id")?,
            shield_item_id: row.get("shield_item_id")?,
        })
    }
}

pub(crate) fn parse_decimal(table: &'static str, value: &str) -> Result<Decimal, StorageError> {
    Decimal::from_str(value).map_err(|e| StorageError::Corrupt {
        table,
        detail: format!("bad decimal {:?}: {}", value, e),
    })
}

pub(crate) fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

fn parse_address(table: &'static str, value: &str) -> Result<Address, StorageError> {
    Address::parse(value).map_err(|e| StorageError::Corrupt {
        table,
        detail: e.to_string(),
    })
}

impl LedgerEntryRow {
    pub fn into_entry(self) -> Result<LedgerEntry, StorageError> {
        let reason = LedgerReason::from_str(&self.reason).ok_or_else(|| StorageError::Corrupt {
            table: "ledger_entries",
            detail: format!("unknown reason {:?}", self.reason),
        })?;

        Ok(LedgerEntry {
            id: self.id,
            address: parse_address("ledger_entries", &self.address)?,
            reason,
            delta: parse_decimal("ledger_entries", &self.delta)?,
            balance_after: parse_decimal("ledger_entries", &self.balance_after)?,
            created_at: millis_to_datetime(self.created_at),
            metadata: serde_json::from_str(&self.metadata)?,
        })
    }
}

impl BalanceRow {
    pub fn into_snapshot(self) -> Result<BalanceSnapshot, StorageError> {
        Ok(BalanceSnapshot {
            address: parse_address("balances", &self.address)?,
            current_balance: parse_decimal("balances", &self.current_balance)?,
            updated_at: Some(millis_to_datetime(self.updated_at)),
        })
    }
}

impl CareStateRow {
    pub fn new(address: &Address, state: &CareState, now: DateTime<Utc>) -> Result<Self, StorageError> {
        Ok(Self {
            address: address.to_string(),
            state: serde_json::to_string(state)?,
            updated_at: now.timestamp_millis(),
        })
    }

    pub fn decode(&self) -> Result<CareState, StorageError> {
        Ok(serde_json::from_str(&self.state)?)
    }
}

impl BattleRow {
    pub fn new(result: &BattleResult) -> Result<Self, StorageError> {
        Ok(Self {
            battle_id: result.battle_id.to_string(),
            attacker: result.attacker.address.to_string(),
            defender: result.defender.address.to_string(),
            result: serde_json::to_string(result)?,
            created_at: result.created_at.timestamp_millis(),
        })
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_care_state_blob_round_trip_keeps_camel_case_keys() {
        let address = Address::parse("0x00000000000000000000000000000000000000aa").unwrap();
        let mut state = CareState::default();
        state.fast_forward_bursts_used = 2;
        let row = CareStateRow::new(&address, &state, Utc::now()).unwrap();

        assert!(row.state.contains("\"fastForwardBurstsUsed\":2"));
        assert_eq!(row.decode().unwrap(), state);
    }

    #[test]
    fn test_unknown_reason_is_corrupt() {
        let row = LedgerEntryRow {
            id: 1,
            address: "0x00000000000000000000000000000000000000aa".to_string(),
            reason: "battle_wni".to_string(),
            delta: "1".to_string(),
            balance_after: "1".to_string(),
            created_at: 0,
            metadata: "null".to_string(),
        };
        assert!(matches!(row.into_entry(), Err(StorageError::Corrupt { .. })));
    }
}
