//! Error types for Arena Core

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Address is empty")]
    Empty,

    #[error("Malformed address: {0}")]
    Malformed(String),
}

/// Failures of the backing store. Always fatal to the calling operation.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Corrupt row in {table}: {detail}")]
    Corrupt { table: &'static str, detail: String },

    #[error("Commit failed: {0}")]
    CommitFailed(String),

    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Reward ledger is disabled")]
    Disabled,

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: Decimal, available: Decimal },

    #[error("Amount must be positive, got {0}")]
    InvalidAmount(Decimal),

    #[error("Balance of {address} out of range")]
    Overflow { address: String },

    #[error("Ledger storage failure: {0}")]
    StorageFailure(#[from] StorageError),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Error, Debug)]
pub enum CareError {
    #[error("Charge is on cooldown until {ready_at}")]
    ChargeCooldown { ready_at: DateTime<Utc> },

    #[error("Bloblet not found: {0}")]
    BlobletNotFound(String),

    #[error("Bloblet is dead: {0}")]
    BlobletDead(String),

    #[error("Fast-forward unavailable: {0}")]
    FastForwardUnavailable(&'static str),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Care storage failure: {0}")]
    Storage(#[from] StorageError),
}

pub type CareResult<T> = Result<T, CareError>;

/// Whether the caller can fix a rejection or should simply try again later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    ClientFixable,
    Transient,
}

/// Why a battle was refused before anything was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BattleErrorKind {
    AttackerDead,
    DefenderDead,
    AttackerOverdue,
    AttackerBalanceLow,
    DefenderBalanceLow,
    PairCooldown,
    SameWallet,
}

impl BattleErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            BattleErrorKind::AttackerDead => "attacker_dead",
            BattleErrorKind::DefenderDead => "defender_dead",
            BattleErrorKind::AttackerOverdue => "attacker_overdue",
            BattleErrorKind::AttackerBalanceLow => "attacker_balance_low",
            BattleErrorKind::DefenderBalanceLow => "defender_balance_low",
            BattleErrorKind::PairCooldown => "pair_cooldown",
            BattleErrorKind::SameWallet => "same_wallet",
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            // Waiting out the pair cooldown fixes itself.
            BattleErrorKind::PairCooldown => ErrorClass::Transient,
            _ => ErrorClass::ClientFixable,
        }
    }
}

impl fmt::Display for BattleErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Error, Debug)]
pub enum BattleError {
    #[error("Battle rejected: {kind}")]
    Rejected {
        kind: BattleErrorKind,
        details: Option<serde_json::Value>,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Battle storage failure: {0}")]
    Storage(#[from] StorageError),
}

impl BattleError {
    pub fn rejected(kind: BattleErrorKind) -> Self {
        BattleError::Rejected { kind, details: None }
    }

    pub fn rejected_with(kind: BattleErrorKind, details: serde_json::Value) -> Self {
        BattleError::Rejected {
            kind,
            details: Some(details),
        }
    }

    /// The rejection kind, if this is a precondition failure.
    pub fn kind(&self) -> Option<BattleErrorKind> {
        match self {
            BattleError::Rejected { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

pub type BattleRunResult<T> = Result<T, BattleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_battle_error_codes_are_stable() {
        assert_eq!(BattleErrorKind::AttackerBalanceLow.code(), "attacker_balance_low");
        assert_eq!(BattleErrorKind::DefenderDead.to_string(), "defender_dead");
        assert_eq!(
            serde_json::to_value(BattleErrorKind::AttackerOverdue).unwrap(),
            serde_json::json!("attacker_overdue")
        );
    }

    #[test]
    fn test_only_pair_cooldown_is_transient() {
        assert_eq!(BattleErrorKind::PairCooldown.class(), ErrorClass::Transient);
        assert_eq!(BattleErrorKind::AttackerOverdue.class(), ErrorClass::ClientFixable);
    }
}
