use arena_core::{Address, LedgerAudit, LedgerEntry, Loadout, LoadoutItem};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ============================================================================
// GET /health
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: String,
    pub ledger_enabled: bool,
}

// ============================================================================
// GET /api/v1/balances?addresses=a,b
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct BalancesQuery {
    /// Comma-separated wallet addresses.
    pub addresses: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceDto {
    pub address: Address,
    pub balance: Decimal,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct BalancesResponse {
    pub balances: Vec<BalanceDto>,
}

// ============================================================================
// POST /api/v1/ledger/entries, POST /api/v1/ledger/debit
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LedgerEntryRequest {
    pub address: String,
    pub delta: Decimal,
    pub reason: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct ApplyEntriesRequest {
    pub entries: Vec<LedgerEntryRequest>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyEntriesResponse {
    pub balances: Vec<BalanceDto>,
}

#[derive(Debug, Deserialize)]
pub struct DebitRequest {
    pub address: String,
    pub amount: Decimal,
    pub reason: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

// ============================================================================
// GET /api/v1/ledger/{address}
// ============================================================================

#[derive(Debug, Serialize)]
pub struct LedgerHistoryResponse {
    pub address: Address,
    pub entries: Vec<LedgerEntry>,
    pub audit: LedgerAudit,
}

// ============================================================================
// PUT /api/v1/bloblets/{address}
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertBlobletRequest {
    pub is_alive: bool,
    #[serde(default)]
    pub is_newcomer: bool,
}

// ============================================================================
// GET /api/v1/bloblets/{address}/loadout
// ============================================================================

#[derive(Debug, Serialize)]
pub struct LoadoutResponse {
    pub address: Address,
    pub loadout: Loadout,
    pub weapon: Option<LoadoutItem>,
    pub shield: Option<LoadoutItem>,
    pub inventory: Vec<LoadoutItem>,
}

// ============================================================================
// POST /api/v1/bloblets/{address}/fast-forward-debt
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct FastForwardDebtRequest {
    pub until: DateTime<Utc>,
}

// ============================================================================
// POST /api/v1/battles
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct BattleRequest {
    pub attacker: String,
    pub defender: String,
}

// ============================================================================
// GET /api/v1/rules
// ============================================================================

#[derive(Debug, Serialize)]
pub struct RulesResponse {
    pub care: arena_core::CareRules,
    pub battle: arena_core::BattleRules,
}
