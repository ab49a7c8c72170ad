//! Domain models shared by the ledger, the care state machine and the battle
//! resolver.
//!
//! These are the in-memory shapes. Storage rows live in the server crate and
//! convert into these types at the storage edge.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::combat::BattleRules;
use crate::error::AddressError;

// =============================================================================
// Address
// =============================================================================

/// Canonical wallet identifier, the primary key across every table.
///
/// EVM addresses (`0x` + 40 hex digits) are case-insensitive and are stored
/// lower-cased. Solana addresses are base58 and case-sensitive, so they are
/// only validated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AddressError::Empty);
        }

        if let Some(hex) = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            if hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
                return Ok(Address(format!("0x{}", hex.to_ascii_lowercase())));
            }
            return Err(AddressError::Malformed(trimmed.to_string()));
        }

        if is_solana_address(trimmed) {
            return Ok(Address(trimmed.to_string()));
        }

        Err(AddressError::Malformed(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_solana_address(address: &str) -> bool {
    if address.len() < 32 || address.len() > 44 {
        return false;
    }
    matches!(bs58::decode(address).into_vec(), Ok(bytes) if bytes.len() == 32)
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Address::parse(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

// =============================================================================
// Ledger
// =============================================================================

/// Why a ledger entry exists. Closed so a typo cannot invent a new reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerReason {
    BattleWin,
    BattleLoss,
    TreasuryCut,
    RenameDebit,
    ChargeDebit,
    RewardGrant,
    AdminAdjustment,
}

impl fmt::Display for LedgerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerReason::BattleWin => write!(f, "battle_win"),
            LedgerReason::BattleLoss => write!(f, "battle_loss"),
            LedgerReason::TreasuryCut => write!(f, "treasury_cut"),
            LedgerReason::RenameDebit => write!(f, "rename_debit"),
            LedgerReason::ChargeDebit => write!(f, "charge_debit"),
            LedgerReason::RewardGrant => write!(f, "reward_grant"),
            LedgerReason::AdminAdjustment => write!(f, "admin_adjustment"),
        }
    }
}

impl LedgerReason {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "battle_win" => Some(LedgerReason::BattleWin),
            "battle_loss" => Some(LedgerReason::BattleLoss),
            "treasury_cut" => Some(LedgerReason::TreasuryCut),
            "rename_debit" => Some(LedgerReason::RenameDebit),
            "charge_debit" => Some(LedgerReason::ChargeDebit),
            "reward_grant" => Some(LedgerReason::RewardGrant),
            "admin_adjustment" => Some(LedgerReason::AdminAdjustment),
            _ => None,
        }
    }
}

/// A requested balance change, before the ledger has assigned it a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLedgerEntry {
    pub address: Address,
    pub delta: Decimal,
    pub reason: LedgerReason,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl NewLedgerEntry {
    pub fn new(address: Address, delta: Decimal, reason: LedgerReason) -> Self {
        Self {
            address,
            delta,
            reason,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// An appended, immutable ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub address: Address,
    pub reason: LedgerReason,
    pub delta: Decimal,
    pub balance_after: Decimal,
    pub created_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

/// Cached current balance for an address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub address: Address,
    pub current_balance: Decimal,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Balances either side of a debit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DebitReceipt {
    pub balance_before: Decimal,
    pub balance_after: Decimal,
}

/// Result of replaying an address's history against its stored balances.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerAudit {
    pub address: Address,
    pub entry_count: usize,
    pub replayed_balance: Decimal,
    pub snapshot_balance: Decimal,
    /// Ids whose stored `balance_after` disagrees with the replay.
    pub mismatched_entry_ids: Vec<i64>,
}

impl LedgerAudit {
    pub fn is_consistent(&self) -> bool {
        self.mismatched_entry_ids.is_empty() && self.replayed_balance == self.snapshot_balance
    }
}

// =============================================================================
// Identity and loadouts
// =============================================================================

/// Identity row consulted as the liveness oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bloblet {
    pub address: Address,
    pub is_alive: bool,
    pub is_newcomer: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Weapon,
    Shield,
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemType::Weapon => write!(f, "weapon"),
            ItemType::Shield => write!(f, "shield"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rarity {
    Common,
    Rare,
    Epic,
    Legendary,
}

/// Catalog reference data. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadoutItem {
    pub id: i64,
    pub slug: String,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub rarity: Rarity,
    /// Offense power
    pub op: Decimal,
    /// Defense power
    pub dp: Decimal,
    pub icon: String,
}

/// Equipped items for a wallet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loadout {
    pub weapon_item_id: Option<i64>,
    pub shield_item_id: Option<i64>,
}

impl Loadout {
    pub fn slot(&self, slot: ItemType) -> Option<i64> {
        match slot {
            ItemType::Weapon => self.weapon_item_id,
            ItemType::Shield => self.shield_item_id,
        }
    }

    pub fn set_slot(&mut self, slot: ItemType, item_id: Option<i64>) {
        match slot {
            ItemType::Weapon => self.weapon_item_id = item_id,
            ItemType::Shield => self.shield_item_id = item_id,
        }
    }
}

// =============================================================================
// Battle
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Attacker,
    Defender,
}

/// One side of a committed battle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Combatant {
    pub address: Address,
    pub booster: u8,
    pub base: Decimal,
    pub roll: Decimal,
    pub total: Decimal,
    pub points_before: Decimal,
    pub points_after: Decimal,
    pub loadout: Loadout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferBreakdown {
    pub transfer: Decimal,
    pub house: Decimal,
    pub winner_gain: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LootDrop {
    pub slot: ItemType,
    pub item_id: i64,
    pub from: Address,
    pub to: Address,
    /// False when the winner already had that slot filled and the item went
    /// to inventory instead.
    pub equipped: bool,
}

/// The random draws a battle consumed, in the order they were taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BattleDraws {
    pub attacker_luck: Decimal,
    pub defender_luck: Decimal,
    pub critical: Decimal,
    pub weapon_loot: Decimal,
    pub shield_loot: Decimal,
}

/// Persisted outcome of one battle. Never mutated after commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BattleResult {
    pub battle_id: Uuid,
    pub winner: Side,
    pub critical: bool,
    pub attacker: Combatant,
    pub defender: Combatant,
    pub transfer: TransferBreakdown,
    pub loot: Vec<LootDrop>,
    pub draws: BattleDraws,
    /// Rules the battle was resolved under, so replay survives rule changes.
    pub rules: BattleRules,
    pub cooldown_until: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl BattleResult {
    pub fn winner_address(&self) -> &Address {
        match self.winner {
            Side::Attacker => &self.attacker.address,
            Side::Defender => &self.defender.address,
        }
    }

    pub fn loser_address(&self) -> &Address {
        match self.winner {
            Side::Attacker => &self.defender.address,
            Side::Defender => &self.attacker.address,
        }
    }
}
