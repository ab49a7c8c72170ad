//! Combat resolution
//!
//! Pure battle math. Given both sides' stats, balances and a fixed set of
//! random draws, [`resolve`] always produces the same outcome, which is what
//! makes a stored battle replayable.
//!
//! Draws are uniform values in `[0, 1)` and are consumed in a fixed order:
//! attacker luck, defender luck, critical, weapon loot, shield loot.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{
    Address, BattleDraws, BattleResult, ItemType, LedgerReason, Loadout, NewLedgerEntry, Side,
    TransferBreakdown,
};
use crate::money::round_points;

/// Tunables for battles. Probabilities and rates are fractions in `0..=1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BattleRules {
    /// Both sides need at least this many points to fight.
    pub min_stake: Decimal,
    /// Luck moves a roll at most this far either side of its base.
    pub luck_band: Decimal,
    pub booster_bonus_per_level: Decimal,
    pub critical_chance: Decimal,
    pub transfer_rate: Decimal,
    pub critical_transfer_rate: Decimal,
    /// Share of the transfer kept by the treasury.
    pub house_cut_rate: Decimal,
    pub loot_chance: Decimal,
    pub critical_loot_chance: Decimal,
    pub pair_cooldown_secs: i64,
}

impl Default for BattleRules {
    fn default() -> Self {
        Self {
            min_stake: Decimal::new(10, 0),
            luck_band: Decimal::new(5, 0),
            booster_bonus_per_level: Decimal::ONE,
            critical_chance: Decimal::new(10, 2),
            transfer_rate: Decimal::new(10, 2),
            critical_transfer_rate: Decimal::new(20, 2),
            house_cut_rate: Decimal::new(10, 2),
            loot_chance: Decimal::new(15, 2),
            critical_loot_chance: Decimal::new(35, 2),
            pair_cooldown_secs: 10 * 60,
        }
    }
}

/// Everything the resolver needs to know about one side.
#[derive(Debug, Clone, PartialEq)]
pub struct CombatSide {
    pub address: Address,
    /// Weapon `op` for the attacker, shield `dp` for the defender.
    pub base: Decimal,
    pub booster_level: u8,
    pub balance: Decimal,
    pub loadout: Loadout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roll {
    pub base: Decimal,
    pub roll: Decimal,
    pub booster_bonus: Decimal,
    pub total: Decimal,
}

/// A loot transfer decided by the resolver, before it is applied to storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LootDecision {
    pub slot: ItemType,
    pub item_id: i64,
    pub equipped: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombatOutcome {
    pub winner: Side,
    pub critical: bool,
    pub attacker: Roll,
    pub defender: Roll,
    pub transfer: TransferBreakdown,
    pub loot: Vec<LootDecision>,
}

impl CombatOutcome {
    pub fn loser(&self) -> Side {
        match self.winner {
            Side::Attacker => Side::Defender,
            Side::Defender => Side::Attacker,
        }
    }
}

fn roll_for(base: Decimal, luck_draw: Decimal, booster_level: u8, rules: &BattleRules) -> Roll {
    let luck = (luck_draw * Decimal::TWO - Decimal::ONE) * rules.luck_band;
    let roll = round_points(base + luck);
    let booster_bonus = round_points(Decimal::from(booster_level) * rules.booster_bonus_per_level);
    Roll {
        base,
        roll,
        booster_bonus,
        total: roll + booster_bonus,
    }
}

/// Split `loser_balance` into what the winner gains and what the house keeps.
pub fn compute_transfer(loser_balance: Decimal, critical: bool, rules: &BattleRules) -> TransferBreakdown {
    let rate = if critical {
        rules.critical_transfer_rate
    } else {
        rules.transfer_rate
    };
    let transfer = round_points(loser_balance.max(Decimal::ZERO) * rate);
    let house = round_points(transfer * rules.house_cut_rate);
    TransferBreakdown {
        transfer,
        house,
        winner_gain: transfer - house,
    }
}

/// Resolve a battle.
///
/// Equal totals go to the defender. That tie-break is a product rule, not a
/// side effect of the comparison.
pub fn resolve(
    attacker: &CombatSide,
    defender: &CombatSide,
    draws: &BattleDraws,
    rules: &BattleRules,
) -> CombatOutcome {
    let attacker_roll = roll_for(attacker.base, draws.attacker_luck, attacker.booster_level, rules);
    let defender_roll = roll_for(defender.base, draws.defender_luck, defender.booster_level, rules);

    let winner = if attacker_roll.total > defender_roll.total {
        Side::Attacker
    } else {
        Side::Defender
    };
    let critical = draws.critical < rules.critical_chance;

    let (winning, losing) = match winner {
        Side::Attacker => (attacker, defender),
        Side::Defender => (defender, attacker),
    };

    let transfer = compute_transfer(losing.balance, critical, rules);

    let loot_chance = if critical {
        rules.critical_loot_chance
    } else {
        rules.loot_chance
    };
    let mut loot = Vec::new();
    for (slot, draw) in [
        (ItemType::Weapon, draws.weapon_loot),
        (ItemType::Shield, draws.shield_loot),
    ] {
        if let Some(item_id) = losing.loadout.slot(slot) {
            if draw < loot_chance {
                loot.push(LootDecision {
                    slot,
                    item_id,
                    equipped: winning.loadout.slot(slot).is_none(),
                });
            }
        }
    }

    CombatOutcome {
        winner,
        critical,
        attacker: attacker_roll,
        defender: defender_roll,
        transfer,
        loot,
    }
}

/// Ledger entries for a battle, in commit order: win, loss, treasury cut.
pub fn battle_ledger_entries(
    winner: &Address,
    loser: &Address,
    treasury: &Address,
    transfer: &TransferBreakdown,
    metadata: serde_json::Value,
) -> Vec<NewLedgerEntry> {
    vec![
        NewLedgerEntry::new(winner.clone(), transfer.winner_gain, LedgerReason::BattleWin)
            .with_metadata(metadata.clone()),
        NewLedgerEntry::new(loser.clone(), -transfer.transfer, LedgerReason::BattleLoss)
            .with_metadata(metadata.clone()),
        NewLedgerEntry::new(treasury.clone(), transfer.house, LedgerReason::TreasuryCut)
            .with_metadata(metadata),
    ]
}

/// Recompute a stored battle from its recorded inputs, draws and rules and
/// check that the result still matches.
pub fn replay(result: &BattleResult) -> bool {
    let rules = &result.rules;
    let side = |c: &crate::models::Combatant| CombatSide {
        address: c.address.clone(),
        base: c.base,
        booster_level: c.booster,
        balance: c.points_before,
        loadout: c.loadout,
    };
    let outcome = resolve(&side(&result.attacker), &side(&result.defender), &result.draws, rules);

    outcome.winner == result.winner
        && outcome.critical == result.critical
        && outcome.attacker.total == result.attacker.total
        && outcome.defender.total == result.defender.total
        && outcome.transfer == result.transfer
        && outcome.loot.len() == result.loot.len()
        && outcome
            .loot
            .iter()
            .zip(&result.loot)
            .all(|(a, b)| a.slot == b.slot && a.item_id == b.item_id && a.equipped == b.equipped)
}
