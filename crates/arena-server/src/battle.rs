//! Battle resolver
//!
//! Validates both wallets under their row locks, resolves the fight from a
//! fresh set of draws and commits ledger entries, loot, the battle row and the
//! pair cooldowns in one transaction. A caller blocked on another battle's
//! locks re-reads everything once it gets them.

use std::sync::Arc;
use std::time::Instant;

use arena_core::{
    battle_ledger_entries, build_status, resolve, Address, BattleError, BattleErrorKind, BattleResult,
    BattleRules, BattleRunResult, CareRules, CombatSide, Combatant, Loadout, LootDrop,
    Side,
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::catalog::LoadoutCatalog;
use crate::db::{Database, Transaction};
use crate::ledger::RewardLedger;
use crate::rng::{take_draws, BattleRng};

#[derive(Clone)]
pub struct BattleResolver {
    db: Database,
    ledger: RewardLedger,
    catalog: LoadoutCatalog,
    care_rules: CareRules,
    rules: BattleRules,
    treasury: Address,
    rng: Arc<Mutex<Box<dyn BattleRng>>>,
}

/// Per-side state read under lock.
struct Contender {
    address: Address,
    booster_level: u8,
    balance: Decimal,
    loadout: Loadout,
}

impl BattleResolver {
    pub fn new(
        db: Database,
        ledger: RewardLedger,
        catalog: LoadoutCatalog,
        care_rules: CareRules,
        rules: BattleRules,
        treasury: Address,
        rng: Box<dyn BattleRng>,
    ) -> Self {
        Self {
            db,
            ledger,
            catalog,
            care_rules,
            rules,
            treasury,
            rng: Arc::new(Mutex::new(rng)),
        }
    }

    pub async fn run_battle(&self, attacker: &Address, defender: &Address) -> BattleRunResult<BattleResult> {
        self.run_battle_at(attacker, defender, Utc::now()).await
    }

    pub async fn run_battle_at(
        &self,
        attacker: &Address,
        defender: &Address,
        now: DateTime<Utc>,
    ) -> BattleRunResult<BattleResult> {
        let start = Instant::now();
        tracing::info!(attacker = %attacker, defender = %defender, "Battle requested");

        if attacker == defender {
            return Err(BattleError::rejected(BattleErrorKind::SameWallet));
        }
        self.ledger.ensure_enabled()?;

        let mut tx = self.db.begin();
        tx.lock_rows(&[attacker.clone(), defender.clone(), self.treasury.clone()])
            .await;

        let (attacker_state, defender_state) = self.validate(&mut tx, attacker, defender, now).await?;

        let attacker_side = CombatSide {
            address: attacker_state.address.clone(),
            base: self.catalog.attack_power(&attacker_state.loadout),
            booster_level: attacker_state.booster_level,
            balance: attacker_state.balance,
            loadout: attacker_state.loadout,
        };
        let defender_side = CombatSide {
            address: defender_state.address.clone(),
            base: self.catalog.defense_power(&defender_state.loadout),
            booster_level: defender_state.booster_level,
            balance: defender_state.balance,
            loadout: defender_state.loadout,
        };

        let draws = {
            let mut rng = self.rng.lock().await;
            take_draws(&mut **rng)
        };
        let outcome = resolve(&attacker_side, &defender_side, &draws, &self.rules);

        let battle_id = Uuid::new_v4();
        let (winner, loser) = match outcome.winner {
            Side::Attacker => (&attacker_side, &defender_side),
            Side::Defender => (&defender_side, &attacker_side),
        };

        let metadata = json!({
            "battleId": battle_id,
            "attacker": attacker,
            "defender": defender,
            "critical": outcome.critical,
        });
        let entries = battle_ledger_entries(
            &winner.address,
            &loser.address,
            &self.treasury,
            &outcome.transfer,
            metadata,
        );
        let balances = self.ledger.apply_entries_in(&mut tx, entries).await?;

        let loot = self.apply_loot(&mut tx, winner, loser, &outcome.loot);

        let combatant = |side: &CombatSide, roll: &arena_core::Roll| Combatant {
            address: side.address.clone(),
            booster: side.booster_level,
            base: roll.base,
            roll: roll.roll,
            total: roll.total,
            points_before: side.balance,
            points_after: balances.get(&side.address).copied().unwrap_or(side.balance),
            loadout: side.loadout,
        };

        let cooldown_until = now + Duration::seconds(self.rules.pair_cooldown_secs);
        let result = BattleResult {
            battle_id,
            winner: outcome.winner,
            critical: outcome.critical,
            attacker: combatant(&attacker_side, &outcome.attacker),
            defender: combatant(&defender_side, &outcome.defender),
            transfer: outcome.transfer,
            loot,
            draws,
            rules: self.rules.clone(),
            cooldown_until,
            created_at: now,
        };

        tx.insert_battle(&result)?;
        tx.insert_pair_cooldown(attacker, defender, cooldown_until);
        tx.insert_pair_cooldown(defender, attacker, cooldown_until);
        tx.commit().await?;

        tracing::info!(
            battle_id = %battle_id,
            winner = ?result.winner,
            critical = result.critical,
            transfer = %result.transfer.transfer,
            house = %result.transfer.house,
            loot_count = result.loot.len(),
            duration_ms = %start.elapsed().as_millis(),
            "Battle committed"
        );

        Ok(result)
    }

    /// Check every precondition under lock. Nothing is staged on failure.
    async fn validate(
        &self,
        tx: &mut Transaction,
        attacker: &Address,
        defender: &Address,
        now: DateTime<Utc>,
    ) -> BattleRunResult<(Contender, Contender)> {
        let attacker_bloblet = tx.bloblet(attacker).await?.filter(|b| b.is_alive);
        let Some(attacker_bloblet) = attacker_bloblet else {
            return Err(self.reject(BattleErrorKind::AttackerDead, attacker));
        };
        let defender_bloblet = tx.bloblet(defender).await?.filter(|b| b.is_alive);
        let Some(defender_bloblet) = defender_bloblet else {
            return Err(self.reject(BattleErrorKind::DefenderDead, defender));
        };

        let attacker_status = build_status(
            &tx.care_state(attacker).await?.unwrap_or_default(),
            now,
            &self.care_rules,
            attacker_bloblet.is_newcomer,
        );
        // A neglected defender can still be attacked.
        let defender_status = build_status(
            &tx.care_state(defender).await?.unwrap_or_default(),
            now,
            &self.care_rules,
            defender_bloblet.is_newcomer,
        );
        if attacker_status.overdue {
            tracing::warn!(attacker = %attacker, cooldown_ends_at = ?attacker_status.cooldown_ends_at, "Battle rejected: attacker overdue");
            return Err(BattleError::rejected_with(
                BattleErrorKind::AttackerOverdue,
                json!({ "cooldownEndsAt": attacker_status.cooldown_ends_at }),
            ));
        }

        if let Some(until) = tx.pair_cooldown(attacker, defender).await?.filter(|until| *until > now) {
            tracing::info!(attacker = %attacker, defender = %defender, until = %until, "Battle rejected: pair cooldown");
            return Err(BattleError::rejected_with(
                BattleErrorKind::PairCooldown,
                json!({ "until": until }),
            ));
        }

        let balances = self
            .ledger
            .fetch_balances(tx, &[attacker.clone(), defender.clone()], true)
            .await?;
        let attacker_balance = balances.get(attacker).copied().unwrap_or(Decimal::ZERO);
        let defender_balance = balances.get(defender).copied().unwrap_or(Decimal::ZERO);
        for (kind, address, balance) in [
            (BattleErrorKind::AttackerBalanceLow, attacker, attacker_balance),
            (BattleErrorKind::DefenderBalanceLow, defender, defender_balance),
        ] {
            if balance < self.rules.min_stake {
                tracing::warn!(address = %address, balance = %balance, required = %self.rules.min_stake, "Battle rejected: {}", kind);
                return Err(BattleError::rejected_with(
                    kind,
                    json!({ "required": self.rules.min_stake, "available": balance }),
                ));
            }
        }

        let attacker_loadout = self.ensure_loadout(tx, attacker).await?;
        let defender_loadout = self.ensure_loadout(tx, defender).await?;

        Ok((
            Contender {
                address: attacker.clone(),
                booster_level: attacker_status.booster_level,
                balance: attacker_balance,
                loadout: attacker_loadout,
            },
            Contender {
                address: defender.clone(),
                booster_level: defender_status.booster_level,
                balance: defender_balance,
                loadout: defender_loadout,
            },
        ))
    }

    fn reject(&self, kind: BattleErrorKind, address: &Address) -> BattleError {
        tracing::warn!(address = %address, "Battle rejected: {}", kind);
        BattleError::rejected_with(kind, json!({ "address": address }))
    }

    /// Load a wallet's loadout, creating its default one on first battle.
    async fn ensure_loadout(&self, tx: &mut Transaction, address: &Address) -> BattleRunResult<Loadout> {
        if let Some(loadout) = tx.loadout(address).await? {
            return Ok(loadout);
        }
        let loadout = self.catalog.default_loadout(address);
        tracing::debug!(address = %address, ?loadout, "Assigning default loadout");
        tx.put_loadout(address, loadout);
        Ok(loadout)
    }

    fn apply_loot(
        &self,
        tx: &mut Transaction,
        winner: &CombatSide,
        loser: &CombatSide,
        decisions: &[arena_core::LootDecision],
    ) -> Vec<LootDrop> {
        if decisions.is_empty() {
            return Vec::new();
        }

        let mut winner_loadout = winner.loadout;
        let mut loser_loadout = loser.loadout;
        let mut drops = Vec::with_capacity(decisions.len());

        for decision in decisions {
            loser_loadout.set_slot(decision.slot, None);
            if decision.equipped {
                winner_loadout.set_slot(decision.slot, Some(decision.item_id));
            } else {
                tx.add_to_inventory(&winner.address, decision.item_id);
            }
            tracing::debug!(
                slot = %decision.slot,
                item_id = decision.item_id,
                from = %loser.address,
                to = %winner.address,
                equipped = decision.equipped,
                "Loot transferred"
            );
            drops.push(LootDrop {
                slot: decision.slot,
                item_id: decision.item_id,
                from: loser.address.clone(),
                to: winner.address.clone(),
                equipped: decision.equipped,
            });
        }

        tx.put_loadout(&winner.address, winner_loadout);
        tx.put_loadout(&loser.address, loser_loadout);
        drops
    }

    pub async fn battle(&self, battle_id: Uuid) -> BattleRunResult<Option<BattleResult>> {
        Ok(self.db.battle(battle_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::care::CareService;
    use crate::rng::ScriptedRng;
    use arena_core::{
        Bloblet, ItemType, LedgerError, LedgerReason, LoadoutItem, NewLedgerEntry, Rarity, StorageError,
    };
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    const SWORD: i64 = 1;
    const TOWER_SHIELD: i64 = 2;
    const STICK: i64 = 3;
    const LID: i64 = 4;

    fn address(byte: u8) -> Address {
        Address::parse(&bs58::encode([byte; 32]).into_string()).unwrap()
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap()
    }

    fn item(id: i64, item_type: ItemType, rarity: Rarity, power: Decimal) -> LoadoutItem {
        let (op, dp) = match item_type {
            ItemType::Weapon => (power, Decimal::ZERO),
            ItemType::Shield => (Decimal::ZERO, power),
        };
        LoadoutItem {
            id,
            slug: format!("item-{id}"),
            item_type,
            rarity,
            op,
            dp,
            icon: String::new(),
        }
    }

    fn catalog() -> LoadoutCatalog {
        LoadoutCatalog::new(vec![
            item(SWORD, ItemType::Weapon, Rarity::Epic, dec!(12)),
            item(TOWER_SHIELD, ItemType::Shield, Rarity::Rare, dec!(6)),
            item(STICK, ItemType::Weapon, Rarity::Common, dec!(6)),
            item(LID, ItemType::Shield, Rarity::Common, dec!(3)),
        ])
    }

    fn loadout(weapon: Option<i64>, shield: Option<i64>) -> Loadout {
        Loadout {
            weapon_item_id: weapon,
            shield_item_id: shield,
        }
    }

    struct Arena {
        db: Database,
        ledger: RewardLedger,
        care: CareService,
        resolver: BattleResolver,
        treasury: Address,
    }

    /// Draws run attacker luck, defender luck, critical, weapon loot, shield
    /// loot. Anything past the script draws 0.9: no critical, no loot.
    fn arena(draws: Vec<Decimal>) -> Arena {
        let db = Database::in_memory().unwrap();
        let ledger = RewardLedger::new(db.clone(), true);
        let care = CareService::new(db.clone(), ledger.clone(), CareRules::default());
        let treasury = address(200);
        let resolver = BattleResolver::new(
            db.clone(),
            ledger.clone(),
            catalog(),
            CareRules::default(),
            BattleRules::default(),
            treasury.clone(),
            Box::new(ScriptedRng::new(draws, dec!(0.9))),
        );
        Arena {
            db,
            ledger,
            care,
            resolver,
            treasury,
        }
    }

    impl Arena {
        async fn spawn(&self, byte: u8, points: Decimal, equipped: Option<Loadout>) -> Address {
            let address = address(byte);
            self.db
                .upsert_bloblet(&Bloblet {
                    address: address.clone(),
                    is_alive: true,
                    is_newcomer: false,
                })
                .await
                .unwrap();
            self.ledger
                .apply_entries(vec![NewLedgerEntry::new(address.clone(), points, LedgerReason::RewardGrant)])
                .await
                .unwrap();
            if let Some(equipped) = equipped {
                self.db.put_loadout(&address, equipped).await.unwrap();
            }
            address
        }

        async fn balance(&self, address: &Address) -> Decimal {
            self.ledger.fetch_reward_balances(std::slice::from_ref(address)).await.unwrap()[address].current_balance
        }
    }

    fn rejection(err: BattleError) -> BattleErrorKind {
        err.kind().unwrap_or_else(|| panic!("expected a rejection, got {err}"))
    }

    #[tokio::test]
    async fn test_attacker_wins_standard_battle() {
        let arena = arena(vec![dec!(0.5), dec!(0.5)]);
        let a = arena.spawn(1, dec!(100), Some(loadout(Some(SWORD), None))).await;
        let d = arena.spawn(2, dec!(100), Some(loadout(None, Some(TOWER_SHIELD)))).await;

        let result = arena.resolver.run_battle_at(&a, &d, noon()).await.unwrap();

        assert_eq!(result.winner, Side::Attacker);
        assert!(!result.critical);
        assert_eq!(result.attacker.total, dec!(12));
        assert_eq!(result.defender.total, dec!(6));
        assert_eq!(result.transfer.transfer, dec!(10));
        assert_eq!(result.transfer.house, dec!(1));
        assert_eq!(result.transfer.winner_gain, dec!(9));
        assert_eq!(result.attacker.points_after, dec!(109));
        assert_eq!(result.defender.points_after, dec!(90));
        assert!(result.loot.is_empty());
        assert_eq!(result.cooldown_until, noon() + Duration::seconds(600));

        assert_eq!(arena.balance(&a).await, dec!(109));
        assert_eq!(arena.balance(&d).await, dec!(90));
        assert_eq!(arena.balance(&arena.treasury).await, dec!(1));

        let win = arena.ledger.history(&a).await.unwrap().pop().unwrap();
        let loss = arena.ledger.history(&d).await.unwrap().pop().unwrap();
        let cut = arena.ledger.history(&arena.treasury).await.unwrap().pop().unwrap();
        assert_eq!(win.reason, LedgerReason::BattleWin);
        assert_eq!(loss.reason, LedgerReason::BattleLoss);
        assert_eq!(cut.reason, LedgerReason::TreasuryCut);
        assert!(win.id < loss.id && loss.id < cut.id);
        assert_eq!(win.metadata["battleId"], json!(result.battle_id));

        let stored = arena.resolver.battle(result.battle_id).await.unwrap().unwrap();
        assert_eq!(stored, result);
        assert!(arena_core::replay(&stored));
        for wallet in [&a, &d, &arena.treasury] {
            assert!(arena.ledger.verify(wallet).await.unwrap().is_consistent());
        }
    }

    #[tokio::test]
    async fn test_tie_goes_to_defender() {
        let arena = arena(vec![dec!(0.5), dec!(0.5)]);
        let a = arena.spawn(1, dec!(100), Some(loadout(Some(STICK), None))).await;
        let d = arena.spawn(2, dec!(50), Some(loadout(None, Some(TOWER_SHIELD)))).await;

        let result = arena.resolver.run_battle_at(&a, &d, noon()).await.unwrap();

        assert_eq!(result.attacker.total, result.defender.total);
        assert_eq!(result.winner, Side::Defender);
        assert_eq!(result.winner_address(), &d);
        assert_eq!(arena.balance(&a).await, dec!(90));
        assert_eq!(arena.balance(&d).await, dec!(59));
    }

    #[tokio::test]
    async fn test_critical_hit_moves_more_points() {
        let arena = arena(vec![dec!(0.5), dec!(0.5), dec!(0.05)]);
        let a = arena.spawn(1, dec!(100), Some(loadout(Some(SWORD), None))).await;
        let d = arena.spawn(2, dec!(100), Some(loadout(None, Some(LID)))).await;

        let result = arena.resolver.run_battle_at(&a, &d, noon()).await.unwrap();

        assert!(result.critical);
        assert_eq!(result.transfer.transfer, dec!(20));
        assert_eq!(result.transfer.house, dec!(2));
        assert_eq!(arena.balance(&a).await, dec!(118));
        assert_eq!(arena.balance(&d).await, dec!(80));
    }

    #[tokio::test]
    async fn test_points_are_conserved() {
        let arena = arena(vec![dec!(0.123457), dec!(0.987654), dec!(0.02)]);
        let a = arena.spawn(1, dec!(33.333333), Some(loadout(Some(SWORD), Some(LID)))).await;
        let d = arena.spawn(2, dec!(71.777777), Some(loadout(Some(STICK), Some(TOWER_SHIELD)))).await;

        let before = arena.balance(&a).await + arena.balance(&d).await;
        let result = arena.resolver.run_battle_at(&a, &d, noon()).await.unwrap();
        let after = arena.balance(&a).await + arena.balance(&d).await + arena.balance(&arena.treasury).await;

        assert_eq!(before, after);
        assert_eq!(
            result.transfer.winner_gain + result.transfer.house,
            result.transfer.transfer
        );
        assert!(arena_core::replay(&result));
    }

    #[tokio::test]
    async fn test_stored_battle_replays_after_rules_change() {
        let arena = arena(vec![dec!(0.5), dec!(0.5)]);
        let a = arena.spawn(1, dec!(100), Some(loadout(Some(SWORD), None))).await;
        let d = arena.spawn(2, dec!(100), Some(loadout(None, Some(TOWER_SHIELD)))).await;
        let result = arena.resolver.run_battle_at(&a, &d, noon()).await.unwrap();

        let retuned = BattleRules {
            transfer_rate: dec!(0.5),
            ..BattleRules::default()
        };
        let resolver = BattleResolver::new(
            arena.db.clone(),
            arena.ledger.clone(),
            catalog(),
            CareRules::default(),
            retuned.clone(),
            arena.treasury.clone(),
            Box::new(ScriptedRng::new(vec![], dec!(0.9))),
        );

        let stored = resolver.battle(result.battle_id).await.unwrap().unwrap();
        assert_eq!(stored.rules, BattleRules::default());
        assert!(arena_core::replay(&stored));

        let mut rewritten = stored.clone();
        rewritten.rules = retuned;
        assert!(!arena_core::replay(&rewritten));
    }

    #[tokio::test]
    async fn test_booster_adds_to_total() {
        let arena = arena(vec![dec!(0.5), dec!(0.5)]);
        let a = arena.spawn(1, dec!(100), Some(loadout(Some(STICK), None))).await;
        let d = arena.spawn(2, dec!(100), Some(loadout(None, Some(TOWER_SHIELD)))).await;
        arena.care.charge(&a, noon() - Duration::minutes(30)).await.unwrap();

        let result = arena.resolver.run_battle_at(&a, &d, noon()).await.unwrap();

        assert_eq!(result.attacker.booster, 3);
        assert_eq!(result.attacker.total, dec!(9));
        assert_eq!(result.winner, Side::Attacker);
    }

    #[tokio::test]
    async fn test_loot_equips_empty_slot_and_stores_the_rest() {
        let arena = arena(vec![dec!(0.5), dec!(0.5), dec!(0.5), dec!(0.01), dec!(0.01)]);
        let a = arena.spawn(1, dec!(100), Some(loadout(Some(SWORD), None))).await;
        let d = arena.spawn(2, dec!(100), Some(loadout(Some(STICK), Some(LID)))).await;

        let result = arena.resolver.run_battle_at(&a, &d, noon()).await.unwrap();

        assert_eq!(result.winner, Side::Attacker);
        assert_eq!(result.loot.len(), 2);
        let weapon = &result.loot[0];
        assert_eq!((weapon.slot, weapon.item_id, weapon.equipped), (ItemType::Weapon, STICK, false));
        let shield = &result.loot[1];
        assert_eq!((shield.slot, shield.item_id, shield.equipped), (ItemType::Shield, LID, true));
        assert_eq!(shield.from, d);
        assert_eq!(shield.to, a);

        assert_eq!(arena.db.loadout(&a).await.unwrap(), Some(loadout(Some(SWORD), Some(LID))));
        assert_eq!(arena.db.loadout(&d).await.unwrap(), Some(Loadout::default()));
        assert_eq!(arena.db.inventory(&a).await.unwrap(), vec![STICK]);
    }

    #[tokio::test]
    async fn test_first_battle_assigns_default_loadouts() {
        let arena = arena(vec![]);
        let a = arena.spawn(1, dec!(100), None).await;
        let d = arena.spawn(2, dec!(100), None).await;

        let result = arena.resolver.run_battle_at(&a, &d, noon()).await.unwrap();

        assert_eq!(result.attacker.loadout, loadout(Some(STICK), Some(LID)));
        assert_eq!(result.attacker.base, dec!(6));
        assert_eq!(result.defender.base, dec!(3));
        assert_eq!(arena.db.loadout(&a).await.unwrap(), Some(loadout(Some(STICK), Some(LID))));
        assert_eq!(arena.db.loadout(&d).await.unwrap(), Some(loadout(Some(STICK), Some(LID))));
    }

    #[tokio::test]
    async fn test_low_balance_rejects_without_side_effects() {
        let arena = arena(vec![]);
        let a = arena.spawn(1, dec!(5), None).await;
        let d = arena.spawn(2, dec!(100), None).await;
        let entries = arena.db.ledger_len().await.unwrap();

        let err = arena.resolver.run_battle_at(&a, &d, noon()).await.unwrap_err();
        match &err {
            BattleError::Rejected { kind, details } => {
                assert_eq!(*kind, BattleErrorKind::AttackerBalanceLow);
                let details = details.as_ref().unwrap();
                assert_eq!(details["required"], json!(dec!(10)));
                assert_eq!(details["available"], json!(dec!(5)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(arena.db.ledger_len().await.unwrap(), entries);
        assert_eq!(arena.db.battle_count().await.unwrap(), 0);
        assert_eq!(arena.db.loadout(&a).await.unwrap(), None);

        let poor = arena.spawn(3, dec!(9.999999), None).await;
        let err = arena.resolver.run_battle_at(&d, &poor, noon()).await.unwrap_err();
        assert_eq!(rejection(err), BattleErrorKind::DefenderBalanceLow);
    }

    #[tokio::test]
    async fn test_dead_or_unknown_wallets_cannot_fight() {
        let arena = arena(vec![]);
        let a = arena.spawn(1, dec!(100), None).await;
        let d = arena.spawn(2, dec!(100), None).await;

        let stranger = address(3);
        let err = arena.resolver.run_battle_at(&a, &stranger, noon()).await.unwrap_err();
        assert_eq!(rejection(err), BattleErrorKind::DefenderDead);

        arena
            .db
            .upsert_bloblet(&Bloblet {
                address: a.clone(),
                is_alive: false,
                is_newcomer: false,
            })
            .await;
        let err = arena.resolver.run_battle_at(&a, &d, noon()).await.unwrap_err();
        assert_eq!(rejection(err), BattleErrorKind::AttackerDead);
        assert_eq!(arena.db.battle_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_overdue_attacker_is_blocked_but_overdue_defender_is_not() {
        let arena = arena(vec![]);
        let a = arena.spawn(1, dec!(100), None).await;
        let d = arena.spawn(2, dec!(100), None).await;
        arena.care.charge(&a, noon() - Duration::days(2)).await.unwrap();

        let err = arena.resolver.run_battle_at(&a, &d, noon()).await.unwrap_err();
        assert_eq!(rejection(err), BattleErrorKind::AttackerOverdue);

        assert!(arena.resolver.run_battle_at(&d, &a, noon()).await.is_ok());
    }

    #[tokio::test]
    async fn test_pair_cooldown_blocks_rematch_both_ways() {
        let arena = arena(vec![]);
        let a = arena.spawn(1, dec!(100), None).await;
        let d = arena.spawn(2, dec!(100), None).await;
        let c = arena.spawn(3, dec!(100), None).await;

        let first = arena.resolver.run_battle_at(&a, &d, noon()).await.unwrap();

        let later = noon() + Duration::seconds(60);
        let err = arena.resolver.run_battle_at(&a, &d, later).await.unwrap_err();
        assert_eq!(err.kind(), Some(BattleErrorKind::PairCooldown));
        assert_eq!(rejection(err).class(), arena_core::ErrorClass::Transient);
        let err = arena.resolver.run_battle_at(&d, &a, later).await.unwrap_err();
        assert_eq!(rejection(err), BattleErrorKind::PairCooldown);

        // Other pairings are unaffected
        assert!(arena.resolver.run_battle_at(&a, &c, later).await.is_ok());

        let after = first.cooldown_until + Duration::seconds(1);
        assert!(arena.resolver.run_battle_at(&a, &d, after).await.is_ok());
    }

    #[tokio::test]
    async fn test_same_wallet_and_disabled_ledger() {
        let arena = arena(vec![]);
        let a = arena.spawn(1, dec!(100), None).await;
        let err = arena.resolver.run_battle_at(&a, &a, noon()).await.unwrap_err();
        assert_eq!(rejection(err), BattleErrorKind::SameWallet);

        let db = Database::in_memory().unwrap();
        let resolver = BattleResolver::new(
            db.clone(),
            RewardLedger::new(db, false),
            catalog(),
            CareRules::default(),
            BattleRules::default(),
            address(200),
            Box::new(ScriptedRng::new(vec![], dec!(0.5))),
        );
        let err = resolver.run_battle_at(&address(1), &address(2), noon()).await.unwrap_err();
        assert!(matches!(err, BattleError::Ledger(LedgerError::Disabled)));
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_no_trace() {
        let arena = arena(vec![dec!(0.5), dec!(0.5), dec!(0.5), dec!(0.01), dec!(0.01)]);
        let a = arena.spawn(1, dec!(100), None).await;
        let d = arena.spawn(2, dec!(100), None).await;
        let entries = arena.db.ledger_len().await.unwrap();

        arena.db.fail_next_commit();
        let err = arena.resolver.run_battle_at(&a, &d, noon()).await.unwrap_err();
        assert!(matches!(err, BattleError::Storage(StorageError::CommitFailed(_))));

        assert_eq!(arena.db.ledger_len().await.unwrap(), entries);
        assert_eq!(arena.db.battle_count().await.unwrap(), 0);
        assert_eq!(arena.db.loadout(&a).await.unwrap(), None);
        assert!(arena.db.inventory(&a).await.unwrap().is_empty());
        assert_eq!(arena.balance(&a).await, dec!(100));
        assert_eq!(arena.balance(&d).await, dec!(100));

        // No pair cooldown was recorded either
        assert!(arena.resolver.run_battle_at(&a, &d, noon()).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_battles_on_shared_defender_serialize() {
        let arena = arena(vec![]);
        let d = arena.spawn(1, dec!(100), Some(loadout(None, Some(LID)))).await;
        let mut attackers = Vec::new();
        for byte in 2..6 {
            attackers.push(arena.spawn(byte, dec!(100), Some(loadout(Some(SWORD), None))).await);
        }

        let mut handles = Vec::new();
        for attacker in attackers.clone() {
            let resolver = arena.resolver.clone();
            let defender = d.clone();
            handles.push(tokio::spawn(async move {
                resolver.run_battle_at(&attacker, &defender, noon()).await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().winner, Side::Attacker);
        }

        // Each loss is 10% of what the previous battle left behind
        assert_eq!(arena.balance(&d).await, dec!(65.61));
        let mut total = arena.balance(&d).await + arena.balance(&arena.treasury).await;
        for attacker in &attackers {
            total += arena.balance(attacker).await;
        }
        assert_eq!(total, dec!(500));
        assert!(arena.ledger.verify(&d).await.unwrap().is_consistent());
        assert_eq!(arena.db.battle_count().await.unwrap(), 4);
    }
}
