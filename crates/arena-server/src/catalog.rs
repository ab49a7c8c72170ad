//! Loadout catalog: read-only weapon and shield reference data.

use std::collections::HashMap;
use std::sync::Arc;

use arena_core::{Address, ItemType, LoadoutItem, Loadout, Rarity};
use rust_decimal::Decimal;

#[derive(Clone)]
pub struct LoadoutCatalog {
    items: Arc<HashMap<i64, LoadoutItem>>,
    /// Common item ids per slot, sorted, used for default assignment.
    starters: Arc<HashMap<ItemType, Vec<i64>>>,
}

impl LoadoutCatalog {
    pub fn new(items: Vec<LoadoutItem>) -> Self {
        let mut starters: HashMap<ItemType, Vec<i64>> = HashMap::new();
        for item in items.iter().filter(|item| item.rarity == Rarity::Common) {
            starters.entry(item.item_type).or_default().push(item.id);
        }
        for ids in starters.values_mut() {
            ids.sort_unstable();
        }

        tracing::debug!(item_count = items.len(), "Loadout catalog loaded");

        Self {
            items: Arc::new(items.into_iter().map(|item| (item.id, item)).collect()),
            starters: Arc::new(starters),
        }
    }

    /// The built-in item set.
    pub fn with_defaults() -> Self {
        let weapon = |id, slug: &str, rarity, op: i64, icon: &str| LoadoutItem {
            id,
            slug: slug.to_string(),
            item_type: ItemType::Weapon,
            rarity,
            op: Decimal::from(op),
            dp: Decimal::ZERO,
            icon: icon.to_string(),
        };
        let shield = |id, slug: &str, rarity, dp: i64, icon: &str| LoadoutItem {
            id,
            slug: slug.to_string(),
            item_type: ItemType::Shield,
            rarity,
            op: Decimal::ZERO,
            dp: Decimal::from(dp),
            icon: icon.to_string(),
        };

        Self::new(vec![
            weapon(1, "twig-sword", Rarity::Common, 4, "weapons/twig-sword.png"),
            weapon(2, "pebble-sling", Rarity::Common, 5, "weapons/pebble-sling.png"),
            weapon(3, "bubble-wand", Rarity::Common, 6, "weapons/bubble-wand.png"),
            weapon(4, "ember-blade", Rarity::Rare, 9, "weapons/ember-blade.png"),
            weapon(5, "storm-hammer", Rarity::Epic, 12, "weapons/storm-hammer.png"),
            shield(101, "leaf-buckler", Rarity::Common, 3, "shields/leaf-buckler.png"),
            shield(102, "bark-shield", Rarity::Common, 4, "shields/bark-shield.png"),
            shield(103, "jelly-guard", Rarity::Common, 5, "shields/jelly-guard.png"),
            shield(104, "crystal-aegis", Rarity::Rare, 8, "shields/crystal-aegis.png"),
            shield(105, "void-bulwark", Rarity::Epic, 11, "shields/void-bulwark.png"),
        ])
    }

    pub fn get(&self, id: i64) -> Option<&LoadoutItem> {
        self.items.get(&id)
    }

    /// Starter loadout for a wallet seen for the first time. Same address,
    /// same items.
    pub fn default_loadout(&self, address: &Address) -> Loadout {
        let hash = fnv1a(address.as_str().as_bytes());
        let pick = |slot: ItemType, seed: u64| {
            self.starters
                .get(&slot)
                .filter(|ids| !ids.is_empty())
                .map(|ids| ids[(seed % ids.len() as u64) as usize])
        };
        Loadout {
            weapon_item_id: pick(ItemType::Weapon, hash),
            shield_item_id: pick(ItemType::Shield, hash.rotate_left(32)),
        }
    }

    /// Offense of the equipped weapon, zero when the slot is empty.
    pub fn attack_power(&self, loadout: &Loadout) -> Decimal {
        loadout
            .weapon_item_id
            .and_then(|id| self.get(id))
            .map(|item| item.op)
            .unwrap_or(Decimal::ZERO)
    }

    /// Defense of the equipped shield, zero when the slot is empty.
    pub fn defense_power(&self, loadout: &Loadout) -> Decimal {
        loadout
            .shield_item_id
            .and_then(|id| self.get(id))
            .map(|item| item.dp)
            .unwrap_or(Decimal::ZERO)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf29ce484222325, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(0x100000001b3)
    })
}
