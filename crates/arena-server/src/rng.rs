//! Randomness for combat.
//!
//! Battles draw from a dedicated source that is never shared with anything
//! cosmetic. Production uses the OS CSPRNG; a seeded ChaCha-backed generator
//! exists for reproducible runs.

use arena_core::{BattleDraws, POINT_SCALE};
use rand::rngs::{OsRng, StdRng};
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;

/// Exclusive upper bound of a raw draw; draws carry six fractional digits.
const DRAW_RESOLUTION: i64 = 1_000_000;

pub trait BattleRng: Send {
    /// Uniform value in `[0, 1)`.
    fn draw(&mut self) -> Decimal;
}

pub struct OsBattleRng;

impl BattleRng for OsBattleRng {
    fn draw(&mut self) -> Decimal {
        Decimal::new(OsRng.gen_range(0..DRAW_RESOLUTION), POINT_SCALE)
    }
}

pub struct SeededBattleRng {
    rng: StdRng,
}

impl SeededBattleRng {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl BattleRng for SeededBattleRng {
    fn draw(&mut self) -> Decimal {
        Decimal::new(self.rng.gen_range(0..DRAW_RESOLUTION), POINT_SCALE)
    }
}

/// Take one battle's worth of draws in the fixed order the resolver expects.
pub fn take_draws(rng: &mut dyn BattleRng) -> BattleDraws {
    BattleDraws {
        attacker_luck: rng.draw(),
        defender_luck: rng.draw(),
        critical: rng.draw(),
        weapon_loot: rng.draw(),
        shield_loot: rng.draw(),
    }
}

/// Replays a fixed sequence, then repeats `fallback`.
#[cfg(test)]
pub(crate) struct ScriptedRng {
    values: std::collections::VecDeque<Decimal>,
    fallback: Decimal,
}

#[cfg(test)]
impl ScriptedRng {
    pub(crate) fn new(values: Vec<Decimal>, fallback: Decimal) -> Self {
        Self {
            values: values.into(),
            fallback,
        }
    }
}

#[cfg(test)]
impl BattleRng for ScriptedRng {
    fn draw(&mut self) -> Decimal {
        self.values.pop_front().unwrap_or(self.fallback)
    }
}
