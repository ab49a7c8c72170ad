use arena_core::{round_points, Address, Bloblet, Loadout, StorageError};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;

use super::models::{
    millis_to_datetime, parse_decimal, BalanceRow, BattleRow, BlobletRow, CareStateRow, LedgerEntryRow,
    LoadoutRow, PairCooldownRow,
};
use super::backend;

// ============================================================================
// Reads
// ============================================================================

pub(crate) fn entries_for(conn: &Connection, address: &Address) -> Result<Vec<LedgerEntryRow>, StorageError> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT id, address, reason, delta, balance_after, created_at, metadata
             FROM ledger_entries WHERE address = ?1 ORDER BY id",
        )
        .map_err(backend)?;
    let rows = stmt
        .query_map(params![address.as_str()], LedgerEntryRow::from_row)
        .map_err(backend)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(backend)
}

fn latest_entry(conn: &Connection, address: &Address) -> Result<Option<LedgerEntryRow>, StorageError> {
    conn.query_row(
        "SELECT id, address, reason, delta, balance_after, created_at, metadata
         FROM ledger_entries WHERE address = ?1 ORDER BY id DESC LIMIT 1",
        params![address.as_str()],
        LedgerEntryRow::from_row,
    )
    .optional()
    .map_err(backend)
}

/// Latest `balance_after` for an address, or zero if it has no history.
///
/// A latest row whose balance does not parse falls back to the sum of every
/// delta for the address.
pub(crate) fn latest_balance(conn: &Connection, address: &Address) -> Result<Decimal, StorageError> {
    let Some(latest) = latest_entry(conn, address)? else {
        return Ok(Decimal::ZERO);
    };

    match parse_decimal("ledger_entries", &latest.balance_after) {
        Ok(balance) => Ok(round_points(balance)),
        Err(e) => {
            tracing::warn!(
                address = %address,
                entry_id = latest.id,
                error = %e,
                "Latest ledger balance unreadable, summing deltas instead"
            );
            sum_deltas(conn, address)
        }
    }
}

pub(crate) fn sum_deltas(conn: &Connection, address: &Address) -> Result<Decimal, StorageError> {
    entries_for(conn, address)?.iter().try_fold(Decimal::ZERO, |acc, row| {
        let delta = parse_decimal("ledger_entries", &row.delta)?;
        acc.checked_add(delta)
            .map(round_points)
            .ok_or_else(|| StorageError::Corrupt {
                table: "ledger_entries",
                detail: format!("delta sum for {} out of range", address),
            })
    })
}

pub(crate) fn ledger_len(conn: &Connection) -> Result<usize, StorageError> {
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM ledger_entries", [], |row| row.get(0))
        .map_err(backend)?;
    Ok(count as usize)
}

pub(crate) fn balance_row(conn: &Connection, address: &Address) -> Result<Option<BalanceRow>, StorageError> {
    conn.query_row(
        "SELECT address, current_balance, updated_at FROM balances WHERE address = ?1",
        params![address.as_str()],
        BalanceRow::from_row,
    )
    .optional()
    .map_err(backend)
}

pub(crate) fn bloblet(conn: &Connection, address: &Address) -> Result<Option<Bloblet>, StorageError> {
    let row = conn
        .query_row(
            "SELECT address, is_alive, is_newcomer FROM bloblets WHERE address = ?1",
            params![address.as_str()],
            BlobletRow::from_row,
        )
        .optional()
        .map_err(backend)?;
    Ok(row.map(|row| Bloblet {
        address: address.clone(),
        is_alive: row.is_alive,
        is_newcomer: row.is_newcomer,
    }))
}

pub(crate) fn loadout(conn: &Connection, address: &Address) -> Result<Option<Loadout>, StorageError> {
    let row = conn
        .query_row(
            "SELECT address, weapon_item_id, shield_item_id FROM loadouts WHERE address = ?1",
            params![address.as_str()],
            LoadoutRow::from_row,
        )
        .optional()
        .map_err(backend)?;
    Ok(row.map(|row| Loadout {
        weapon_item_id: row.weapon_item_id,
        shield_item_id: row.shield_item_id,
    }))
}

pub(crate) fn inventory(conn: &Connection, address: &Address) -> Result<Vec<i64>, StorageError> {
    let mut stmt = conn
        .prepare_cached("SELECT item_id FROM inventory WHERE address = ?1 ORDER BY id")
        .map_err(backend)?;
    let rows = stmt
        .query_map(params![address.as_str()], |row| row.get(0))
        .map_err(backend)?;
    rows.collect::<rusqlite::Result<Vec<i64>>>().map_err(backend)
}

pub(crate) fn care_state(conn: &Connection, address: &Address) -> Result<Option<CareStateRow>, StorageError> {
    conn.query_row(
        "SELECT address, state, updated_at FROM care_states WHERE address = ?1",
        params![address.as_str()],
        |row| {
            Ok(CareStateRow {
                address: row.get("address")?,
                state: row.get("state")?,
                updated_at: row.get("updated_at")?,
            })
        },
    )
    .optional()
    .map_err(backend)
}

/// The stored result blob of a battle.
pub(crate) fn battle_result(conn: &Connection, battle_id: &str) -> Result<Option<String>, StorageError> {
    conn.query_row(
        "SELECT result FROM battles WHERE battle_id = ?1",
        params![battle_id],
        |row| row.get(0),
    )
    .optional()
    .map_err(backend)
}

pub(crate) fn battle_count(conn: &Connection) -> Result<usize, StorageError> {
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM battles", [], |row| row.get(0))
        .map_err(backend)?;
    Ok(count as usize)
}

pub(crate) fn pair_cooldown(
    conn: &Connection,
    address: &Address,
    opponent: &Address,
) -> Result<Option<DateTime<Utc>>, StorageError> {
    let until: Option<i64> = conn
        .query_row(
            "SELECT until FROM pair_cooldowns WHERE address = ?1 AND opponent = ?2",
            params![address.as_str(), opponent.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(backend)?;
    Ok(until.map(millis_to_datetime))
}

// ============================================================================
// Writes
// ============================================================================

/// Append a ledger row and return its id.
pub(crate) fn insert_entry(conn: &Connection, row: &LedgerEntryRow) -> Result<i64, StorageError> {
    conn.prepare_cached(
        "INSERT INTO ledger_entries (address, reason, delta, balance_after, created_at, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )
    .and_then(|mut stmt| {
        stmt.execute(params![
            row.address,
            row.reason,
            row.delta,
            row.balance_after,
            row.created_at,
            row.metadata
        ])
    })
    .map_err(backend)?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn upsert_balance(conn: &Connection, row: &BalanceRow) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO balances (address, current_balance, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT (address) DO UPDATE SET
             current_balance = excluded.current_balance,
             updated_at = excluded.updated_at",
        params![row.address, row.current_balance, row.updated_at],
    )
    .map_err(backend)?;
    Ok(())
}

pub(crate) fn upsert_care_state(conn: &Connection, row: &CareStateRow) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO care_states (address, state, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT (address) DO UPDATE SET state = excluded.state, updated_at = excluded.updated_at",
        params![row.address, row.state, row.updated_at],
    )
    .map_err(backend)?;
    Ok(())
}

pub(crate) fn upsert_bloblet(conn: &Connection, row: &BlobletRow) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO bloblets (address, is_alive, is_newcomer) VALUES (?1, ?2, ?3)
         ON CONFLICT (address) DO UPDATE SET is_alive = excluded.is_alive, is_newcomer = excluded.is_newcomer",
        params![row.address, row.is_alive, row.is_newcomer],
    )
    .map_err(backend)?;
    Ok(())
}

pub(crate) fn upsert_loadout(conn: &Connection, row: &LoadoutRow) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO loadouts (address, weapon_item_id, shield_item_id) VALUES (?1, ?2, ?3)
         ON CONFLICT (address) DO UPDATE SET
             weapon_item_id = excluded.weapon_item_id,
             shield_item_id = excluded.shield_item_id",
        params![row.address, row.weapon_item_id, row.shield_item_id],
    )
    .map_err(backend)?;
    Ok(())
}

pub(crate) fn insert_inventory(conn: &Connection, address: &str, item_id: i64) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO inventory (address, item_id) VALUES (?1, ?2)",
        params![address, item_id],
    )
    .map_err(backend)?;
    Ok(())
}

pub(crate) fn insert_battle(conn: &Connection, row: &BattleRow) -> Result<(), StorageError> {
    if battle_result(conn, &row.battle_id)?.is_some() {
        return Err(StorageError::CommitFailed(format!("duplicate battle id {}", row.battle_id)));
    }
    conn.execute(
        "INSERT INTO battles (battle_id, attacker, defender, result, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![row.battle_id, row.attacker, row.defender, row.result, row.created_at],
    )
    .map_err(backend)?;
    Ok(())
}

pub(crate) fn upsert_pair_cooldown(conn: &Connection, row: &PairCooldownRow) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO pair_cooldowns (address, opponent, until) VALUES (?1, ?2, ?3)
         ON CONFLICT (address, opponent) DO UPDATE SET until = excluded.until",
        params![row.address, row.opponent, row.until],
    )
    .map_err(backend)?;
    Ok(())
}
