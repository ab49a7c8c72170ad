pub mod models;
pub mod queries;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};

use arena_core::{
    Address, BattleResult, Bloblet, CareState, LedgerEntry, LedgerReason, Loadout, StorageError,
};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags, TransactionBehavior};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use self::models::{BalanceRow, BattleRow, BlobletRow, CareStateRow, LedgerEntryRow, LoadoutRow, PairCooldownRow};
use crate::config::DatabaseConfig;

pub(crate) fn backend(e: rusqlite::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

type LockRegistry = Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>;

/// SQLite-backed store.
///
/// Mutations go through a [`Transaction`]: per-address row locks are taken in
/// sorted order, writes are staged on the transaction, and `commit` applies
/// them inside one `BEGIN IMMEDIATE` transaction. Dropping a transaction
/// without committing discards every staged write and releases its row locks.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    row_locks: LockRegistry,
    fail_next_commit: Arc<AtomicBool>,
}

impl Database {
    /// Open (or create) the database file and apply the schema.
    pub fn open(config: &DatabaseConfig) -> Result<Self, StorageError> {
        if let Some(parent) = Path::new(&config.path).parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::Backend(format!("create {}: {}", parent.display(), e)))?;
        }

        println!("[DB] Opening SQLite database at {}", config.path);

        let conn = Connection::open_with_flags(
            &config.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE | OpenFlags::SQLITE_OPEN_URI,
        )
        .map_err(backend)?;
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .map_err(backend)?;
        tracing::debug!(journal_mode = %journal_mode, "SQLite journal mode set");
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .map_err(backend)?;
        Self::with_connection(conn)
    }

    /// Private in-memory database, gone when the last handle drops.
    pub fn in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory().map_err(backend)?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(include_str!("../../migrations/001_init.sql"))
            .map_err(backend)?;
        tracing::info!("Ledger store schema ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            row_locks: Arc::default(),
            fail_next_commit: Arc::default(),
        })
    }

    pub fn begin(&self) -> Transaction {
        Transaction {
            db: self.clone(),
            locks: RowLocks {
                registry: self.row_locks.clone(),
                guards: BTreeMap::new(),
            },
            staged: Staged::default(),
        }
    }

    pub async fn health_check(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock().await;
        let ledger_entries = queries::ledger_len(&conn)?;
        tracing::debug!(ledger_entries, "Store health check");
        Ok(())
    }

    fn row_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // ---------------------------------------------------------------------
    // Identity and reference rows
    // ---------------------------------------------------------------------

    pub async fn upsert_bloblet(&self, bloblet: &Bloblet) -> Result<(), StorageError> {
        let conn = self.conn.lock().await;
        queries::upsert_bloblet(
            &conn,
            &BlobletRow {
                address: bloblet.address.to_string(),
                is_alive: bloblet.is_alive,
                is_newcomer: bloblet.is_newcomer,
            },
        )
    }

    pub async fn bloblet(&self, address: &Address) -> Result<Option<Bloblet>, StorageError> {
        let conn = self.conn.lock().await;
        queries::bloblet(&conn, address)
    }

    /// Equip a loadout directly. Used for seeding and administration.
    pub async fn put_loadout(&self, address: &Address, loadout: Loadout) -> Result<(), StorageError> {
        let conn = self.conn.lock().await;
        queries::upsert_loadout(&conn, &loadout_row(address, loadout))
    }

    pub async fn loadout(&self, address: &Address) -> Result<Option<Loadout>, StorageError> {
        let conn = self.conn.lock().await;
        queries::loadout(&conn, address)
    }

    pub async fn inventory(&self, address: &Address) -> Result<Vec<i64>, StorageError> {
        let conn = self.conn.lock().await;
        queries::inventory(&conn, address)
    }

    // ---------------------------------------------------------------------
    // Unlocked reads
    // ---------------------------------------------------------------------

    /// Latest balance per address without taking row locks.
    pub async fn read_balances(&self, addresses: &[Address]) -> Result<HashMap<Address, Decimal>, StorageError> {
        let start = Instant::now();
        let conn = self.conn.lock().await;
        let mut balances = HashMap::with_capacity(addresses.len());
        for address in addresses {
            balances.insert(address.clone(), queries::latest_balance(&conn, address)?);
        }
        tracing::debug!(
            query = "read_balances",
            address_count = addresses.len(),
            duration_ms = %start.elapsed().as_millis(),
            "Store read completed"
        );
        Ok(balances)
    }

    pub async fn balance_row(&self, address: &Address) -> Result<Option<BalanceRow>, StorageError> {
        let conn = self.conn.lock().await;
        queries::balance_row(&conn, address)
    }

    pub async fn ledger_history(&self, address: &Address) -> Result<Vec<LedgerEntry>, StorageError> {
        let conn = self.conn.lock().await;
        queries::entries_for(&conn, address)?
            .into_iter()
            .map(LedgerEntryRow::into_entry)
            .collect()
    }

    pub async fn ledger_len(&self) -> Result<usize, StorageError> {
        let conn = self.conn.lock().await;
        queries::ledger_len(&conn)
    }

    pub async fn care_state(&self, address: &Address) -> Result<Option<CareState>, StorageError> {
        let conn = self.conn.lock().await;
        queries::care_state(&conn, address)?
            .as_ref()
            .map(CareStateRow::decode)
            .transpose()
    }

    pub async fn battle(&self, battle_id: Uuid) -> Result<Option<BattleResult>, StorageError> {
        let conn = self.conn.lock().await;
        let Some(blob) = queries::battle_result(&conn, &battle_id.to_string())? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&blob)?))
    }

    pub async fn battle_count(&self) -> Result<usize, StorageError> {
        let conn = self.conn.lock().await;
        queries::battle_count(&conn)
    }

    /// Make the next commit fail after its writes, to exercise rollback paths.
    #[cfg(test)]
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Append a raw row, bypassing the ledger. Only for corruption tests.
    #[cfg(test)]
    pub(crate) async fn insert_raw_entry(&self, row: LedgerEntryRow) -> Result<i64, StorageError> {
        let conn = self.conn.lock().await;
        queries::insert_entry(&conn, &row)
    }

    /// Addresses with a live row lock entry.
    #[cfg(test)]
    pub(crate) fn row_lock_count(&self) -> usize {
        self.row_locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

fn loadout_row(address: &Address, loadout: Loadout) -> LoadoutRow {
    LoadoutRow {
        address: address.to_string(),
        weapon_item_id: loadout.weapon_item_id,
        shield_item_id: loadout.shield_item_id,
    }
}

#[derive(Default)]
struct Staged {
    entries: Vec<LedgerEntryRow>,
    balances: HashMap<String, Decimal>,
    care: HashMap<String, CareStateRow>,
    loadouts: HashMap<String, LoadoutRow>,
    inventory: Vec<(String, i64)>,
    battles: Vec<BattleRow>,
    pair_cooldowns: Vec<PairCooldownRow>,
}

/// Row locks held by one transaction.
///
/// Registry entries nobody else holds or waits on are pruned on release.
struct RowLocks {
    registry: LockRegistry,
    guards: BTreeMap<String, OwnedMutexGuard<()>>,
}

impl Drop for RowLocks {
    fn drop(&mut self) {
        if self.guards.is_empty() {
            return;
        }
        let guards = std::mem::take(&mut self.guards);
        let released: Vec<String> = guards.into_keys().collect();
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        for key in released {
            if registry.get(&key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                registry.remove(&key);
            }
        }
    }
}

/// What a successful commit wrote.
#[derive(Debug, Clone, Default)]
pub struct CommitSummary {
    pub entry_ids: Vec<i64>,
}

/// A unit of work holding row locks and staged writes.
pub struct Transaction {
    db: Database,
    locks: RowLocks,
    staged: Staged,
}

impl Transaction {
    /// Take the row lock of every address not already held, in sorted order.
    pub async fn lock_rows(&mut self, addresses: &[Address]) {
        let mut wanted: Vec<&str> = addresses
            .iter()
            .map(Address::as_str)
            .filter(|a| !self.locks.guards.contains_key(*a))
            .collect();
        wanted.sort_unstable();
        wanted.dedup();

        if let (Some(first), Some((held, _))) = (wanted.first(), self.locks.guards.last_key_value()) {
            if *first < held.as_str() {
                tracing::warn!(
                    address = %first,
                    highest_held = %held,
                    "Row lock requested out of order; lock all rows up front"
                );
            }
        }

        for key in wanted {
            let lock = self.db.row_lock(key);
            let guard = lock.lock_owned().await;
            self.locks.guards.insert(key.to_string(), guard);
        }
    }

    pub async fn latest_balance(&self, address: &Address) -> Result<Decimal, StorageError> {
        if let Some(balance) = self.staged.balances.get(address.as_str()) {
            return Ok(*balance);
        }
        let conn = self.db.conn.lock().await;
        queries::latest_balance(&conn, address)
    }

    pub fn stage_entry(
        &mut self,
        address: &Address,
        reason: LedgerReason,
        delta: Decimal,
        balance_after: Decimal,
        metadata: &serde_json::Value,
    ) -> Result<(), StorageError> {
        self.staged.entries.push(LedgerEntryRow {
            id: 0,
            address: address.to_string(),
            reason: reason.to_string(),
            delta: delta.to_string(),
            balance_after: balance_after.to_string(),
            created_at: Utc::now().timestamp_millis(),
            metadata: serde_json::to_string(metadata)?,
        });
        self.staged.balances.insert(address.to_string(), balance_after);
        Ok(())
    }

    pub async fn bloblet(&self, address: &Address) -> Result<Option<Bloblet>, StorageError> {
        let conn = self.db.conn.lock().await;
        queries::bloblet(&conn, address)
    }

    pub async fn care_state(&self, address: &Address) -> Result<Option<CareState>, StorageError> {
        if let Some(row) = self.staged.care.get(address.as_str()) {
            return row.decode().map(Some);
        }
        let conn = self.db.conn.lock().await;
        queries::care_state(&conn, address)?
            .as_ref()
            .map(CareStateRow::decode)
            .transpose()
    }

    pub fn put_care_state(&mut self, address: &Address, state: &CareState, now: DateTime<Utc>) -> Result<(), StorageError> {
        let row = CareStateRow::new(address, state, now)?;
        self.staged.care.insert(address.to_string(), row);
        Ok(())
    }

    pub async fn loadout(&self, address: &Address) -> Result<Option<Loadout>, StorageError> {
        if let Some(row) = self.staged.loadouts.get(address.as_str()) {
            return Ok(Some(Loadout {
                weapon_item_id: row.weapon_item_id,
                shield_item_id: row.shield_item_id,
            }));
        }
        let conn = self.db.conn.lock().await;
        queries::loadout(&conn, address)
    }

    pub fn put_loadout(&mut self, address: &Address, loadout: Loadout) {
        self.staged.loadouts.insert(address.to_string(), loadout_row(address, loadout));
    }

    pub fn add_to_inventory(&mut self, address: &Address, item_id: i64) {
        self.staged.inventory.push((address.to_string(), item_id));
    }

    pub async fn pair_cooldown(&self, address: &Address, opponent: &Address) -> Result<Option<DateTime<Utc>>, StorageError> {
        let conn = self.db.conn.lock().await;
        queries::pair_cooldown(&conn, address, opponent)
    }

    pub fn insert_pair_cooldown(&mut self, address: &Address, opponent: &Address, until: DateTime<Utc>) {
        self.staged.pair_cooldowns.push(PairCooldownRow {
            address: address.to_string(),
            opponent: opponent.to_string(),
            until: until.timestamp_millis(),
        });
    }

    pub fn insert_battle(&mut self, result: &BattleResult) -> Result<(), StorageError> {
        self.staged.battles.push(BattleRow::new(result)?);
        Ok(())
    }

    /// Apply every staged write in one SQLite transaction, then release the
    /// row locks. Any failure rolls the whole transaction back.
    pub async fn commit(self) -> Result<CommitSummary, StorageError> {
        let start = Instant::now();
        let Transaction { db, locks, staged } = self;

        let mut conn = db.conn.lock().await;
        let sql = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(backend)?;

        let mut summary = CommitSummary::default();
        let now_millis = Utc::now().timestamp_millis();

        for row in &staged.entries {
            summary.entry_ids.push(queries::insert_entry(&sql, row)?);
        }
        for (address, balance) in staged.balances {
            queries::upsert_balance(
                &sql,
                &BalanceRow {
                    address,
                    current_balance: balance.to_string(),
                    updated_at: now_millis,
                },
            )?;
        }
        for row in staged.care.values() {
            queries::upsert_care_state(&sql, row)?;
        }
        for row in staged.loadouts.values() {
            queries::upsert_loadout(&sql, row)?;
        }
        for (address, item_id) in &staged.inventory {
            queries::insert_inventory(&sql, address, *item_id)?;
        }
        for row in &staged.battles {
            queries::insert_battle(&sql, row)?;
        }
        for row in &staged.pair_cooldowns {
            queries::upsert_pair_cooldown(&sql, row)?;
        }

        if db.fail_next_commit.swap(false, Ordering::SeqCst) {
            tracing::error!(
                staged_entries = staged.entries.len(),
                "Commit aborted by injected failure; rolling back"
            );
            return Err(StorageError::CommitFailed("injected failure".to_string()));
        }

        sql.commit().map_err(|e| StorageError::CommitFailed(e.to_string()))?;
        drop(conn);
        drop(locks);

        tracing::debug!(
            entries = summary.entry_ids.len(),
            duration_ms = %start.elapsed().as_millis(),
            "Transaction committed"
        );

        Ok(summary)
    }
}
