use std::time::Instant;

use arena_core::{
    Address, BattleResult, Bloblet, CareState, ChargeStatus, DebitReceipt, LedgerReason, NewLedgerEntry,
};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::dto::*;
use crate::care::ChargeOutcome;
use crate::error::{AppError, AppResult};
use crate::AppState;

fn parse_address(raw: &str) -> AppResult<Address> {
    Address::parse(raw).map_err(|e| AppError::invalid_address(raw, e))
}

pub async fn health_check(State(state): State<AppState>) -> AppResult<Json<HealthResponse>> {
    let start = Instant::now();
    tracing::info!("Processing health check request");

    let db_status = match state.db.health_check().await {
        Ok(_) => {
            tracing::debug!("Store health check passed");
            "connected"
        }
        Err(e) => {
            tracing::warn!(error = %e, "Store health check failed");
            "disconnected"
        }
    };

    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: db_status.to_string(),
        ledger_enabled: state.ledger.is_enabled(),
    };

    tracing::info!(
        duration_ms = %start.elapsed().as_millis(),
        db_status = %db_status,
        "Health check completed"
    );

    Ok(Json(response))
}

pub async fn get_rules(State(state): State<AppState>) -> Json<RulesResponse> {
    Json(RulesResponse {
        care: state.config.care.clone(),
        battle: state.config.battle.clone(),
    })
}

pub async fn get_balances(
    State(state): State<AppState>,
    Query(query): Query<BalancesQuery>,
) -> AppResult<Json<BalancesResponse>> {
    let start = Instant::now();
    tracing::info!(addresses = %query.addresses, "Processing balances request");

    let mut addresses: Vec<Address> = Vec::new();
    for raw in query.addresses.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let address = parse_address(raw)?;
        if !addresses.contains(&address) {
            addresses.push(address);
        }
    }
    if addresses.is_empty() {
        return Err(AppError::InvalidParam("addresses must not be empty".to_string()));
    }

    let mut snapshots = state.ledger.fetch_reward_balances(&addresses).await?;
    let balances: Vec<BalanceDto> = addresses
        .iter()
        .filter_map(|address| snapshots.remove(address))
        .map(|snapshot| BalanceDto {
            address: snapshot.address,
            balance: snapshot.current_balance,
            updated_at: snapshot.updated_at,
        })
        .collect();

    tracing::info!(
        address_count = balances.len(),
        duration_ms = %start.elapsed().as_millis(),
        "Balances retrieved"
    );

    Ok(Json(BalancesResponse { balances }))
}

pub async fn apply_entries(
    State(state): State<AppState>,
    Json(request): Json<ApplyEntriesRequest>,
) -> AppResult<Json<ApplyEntriesResponse>> {
    let start = Instant::now();
    tracing::info!(entry_count = request.entries.len(), "Processing ledger entries request");

    if request.entries.is_empty() {
        return Err(AppError::InvalidParam("entries must not be empty".to_string()));
    }

    let mut entries = Vec::with_capacity(request.entries.len());
    for entry in request.entries {
        let address = parse_address(&entry.address)?;
        let reason = LedgerReason::from_str(&entry.reason)
            .ok_or_else(|| AppError::InvalidParam(format!("Invalid reason: {}", entry.reason)))?;
        entries.push(NewLedgerEntry::new(address, entry.delta, reason).with_metadata(entry.metadata));
    }

    let balances = state.ledger.apply_entries(entries).await?;
    let mut balances: Vec<BalanceDto> = balances
        .into_iter()
        .map(|(address, balance)| BalanceDto {
            address,
            balance,
            updated_at: None,
        })
        .collect();
    balances.sort_by(|a, b| a.address.cmp(&b.address));

    tracing::info!(
        address_count = balances.len(),
        duration_ms = %start.elapsed().as_millis(),
        "Ledger entries applied"
    );

    Ok(Json(ApplyEntriesResponse { balances }))
}

pub async fn debit(
    State(state): State<AppState>,
    Json(request): Json<DebitRequest>,
) -> AppResult<Json<DebitReceipt>> {
    let address = parse_address(&request.address)?;
    let reason = LedgerReason::from_str(&request.reason)
        .ok_or_else(|| AppError::InvalidParam(format!("Invalid reason: {}", request.reason)))?;
    if request.amount <= Decimal::ZERO {
        return Err(AppError::InvalidParam("amount must be positive".to_string()));
    }

    let receipt = state
        .ledger
        .debit(&address, request.amount, reason, request.metadata)
        .await?;
    Ok(Json(receipt))
}

pub async fn get_ledger(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> AppResult<Json<LedgerHistoryResponse>> {
    tracing::info!(address = %address, "Processing ledger history request");
    let address = parse_address(&address)?;

    let entries = state.ledger.history(&address).await?;
    let audit = state.ledger.verify(&address).await?;

    tracing::debug!(
        address = %address,
        entry_count = entries.len(),
        consistent = audit.is_consistent(),
        "Ledger history retrieved"
    );

    Ok(Json(LedgerHistoryResponse { address, entries, audit }))
}

pub async fn upsert_bloblet(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Json(request): Json<UpsertBlobletRequest>,
) -> AppResult<Json<Bloblet>> {
    let address = parse_address(&address)?;
    let bloblet = Bloblet {
        address,
        is_alive: request.is_alive,
        is_newcomer: request.is_newcomer,
    };
    state.db.upsert_bloblet(&bloblet).await?;

    tracing::info!(
        address = %bloblet.address,
        is_alive = bloblet.is_alive,
        is_newcomer = bloblet.is_newcomer,
        "Bloblet upserted"
    );

    Ok(Json(bloblet))
}

pub async fn get_loadout(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> AppResult<Json<LoadoutResponse>> {
    let address = parse_address(&address)?;
    if state.db.bloblet(&address).await?.is_none() {
        return Err(AppError::NotFound(format!("bloblet {}", address)));
    }

    let loadout = state.db.loadout(&address).await?.unwrap_or_default();
    let item = |id: Option<i64>| id.and_then(|id| state.catalog.get(id)).cloned();
    let inventory = state
        .db
        .inventory(&address)
        .await?
        .into_iter()
        .filter_map(|id| state.catalog.get(id).cloned())
        .collect();

    Ok(Json(LoadoutResponse {
        weapon: item(loadout.weapon_item_id),
        shield: item(loadout.shield_item_id),
        address,
        loadout,
        inventory,
    }))
}

pub async fn get_charge_status(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> AppResult<Json<ChargeStatus>> {
    let address = parse_address(&address)?;
    let status = state.care.build_charge_status(&address, Utc::now()).await?;
    tracing::debug!(address = %address, phase = ?status.state, "Charge status built");
    Ok(Json(status))
}

pub async fn charge(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> AppResult<Json<ChargeOutcome>> {
    tracing::info!(address = %address, "Processing charge request");
    let address = parse_address(&address)?;
    Ok(Json(state.care.charge(&address, Utc::now()).await?))
}

pub async fn fast_forward(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> AppResult<Json<ChargeStatus>> {
    tracing::info!(address = %address, "Processing fast-forward request");
    let address = parse_address(&address)?;
    Ok(Json(state.care.fast_forward(&address, Utc::now()).await?))
}

pub async fn impose_fast_forward_debt(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Json(request): Json<FastForwardDebtRequest>,
) -> AppResult<Json<CareState>> {
    let address = parse_address(&address)?;
    let now = Utc::now();
    if request.until <= now {
        return Err(AppError::InvalidParam("until must be in the future".to_string()));
    }
    Ok(Json(
        state
            .care
            .impose_fast_forward_debt(&address, request.until, now)
            .await?,
    ))
}

pub async fn run_battle(
    State(state): State<AppState>,
    Json(request): Json<BattleRequest>,
) -> AppResult<Json<BattleResult>> {
    let start = Instant::now();
    let attacker = parse_address(&request.attacker)?;
    let defender = parse_address(&request.defender)?;

    let result = state.battles.run_battle(&attacker, &defender).await?;

    tracing::info!(
        battle_id = %result.battle_id,
        winner = %result.winner_address(),
        duration_ms = %start.elapsed().as_millis(),
        "Battle request completed"
    );

    Ok(Json(result))
}

pub async fn get_battle(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<BattleResult>> {
    let battle_id = Uuid::parse_str(&id).map_err(|_| AppError::InvalidParam(format!("Invalid battle id: {}", id)))?;
    let result = state
        .battles
        .battle(battle_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("battle {}", battle_id)))?;

    if !arena_core::replay(&result) {
        tracing::warn!(battle_id = %battle_id, "Stored battle does not replay under its recorded rules");
    }

    Ok(Json(result))
}
