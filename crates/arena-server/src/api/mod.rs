pub mod dto;
pub mod handlers;

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::AppState;

pub fn create_router() -> Router<AppState> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        .route("/api/v1/rules", get(handlers::get_rules))
        // Reward ledger
        .route("/api/v1/balances", get(handlers::get_balances))
        .route("/api/v1/ledger/entries", post(handlers::apply_entries))
        .route("/api/v1/ledger/debit", post(handlers::debit))
        .route("/api/v1/ledger/{address}", get(handlers::get_ledger))
        // Bloblet care
        .route("/api/v1/bloblets/{address}", put(handlers::upsert_bloblet))
        .route("/api/v1/bloblets/{address}/loadout", get(handlers::get_loadout))
        .route("/api/v1/bloblets/{address}/charge-status", get(handlers::get_charge_status))
        .route("/api/v1/bloblets/{address}/charge", post(handlers::charge))
        .route("/api/v1/bloblets/{address}/fast-forward", post(handlers::fast_forward))
        .route(
            "/api/v1/bloblets/{address}/fast-forward-debt",
            post(handlers::impose_fast_forward_debt),
        )
        // Battles
        .route("/api/v1/battles", post(handlers::run_battle))
        .route("/api/v1/battles/{id}", get(handlers::get_battle))
}
