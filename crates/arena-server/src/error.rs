use arena_core::{AddressError, BattleError, CareError, ErrorClass, LedgerError, StorageError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid address {input}: {source}")]
    InvalidAddress { input: String, source: AddressError },

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Care(#[from] CareError),

    #[error(transparent)]
    Battle(#[from] BattleError),
}

impl AppError {
    pub fn invalid_address(input: &str, source: AddressError) -> Self {
        AppError::InvalidAddress {
            input: input.to_string(),
            source,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    class: Option<ErrorClass>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

/// Status, stable code and client-facing message for one error.
struct Rendered {
    status: StatusCode,
    code: String,
    message: &'static str,
    class: Option<ErrorClass>,
    details: Option<serde_json::Value>,
}

impl Rendered {
    fn new(status: StatusCode, code: &str, message: &'static str) -> Self {
        Self {
            status,
            code: code.to_string(),
            message,
            class: None,
            details: None,
        }
    }

    fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

fn render_storage(e: &StorageError) -> Rendered {
    tracing::error!(error = %e, error_code = "STORAGE_ERROR", "Storage failure");
    Rendered::new(StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR", "Storage failure")
}

fn render_ledger(e: &LedgerError) -> Rendered {
    match e {
        LedgerError::Disabled => {
            tracing::warn!(error_code = "LEDGER_DISABLED", "Ledger write refused while disabled");
            Rendered::new(StatusCode::SERVICE_UNAVAILABLE, "LEDGER_DISABLED", "Reward ledger is disabled")
        }
        LedgerError::InsufficientBalance { required, available } => {
            tracing::info!(required = %required, available = %available, error_code = "INSUFFICIENT_BALANCE", "Insufficient balance");
            Rendered::new(StatusCode::CONFLICT, "INSUFFICIENT_BALANCE", "Insufficient balance")
                .with_details(json!({ "required": required, "available": available }))
        }
        LedgerError::InvalidAmount(amount) => {
            tracing::info!(amount = %amount, error_code = "INVALID_AMOUNT", "Non-positive amount refused");
            Rendered::new(StatusCode::BAD_REQUEST, "INVALID_AMOUNT", "Amount must be positive")
                .with_details(json!({ "amount": amount }))
        }
        LedgerError::Overflow { address } => {
            tracing::warn!(address = %address, error_code = "AMOUNT_OUT_OF_RANGE", "Balance arithmetic overflowed");
            Rendered::new(StatusCode::BAD_REQUEST, "AMOUNT_OUT_OF_RANGE", "Amount out of range")
        }
        LedgerError::StorageFailure(e) => render_storage(e),
    }
}

fn render_care(e: &CareError) -> Rendered {
    match e {
        CareError::ChargeCooldown { ready_at } => {
            tracing::info!(ready_at = %ready_at, error_code = "CHARGE_COOLDOWN", "Charge on cooldown");
            Rendered::new(StatusCode::CONFLICT, "CHARGE_COOLDOWN", "Charge is on cooldown")
                .with_details(json!({ "readyAt": ready_at }))
        }
        CareError::BlobletNotFound(address) => {
            tracing::info!(address = %address, error_code = "BLOBLET_NOT_FOUND", "Bloblet not found");
            Rendered::new(StatusCode::NOT_FOUND, "BLOBLET_NOT_FOUND", "Bloblet not found")
        }
        CareError::BlobletDead(address) => {
            tracing::info!(address = %address, error_code = "BLOBLET_DEAD", "Bloblet is dead");
            Rendered::new(StatusCode::CONFLICT, "BLOBLET_DEAD", "Bloblet is dead")
        }
        CareError::FastForwardUnavailable(reason) => {
            tracing::info!(reason = %reason, error_code = "FAST_FORWARD_UNAVAILABLE", "Fast-forward unavailable");
            Rendered::new(StatusCode::CONFLICT, "FAST_FORWARD_UNAVAILABLE", "Fast-forward unavailable")
                .with_details(json!({ "reason": reason }))
        }
        CareError::Ledger(e) => render_ledger(e),
        CareError::Storage(e) => render_storage(e),
    }
}

fn render_battle(e: &BattleError) -> Rendered {
    match e {
        BattleError::Rejected { kind, details } => {
            let code = kind.code().to_string();
            tracing::warn!(error_code = %code, class = ?kind.class(), "Battle rejected");
            let status = match kind.class() {
                ErrorClass::Transient => StatusCode::TOO_MANY_REQUESTS,
                ErrorClass::ClientFixable => StatusCode::UNPROCESSABLE_ENTITY,
            };
            Rendered {
                status,
                code,
                message: "Battle rejected",
                class: Some(kind.class()),
                details: details.clone(),
            }
        }
        BattleError::Ledger(e) => render_ledger(e),
        BattleError::Storage(e) => render_storage(e),
    }
}

impl AppError {
    fn render(&self) -> Rendered {
        match self {
            AppError::InvalidAddress { input, source } => {
                tracing::warn!(input = %input, reason = %source, error_code = "INVALID_ADDRESS", "Invalid wallet address");
                Rendered::new(StatusCode::BAD_REQUEST, "INVALID_ADDRESS", "Invalid wallet address")
                    .with_details(json!({ "input": input }))
            }
            AppError::InvalidParam(param) => {
                tracing::warn!(param = %param, error_code = "INVALID_PARAM", "Invalid parameter");
                Rendered::new(StatusCode::BAD_REQUEST, "INVALID_PARAM", "Invalid parameter")
                    .with_details(json!({ "param": param }))
            }
            AppError::NotFound(what) => {
                tracing::info!(what = %what, error_code = "NOT_FOUND", "Resource not found");
                Rendered::new(StatusCode::NOT_FOUND, "NOT_FOUND", "Not found")
            }
            AppError::Ledger(e) => render_ledger(e),
            AppError::Storage(e) => render_storage(e),
            AppError::Care(e) => render_care(e),
            AppError::Battle(e) => render_battle(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let rendered = self.render();

        tracing::debug!(
            status_code = %rendered.status.as_u16(),
            error_code = %rendered.code,
            "Returning error response"
        );

        let body = Json(ErrorResponse {
            error: rendered.message,
            code: rendered.code,
            class: rendered.class,
            details: rendered.details,
        });

        (rendered.status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
