use arena_core::{Address, BattleRules, CareRules};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub care: CareRules,
    #[serde(default)]
    pub battle: BattleRules,
    /// Seed for reproducible battle draws. Never set in production.
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// SQLite database file. Parent directories are created on open.
    pub path: String,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    /// Administrative kill switch for every balance-mutating operation.
    pub enabled: bool,
    /// Receives the house cut of every battle.
    pub treasury_address: Address,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("database.path", "data/arena.db")?
            .set_default("ledger.enabled", true)?
            .set_default("ledger.treasury_address", "0x000000000000000000000000000000000000dEaD")?
            // Load from config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (ARENA__DATABASE__PATH, etc.)
            // Double underscore separates nested keys that contain underscores
            .add_source(
                Environment::with_prefix("ARENA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let battle = &self.battle;
        for (name, value) in [
            ("battle.critical_chance", battle.critical_chance),
            ("battle.transfer_rate", battle.transfer_rate),
            ("battle.critical_transfer_rate", battle.critical_transfer_rate),
            ("battle.house_cut_rate", battle.house_cut_rate),
            ("battle.loot_chance", battle.loot_chance),
            ("battle.critical_loot_chance", battle.critical_loot_chance),
        ] {
            if value < rust_decimal::Decimal::ZERO || value > rust_decimal::Decimal::ONE {
                return Err(ConfigError::Message(format!("{} must be within 0..=1, got {}", name, value)));
            }
        }
        if self.database.path.trim().is_empty() {
            return Err(ConfigError::Message("database.path must not be empty".to_string()));
        }
        if self.care.booster_window_secs > self.care.cooldown_secs {
            return Err(ConfigError::Message(
                "care.booster_window_secs must not exceed care.cooldown_secs".to_string(),
            ));
        }
        Ok(())
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
