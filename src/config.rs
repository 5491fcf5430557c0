use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

/// Credentials for the external ledger/reward service. All optional: when the
/// append side is incomplete the service runs against the mock ledger.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LedgerConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub topic_id: Option<String>,
    pub token_id: Option<String>,
    pub operator_account: Option<String>,
}

impl LedgerConfig {
    pub fn is_configured(&self) -> bool {
        self.base_url.is_some() && self.api_key.is_some() && self.topic_id.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Postgres when set, JSON file store otherwise.
    pub database_url: Option<String>,
    pub data_dir: PathBuf,
    pub jwt: JwtConfig,
    pub ledger: LedgerConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").ok();
        let data_dir = std::env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")
                .unwrap_or_else(|_| "dev_jwt_secret_for_demo_only".into()),
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "afyaukweli".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "afyaukweli-users".into()),
            ttl_minutes: std::env::var("JWT_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(60 * 24 * 7),
        };
        let ledger = LedgerConfig {
            base_url: std::env::var("LEDGER_BASE_URL").ok(),
            api_key: std::env::var("LEDGER_API_KEY").ok(),
            topic_id: std::env::var("LEDGER_TOPIC_ID").ok(),
            token_id: std::env::var("LEDGER_TOKEN_ID").ok(),
            operator_account: std::env::var("LEDGER_OPERATOR_ID").ok(),
        };
        Ok(Self {
            database_url,
            data_dir,
            jwt,
            ledger,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_config_requires_append_side() {
        let mut cfg = LedgerConfig::default();
        assert!(!cfg.is_configured());
        cfg.base_url = Some("https://ledger.example".into());
        cfg.api_key = Some("key".into());
        assert!(!cfg.is_configured());
        cfg.topic_id = Some("0.0.1234".into());
        assert!(cfg.is_configured());
        // token/operator only gate transfers, not appends
        assert!(cfg.token_id.is_none());
    }
}
