use std::sync::Arc;

use tracing::{info, warn};

use crate::config::AppConfig;
use crate::ledger::{Ledger, MockLedger};
use crate::store::file::FileStore;
use crate::store::pg::PgStore;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub ledger: Arc<dyn Ledger>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        // One backend, chosen once. Everything downstream goes through the
        // Store trait and never branches on the mode again.
        let store: Arc<dyn Store> = match &config.database_url {
            Some(url) => {
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(10)
                    .connect(url)
                    .await?;
                if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
                    warn!(error = %e, "migrations folder not found or migration failed; continuing");
                }
                info!("using postgres store");
                Arc::new(PgStore::new(pool))
            }
            None => {
                info!(dir = %config.data_dir.display(), "DATABASE_URL not set, using file store");
                Arc::new(FileStore::open(config.data_dir.clone(), true)?)
            }
        };

        let ledger: Arc<dyn Ledger> = if config.ledger.is_configured() {
            info!("using external ledger");
            Arc::new(crate::ledger::rest::RestLedger::from_config(&config.ledger)?)
        } else {
            warn!("ledger credentials incomplete, using mock ledger");
            Arc::new(MockLedger)
        };

        Ok(Self {
            store,
            ledger,
            config,
        })
    }

    pub fn from_parts(
        store: Arc<dyn Store>,
        ledger: Arc<dyn Ledger>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            store,
            ledger,
            config,
        }
    }

    pub fn fake() -> Self {
        use crate::config::{JwtConfig, LedgerConfig};
        use uuid::Uuid;

        let dir = std::env::temp_dir().join(format!("afyaukweli-test-{}", Uuid::new_v4()));
        let store = Arc::new(FileStore::open(dir.clone(), false).expect("temp file store"));

        let config = Arc::new(AppConfig {
            database_url: None,
            data_dir: dir,
            jwt: JwtConfig {
                secret: "test".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 5,
            },
            ledger: LedgerConfig::default(),
        });

        Self {
            store,
            ledger: Arc::new(MockLedger),
            config,
        }
    }
}
