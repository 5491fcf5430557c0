use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use super::{mock_tx_hash, Ledger, LedgerEvent};
use crate::config::LedgerConfig;

#[derive(Debug, Deserialize)]
struct TxResponse {
    transaction_hash: String,
}

/// REST client for the hosted ledger service. Appends degrade to mock hashes
/// when the service misbehaves (local state is never blocked on it);
/// transfer errors propagate and the caller decides how to treat them.
pub struct RestLedger {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    topic_id: String,
    token_id: Option<String>,
    operator_account: Option<String>,
}

impl RestLedger {
    pub fn from_config(cfg: &LedgerConfig) -> anyhow::Result<Self> {
        let base_url = cfg
            .base_url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("LEDGER_BASE_URL is required"))?;
        let api_key = cfg
            .api_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("LEDGER_API_KEY is required"))?;
        let topic_id = cfg
            .topic_id
            .clone()
            .ok_or_else(|| anyhow::anyhow!("LEDGER_TOPIC_ID is required"))?;
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            topic_id,
            token_id: cfg.token_id.clone(),
            operator_account: cfg.operator_account.clone(),
        })
    }

    async fn post_tx(&self, url: String, body: serde_json::Value) -> anyhow::Result<String> {
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let tx: TxResponse = resp.json().await?;
        Ok(tx.transaction_hash)
    }
}

#[async_trait]
impl Ledger for RestLedger {
    async fn append_log(&self, event: &LedgerEvent) -> anyhow::Result<String> {
        let url = format!("{}/v1/topics/{}/messages", self.base_url, self.topic_id);
        let body = json!({ "message": event });
        match self.post_tx(url, body).await {
            Ok(hash) => Ok(hash),
            Err(e) => {
                warn!(error = %e, "ledger append failed, falling back to mock hash");
                Ok(mock_tx_hash())
            }
        }
    }

    async fn transfer_reward(&self, account_id: &str, amount: i64) -> anyhow::Result<String> {
        let Some(token_id) = &self.token_id else {
            // No reward token configured; mirror the append fallback so
            // approvals still record a hash.
            return Ok(mock_tx_hash());
        };
        let url = format!("{}/v1/tokens/{}/transfers", self.base_url, token_id);
        let body = json!({
            "from": self.operator_account,
            "to": account_id,
            "amount": amount,
        });
        self.post_tx(url, body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> LedgerConfig {
        LedgerConfig {
            base_url: Some("https://ledger.example/".into()),
            api_key: Some("key".into()),
            topic_id: Some("0.0.555".into()),
            token_id: None,
            operator_account: None,
        }
    }

    #[test]
    fn from_config_requires_append_credentials() {
        let ledger = RestLedger::from_config(&configured()).unwrap();
        assert_eq!(ledger.base_url, "https://ledger.example");
        assert!(RestLedger::from_config(&LedgerConfig::default()).is_err());
    }

    #[tokio::test]
    async fn transfer_without_token_yields_mock_hash() {
        let ledger = RestLedger::from_config(&configured()).unwrap();
        let hash = ledger.transfer_reward("0.0.1001", 10).await.unwrap();
        assert_eq!(hash.len(), 64);
    }

    #[tokio::test]
    async fn append_never_fails_even_when_unreachable() {
        let mut cfg = configured();
        cfg.base_url = Some("http://127.0.0.1:1".into());
        let ledger = RestLedger::from_config(&cfg).unwrap();
        let event = LedgerEvent::TaskApproval {
            task_id: "t".into(),
            supervisor_id: uuid::Uuid::new_v4(),
            approved: false,
            when: 0,
        };
        let hash = ledger.append_log(&event).await.unwrap();
        assert_eq!(hash.len(), 64);
    }
}
