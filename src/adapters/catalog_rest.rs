//! Pocket catalog REST adapter.
//!
//! Read-only client for the admin-side catalog service; workflows resolve
//! the latest definition on every invocation instead of caching.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::config::CatalogConfig;
use crate::domain::{PocketConstituent, PocketDefinition};
use crate::engine::PocketCatalog;
use crate::error::{PocketError, Result};

#[derive(Debug, Deserialize)]
struct DefinitionWire {
    #[serde(default)]
    pocket_id: Option<String>,
    version: i32,
    constituents: Vec<ConstituentWire>,
}

#[derive(Debug, Deserialize)]
struct ConstituentWire {
    instrument_token: i64,
    exchange: String,
    trading_symbol: String,
    qty_per_lot: i64,
}

pub struct CatalogRestClient {
    http: Client,
    base_url: String,
}

impl CatalogRestClient {
    pub fn new(config: &CatalogConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent("pockets-catalog-adapter/0.1")
            .build()
            .map_err(|e| {
                PocketError::Internal(format!("failed to build catalog HTTP client: {}", e))
            })?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PocketCatalog for CatalogRestClient {
    async fn latest(&self, pocket_id: &str) -> Result<PocketDefinition> {
        let url = format!("{}/pockets/{}/latest", self.base_url, pocket_id);

        let resp = self.http.get(&url).send().await?;
        let status = resp.status();

        if status == StatusCode::NOT_FOUND {
            return Err(PocketError::PocketNotFound(pocket_id.to_string()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PocketError::Upstream(format!(
                "catalog lookup for {} failed: status={} body={}",
                pocket_id, status, body
            )));
        }

        let wire: DefinitionWire = resp.json().await.map_err(|e| {
            PocketError::Upstream(format!("malformed catalog response for {}: {}", pocket_id, e))
        })?;

        debug!(
            pocket_id,
            version = wire.version,
            constituents = wire.constituents.len(),
            "definition resolved"
        );

        Ok(PocketDefinition {
            pocket_id: wire.pocket_id.unwrap_or_else(|| pocket_id.to_string()),
            version: wire.version,
            constituents: wire
                .constituents
                .into_iter()
                .map(|c| PocketConstituent {
                    instrument_token: c.instrument_token,
                    exchange: c.exchange,
                    trading_symbol: c.trading_symbol,
                    qty_per_lot: c.qty_per_lot,
                })
                .collect(),
        })
    }
}
