//! Pokémon TCG API client

use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::{debug, info};

use super::{CardCatalog, CardQuery, CardRecord};
use crate::config::CatalogSettings;
use crate::error::ScanError;

/// Body of a card search response
#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub data: Vec<CardRecord>,
}

impl SearchResponse {
    /// First record, the only one the scanner uses
    pub fn into_first(self) -> Option<CardRecord> {
        self.data.into_iter().next()
    }
}

/// Blocking client for `api.pokemontcg.io/v2/cards`
pub struct PokemonTcgCatalog {
    client: reqwest::Client,
    endpoint: String,
    runtime: Runtime,
}

impl PokemonTcgCatalog {
    pub fn new(settings: &CatalogSettings) -> Result<Self, ScanError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = settings.api_key.as_deref().filter(|k| !k.is_empty()) {
            let value = HeaderValue::from_str(key).map_err(ScanError::InvalidApiKey)?;
            headers.insert("X-Api-Key", value);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs.max(1)))
            .default_headers(headers)
            .build()?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
            runtime,
        })
    }

    async fn search(&self, query: &CardQuery) -> Result<SearchResponse, ScanError> {
        let q = query.to_search_string();
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("q", q.as_str()), ("pageSize", "1")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScanError::CatalogStatus {
                status: status.as_u16(),
            });
        }

        Ok(response.json::<SearchResponse>().await?)
    }
}

impl CardCatalog for PokemonTcgCatalog {
    fn find_card(&self, query: &CardQuery) -> Result<Option<CardRecord>, ScanError> {
        match &query.number {
            Some(number) => info!("Searching catalog for {} #{}", query.name, number),
            None => info!("Searching catalog for {}", query.name),
        }

        let response = self.runtime.block_on(self.search(query))?;
        debug!("Catalog returned {} records", response.data.len());
        Ok(response.into_first())
    }
}
