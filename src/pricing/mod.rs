//! Token pricing with a three-tier source chain.
//!
//! Resolution order for a model id:
//!   1. Local cache younger than the validity window
//!   2. Network fetch of the public table (async path only), cached atomically
//!   3. Local cache of any age
//!   4. Hardcoded fallback table
//!
//! Network and cache-write failures never surface; the chain falls through.

mod cache;
mod fallback;

pub use cache::{PricingCache, CACHE_FILENAME};
pub use fallback::{base_model_name, fallback_rates, BASELINE_MODEL};

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use crate::types::{Error, PricingConfig, Result};

/// USD per million tokens for each token category.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelRates {
    pub input_rate: f64,
    pub output_rate: f64,
    pub cache_write_rate: f64,
    pub cache_read_rate: f64,
}

/// Token counts for one session. Missing or null counts read as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    #[serde(default, deserialize_with = "zero_if_null")]
    pub input_tokens: u64,
    #[serde(default, deserialize_with = "zero_if_null")]
    pub output_tokens: u64,
    #[serde(
        default,
        alias = "cache_creation_input_tokens",
        deserialize_with = "zero_if_null"
    )]
    pub cache_creation_tokens: u64,
    #[serde(
        default,
        alias = "cache_read_input_tokens",
        deserialize_with = "zero_if_null"
    )]
    pub cache_read_tokens: u64,
}

impl TokenCounts {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_creation_tokens + self.cache_read_tokens
    }
}

fn zero_if_null<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.unwrap_or(0))
}

/// Cost per token category, USD, rounded to 6 decimals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub input_cost: f64,
    pub output_cost: f64,
    pub cache_creation_cost: f64,
    pub cache_read_cost: f64,
    pub total_cost: f64,
}

/// Round to 6 decimal places.
pub fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

fn token_cost(tokens: u64, rate_per_million: f64) -> f64 {
    (tokens as f64 / 1_000_000.0) * rate_per_million
}

/// Apply rates to token counts.
pub fn cost_for_rates(tokens: &TokenCounts, rates: &ModelRates) -> CostBreakdown {
    let input_cost = token_cost(tokens.input_tokens, rates.input_rate);
    let output_cost = token_cost(tokens.output_tokens, rates.output_rate);
    let cache_creation_cost = token_cost(tokens.cache_creation_tokens, rates.cache_write_rate);
    let cache_read_cost = token_cost(tokens.cache_read_tokens, rates.cache_read_rate);
    let total_cost = input_cost + output_cost + cache_creation_cost + cache_read_cost;

    CostBreakdown {
        input_cost: round6(input_cost),
        output_cost: round6(output_cost),
        cache_creation_cost: round6(cache_creation_cost),
        cache_read_cost: round6(cache_read_cost),
        total_cost: round6(total_cost),
    }
}

/// Resolves per-model rates from cache, network, or the fallback table.
#[derive(Debug, Clone)]
pub struct PricingResolver {
    config: PricingConfig,
    cache_file: PathBuf,
    client: reqwest::Client,
}

impl PricingResolver {
    pub fn new(config: PricingConfig) -> Self {
        let cache_file = config.cache_dir.join(CACHE_FILENAME);
        let client = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("pricing http client build failed, using defaults: {}", e);
                reqwest::Client::new()
            });
        Self {
            config,
            cache_file,
            client,
        }
    }

    pub fn cache_file(&self) -> &Path {
        &self.cache_file
    }

    fn load_cache(&self) -> Option<PricingCache> {
        if !self.cache_file.exists() {
            return None;
        }
        match PricingCache::load(&self.cache_file) {
            Ok(cache) => Some(cache),
            Err(e) => {
                tracing::warn!("pricing cache unreadable: {}", e);
                None
            }
        }
    }

    /// Cache-or-fallback lookup; never touches the network.
    pub fn get_rates(&self, model: &str) -> ModelRates {
        if let Some(cache) = self.load_cache() {
            if let Some(rates) = cache.rates_for(model) {
                let now = Utc::now();
                if cache.is_fresh(self.config.cache_validity, now) {
                    tracing::debug!(model, "pricing from cache");
                } else {
                    tracing::warn!(
                        model,
                        age_hours = cache.age(now).as_secs() / 3600,
                        "pricing from expired cache"
                    );
                }
                return rates;
            }
        }
        tracing::debug!(model, "pricing from fallback table");
        fallback_rates(model)
    }

    /// Like [`get_rates`](Self::get_rates) but refreshes a stale cache from the network first.
    pub async fn get_rates_async(&self, model: &str) -> ModelRates {
        if let Some(cache) = self.load_cache() {
            if cache.is_fresh(self.config.cache_validity, Utc::now()) {
                if let Some(rates) = cache.rates_for(model) {
                    tracing::debug!(model, "pricing from cache");
                    return rates;
                }
            }
        }

        if self.refresh_cache().await {
            if let Some(rates) = self.load_cache().and_then(|c| c.rates_for(model)) {
                tracing::info!(model, "pricing from freshly fetched table");
                return rates;
            }
        }

        self.get_rates(model)
    }

    /// Fetch the public table and replace the cache. Returns whether the cache was written.
    pub async fn refresh_cache(&self) -> bool {
        let pricing = match self.fetch_latest().await {
            Ok(pricing) => pricing,
            Err(e) => {
                tracing::warn!("pricing fetch failed: {}", e);
                return false;
            }
        };
        let cache = PricingCache::new(self.config.source_url.clone(), pricing);
        match cache.save(&self.cache_file) {
            Ok(()) => {
                tracing::info!(path = %self.cache_file.display(), "pricing cache updated");
                true
            }
            Err(e) => {
                tracing::warn!("pricing cache write failed: {}", e);
                false
            }
        }
    }

    async fn fetch_latest(&self) -> Result<Map<String, Value>> {
        let response = self
            .client
            .get(&self.config.source_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::network(e.to_string()))?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::network(format!("invalid pricing payload: {e}")))?;
        match body {
            Value::Object(map) => Ok(map),
            other => Err(Error::network(format!(
                "pricing payload is not an object: {}",
                type_name(&other)
            ))),
        }
    }

    /// Cost breakdown using the sync chain.
    pub fn calculate_cost(&self, tokens: &TokenCounts, model: &str) -> CostBreakdown {
        cost_for_rates(tokens, &self.get_rates(model))
    }

    /// Cost breakdown using the async chain (may refresh the cache).
    pub async fn calculate_cost_async(&self, tokens: &TokenCounts, model: &str) -> CostBreakdown {
        cost_for_rates(tokens, &self.get_rates_async(model).await)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
