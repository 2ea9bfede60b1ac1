//! On-disk pricing cache.
//!
//! File layout: `{ "fetched_at": <epoch>, "source_url": <url>, "pricing": {...} }`.
//! Older writers used camelCase keys and millisecond timestamps; both are read.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Map, Value};
use std::path::Path;
use std::time::Duration;

use super::fallback::{base_model_name, strip_context_suffix};
use super::{round6, ModelRates};
use crate::fsutil;
use crate::types::{Error, Result};

/// Cache file name inside the pricing cache directory.
pub const CACHE_FILENAME: &str = "litellm_pricing_cache.json";

// Epoch values above this are milliseconds.
const MILLIS_THRESHOLD: f64 = 1e12;

/// Parsed pricing cache.
#[derive(Debug, Clone)]
pub struct PricingCache {
    pub fetched_at: DateTime<Utc>,
    pub source_url: Option<String>,
    pub pricing: Map<String, Value>,
}

impl PricingCache {
    pub fn new(source_url: impl Into<String>, pricing: Map<String, Value>) -> Self {
        Self {
            fetched_at: Utc::now(),
            source_url: Some(source_url.into()),
            pricing,
        }
    }

    /// Load the cache file. Freshness is never stored; callers compute it from `fetched_at`.
    pub fn load(path: &Path) -> Result<Self> {
        let value: Value = fsutil::read_json(path)?;
        Self::from_value(&value)
            .ok_or_else(|| Error::parse(path, "pricing cache has no pricing table"))
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let pricing = obj.get("pricing")?.as_object()?.clone();
        let fetched_at = obj
            .get("fetched_at")
            .or_else(|| obj.get("fetchedAt"))
            .and_then(parse_timestamp)
            .unwrap_or_default();
        let source_url = obj
            .get("source_url")
            .or_else(|| obj.get("sourceUrl"))
            .and_then(Value::as_str)
            .map(str::to_string);
        Some(Self {
            fetched_at,
            source_url,
            pricing,
        })
    }

    pub fn to_value(&self) -> Value {
        json!({
            "fetched_at": self.fetched_at.timestamp_millis() as f64 / 1000.0,
            "source_url": self.source_url,
            "pricing": self.pricing,
        })
    }

    /// Write atomically (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        fsutil::atomic_write_json(path, &self.to_value())
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.fetched_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_fresh(&self, validity: Duration, now: DateTime<Utc>) -> bool {
        self.age(now) < validity
    }

    /// Look up per-million rates, trying common id variants.
    pub fn rates_for(&self, model: &str) -> Option<ModelRates> {
        let stripped = strip_context_suffix(model);
        let candidates = [
            model.to_string(),
            stripped.to_string(),
            format!("bedrock/{stripped}"),
            base_model_name(model),
        ];
        candidates
            .iter()
            .find_map(|id| self.pricing.get(id))
            .and_then(extract_rates)
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    if let Some(raw) = value.as_f64() {
        let secs = if raw > MILLIS_THRESHOLD { raw / 1000.0 } else { raw };
        let millis = (secs * 1000.0).round() as i64;
        return Utc.timestamp_millis_opt(millis).single();
    }
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

// LiteLLM stores USD per token.
fn extract_rates(info: &Value) -> Option<ModelRates> {
    let info = info.as_object()?;
    let per_million = |key: &str| {
        info.get(key)
            .and_then(Value::as_f64)
            .map(|per_token| round6(per_token * 1_000_000.0))
    };
    Some(ModelRates {
        input_rate: per_million("input_cost_per_token")?,
        output_rate: per_million("output_cost_per_token").unwrap_or(0.0),
        cache_write_rate: per_million("cache_creation_input_token_cost").unwrap_or(0.0),
        cache_read_rate: per_million("cache_read_input_token_cost").unwrap_or(0.0),
    })
}
