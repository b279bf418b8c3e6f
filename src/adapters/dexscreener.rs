//! Dexscreener Provider Adapter
//!
//! Implements the `QuoteProvider` port over the Dexscreener token endpoint,
//! and decodes its payloads into `TokenQuote` for consumers that render
//! them. The cache core never decodes payloads.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::domain::ports::QuoteProvider;
use crate::error::{Error, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the provider client
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Endpoint that the item key is appended to
    pub base_url: String,

    /// Per-request timeout
    pub timeout: Duration,

    /// Idle keep-alive connections kept per host
    pub max_idle_per_host: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.dexscreener.com/latest/dex/tokens".to_string(),
            timeout: Duration::from_secs(10),
            max_idle_per_host: 50,
        }
    }
}

// =============================================================================
// Provider
// =============================================================================

/// Dexscreener HTTP client. One GET per call, no retries.
pub struct DexscreenerProvider {
    config: ProviderConfig,
    client: Client,
}

impl DexscreenerProvider {
    /// Create a new provider client
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(config.max_idle_per_host)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), key)
    }
}

#[async_trait]
impl QuoteProvider for DexscreenerProvider {
    #[instrument(skip(self), fields(provider = "dexscreener"))]
    async fn fetch(&self, key: &str) -> Result<Bytes> {
        let url = self.url_for(key);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(Error::ProviderConnection)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::ProviderStatus {
                key: key.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(Error::ProviderConnection)?;
        if body.is_empty() {
            return Err(Error::ProviderEmpty {
                key: key.to_string(),
            });
        }

        debug!(bytes = body.len(), "Fetched provider payload");
        Ok(body)
    }

    fn name(&self) -> &str {
        "dexscreener"
    }
}

// =============================================================================
// Quote Decoding
// =============================================================================

/// Display-ready summary of one token payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenQuote {
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub price_usd: Option<f64>,
    pub liquidity_usd: Option<f64>,
    pub fdv: Option<f64>,
    pub change_24h: Option<f64>,
    pub url: Option<String>,
    pub decoded_at: DateTime<Utc>,
}

impl TokenQuote {
    /// Decode a raw provider payload.
    ///
    /// Fields are taken from the top level first and then from the first
    /// trading pair. Returns `Ok(None)` when the payload is JSON but not an
    /// object.
    pub fn from_payload(payload: &[u8]) -> Result<Option<Self>> {
        let data: Value = serde_json::from_slice(payload)?;
        if !data.is_object() {
            return Ok(None);
        }

        let pair = data
            .get("pairs")
            .and_then(Value::as_array)
            .and_then(|pairs| pairs.first());
        let base_token = pair
            .and_then(|p| p.get("baseToken"))
            .or_else(|| data.get("baseToken"))
            .or_else(|| data.get("token"));

        let field = |path: &[&str]| first_of(&data, pair, path);

        let price_usd = field(&["priceUsd"])
            .or_else(|| base_token.and_then(|t| t.get("priceUsd")))
            .or_else(|| pair.and_then(|p| p.get("price")))
            .and_then(sanitize_number);
        let liquidity_usd = field(&["liquidity", "usd"])
            .or_else(|| field(&["liquidityUsd"]))
            .and_then(sanitize_number);
        let fdv = field(&["fdv"])
            .or_else(|| data.get("fdvUsd"))
            .and_then(sanitize_number);
        let change_24h = field(&["priceChange", "h24"])
            .or_else(|| field(&["priceChange", "24h"]))
            .or_else(|| data.get("priceChange24h"))
            .and_then(sanitize_number);

        let text = |v: Option<&Value>| v.and_then(Value::as_str).map(str::to_string);

        Ok(Some(Self {
            name: text(base_token.and_then(|t| t.get("name")).or_else(|| data.get("name"))),
            symbol: text(
                base_token
                    .and_then(|t| t.get("symbol"))
                    .or_else(|| data.get("symbol")),
            ),
            price_usd,
            liquidity_usd,
            fdv,
            change_24h,
            url: text(field(&["url"])),
            decoded_at: Utc::now(),
        }))
    }
}

fn first_of<'a>(data: &'a Value, pair: Option<&'a Value>, path: &[&str]) -> Option<&'a Value> {
    lookup(data, path).or_else(|| pair.and_then(|p| lookup(p, path)))
}

fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter()
        .try_fold(value, |v, segment| v.get(*segment))
        .filter(|v| !v.is_null())
}

/// Numbers may arrive as JSON numbers or as strings like "$1,234.56" / "+12.3%".
fn sanitize_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_numeric_str(s),
        _ => None,
    }
}

fn parse_numeric_str(s: &str) -> Option<f64> {
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, 'e' | 'E' | '+' | '-' | '.'))
        .collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == "-" {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

// =============================================================================
// Tests
// =============================================================================
