// =============================================================================
// Venue info client — public HTTP endpoint (single POST URL)
// =============================================================================
//
// The venue exposes one POST endpoint accepting `{ "type": ..., ... }` JSON
// bodies. Prices and sizes arrive as decimal strings and are parsed into
// `Decimal` at this boundary; nothing downstream touches the raw payload.
//
// Retry policy: exponential backoff with 1 s base, up to 3 attempts, 30 s
// total budget. Responses classified invalid or unauthorized are never
// retried.
// =============================================================================

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::error::{VenueError, VenueResult};

/// Maximum attempts per logical request.
const MAX_ATTEMPTS: u32 = 3;
/// Backoff base delay.
const BACKOFF_BASE: Duration = Duration::from_secs(1);
/// Total budget across all attempts of one logical request.
const TOTAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Perp metadata for one listed asset.
#[derive(Debug, Clone)]
pub struct AssetMeta {
    pub name: String,
    pub sz_decimals: u32,
    pub max_leverage: u32,
}

/// Funding / open-interest context for one asset, positionally paired with
/// the universe entry of the same index.
#[derive(Debug, Clone)]
pub struct AssetCtx {
    pub funding_rate: Decimal,
    /// Wire field `premium`. Carried opaquely; the engine attaches no
    /// semantics to it.
    pub predicted_rate: Decimal,
    pub open_interest: Decimal,
    pub day_volume: Decimal,
    pub mark_price: Decimal,
}

/// One historical candle from `candleSnapshot`.
#[derive(Debug, Clone)]
pub struct InfoCandle {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Client for the venue's public info endpoint.
#[derive(Clone)]
pub struct InfoClient {
    url: String,
    client: reqwest::Client,
}

impl InfoClient {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            url: url.into(),
            client,
        }
    }

    // -------------------------------------------------------------------------
    // Request plumbing
    // -------------------------------------------------------------------------

    /// POST `body` with the standard retry policy and return the parsed JSON.
    async fn request(&self, body: Value) -> VenueResult<Value> {
        let started = tokio::time::Instant::now();

        for attempt in 0..MAX_ATTEMPTS {
            if started.elapsed() >= TOTAL_TIMEOUT {
                return Err(VenueError::Timeout);
            }

            match self.request_once(&body).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt + 1 < MAX_ATTEMPTS => {
                    let delay = BACKOFF_BASE * 2u32.pow(attempt);
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "info request failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(VenueError::Timeout)
    }

    async fn request_once(&self, body: &Value) -> VenueResult<Value> {
        let resp = self
            .client
            .post(&self.url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    VenueError::Timeout
                } else {
                    VenueError::Transport(e.to_string())
                }
            })?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(VenueError::RateLimited);
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(VenueError::Unauthorized(format!("status {status}")));
        }
        if status.is_server_error() {
            return Err(VenueError::Transport(format!("status {status}")));
        }
        if !status.is_success() {
            return Err(VenueError::InvalidResponse(format!("status {status}")));
        }

        resp.json::<Value>()
            .await
            .map_err(|e| VenueError::InvalidResponse(e.to_string()))
    }

    // -------------------------------------------------------------------------
    // Info operations
    // -------------------------------------------------------------------------

    /// `allMids` — mid price per coin.
    pub async fn all_mids(&self) -> VenueResult<HashMap<String, Decimal>> {
        let body = self.request(json!({ "type": "allMids" })).await?;
        let map = body
            .as_object()
            .ok_or_else(|| VenueError::InvalidResponse("allMids is not an object".into()))?;

        let mut mids = HashMap::with_capacity(map.len());
        for (coin, px) in map {
            if let Some(price) = parse_decimal(px) {
                mids.insert(coin.clone(), price);
            }
        }
        debug!(coins = mids.len(), "allMids fetched");
        Ok(mids)
    }

    /// `meta` — the listed universe with size decimals and leverage caps.
    pub async fn meta(&self) -> VenueResult<Vec<AssetMeta>> {
        let body = self.request(json!({ "type": "meta" })).await?;
        parse_universe(&body)
    }

    /// `metaAndAssetCtxs` — positional `[meta, assetCtxs[]]` response,
    /// zipped into `(AssetMeta, AssetCtx)` pairs by index.
    pub async fn meta_and_asset_ctxs(&self) -> VenueResult<Vec<(AssetMeta, AssetCtx)>> {
        let body = self.request(json!({ "type": "metaAndAssetCtxs" })).await?;
        let arr = body
            .as_array()
            .filter(|a| a.len() >= 2)
            .ok_or_else(|| VenueError::InvalidResponse("metaAndAssetCtxs is not a pair".into()))?;

        let universe = parse_universe(&arr[0])?;
        let ctxs = arr[1]
            .as_array()
            .ok_or_else(|| VenueError::InvalidResponse("assetCtxs is not an array".into()))?;

        let pairs = universe
            .into_iter()
            .zip(ctxs.iter())
            .map(|(meta, ctx)| (meta, parse_asset_ctx(ctx)))
            .collect();
        Ok(pairs)
    }

    /// `candleSnapshot` — historical candles for one coin and interval.
    pub async fn candle_snapshot(
        &self,
        coin: &str,
        interval: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> VenueResult<Vec<InfoCandle>> {
        let body = self
            .request(json!({
                "type": "candleSnapshot",
                "req": { "coin": coin, "interval": interval, "startTime": start_ms, "endTime": end_ms }
            }))
            .await?;

        let arr = body
            .as_array()
            .ok_or_else(|| VenueError::InvalidResponse("candleSnapshot is not an array".into()))?;

        let mut candles = Vec::with_capacity(arr.len());
        for entry in arr {
            let (Some(t), Some(o), Some(h), Some(l), Some(c), Some(v)) = (
                entry["t"].as_i64(),
                parse_decimal(&entry["o"]),
                parse_decimal(&entry["h"]),
                parse_decimal(&entry["l"]),
                parse_decimal(&entry["c"]),
                parse_decimal(&entry["v"]),
            ) else {
                // Malformed entries are dropped, not fatal.
                continue;
            };
            candles.push(InfoCandle {
                open_time: t,
                open: o,
                high: h,
                low: l,
                close: c,
                volume: v,
            });
        }
        debug!(coin, interval, count = candles.len(), "candle snapshot fetched");
        Ok(candles)
    }

    /// `fundingHistory` — `(time, rate)` pairs since `start_ms`.
    pub async fn funding_history(
        &self,
        coin: &str,
        start_ms: i64,
    ) -> VenueResult<Vec<(i64, Decimal)>> {
        let body = self
            .request(json!({ "type": "fundingHistory", "coin": coin, "startTime": start_ms }))
            .await?;

        let arr = body
            .as_array()
            .ok_or_else(|| VenueError::InvalidResponse("fundingHistory is not an array".into()))?;

        Ok(arr
            .iter()
            .filter_map(|e| {
                let time = e["time"].as_i64()?;
                let rate = parse_decimal(&e["fundingRate"])?;
                Some((time, rate))
            })
            .collect())
    }
}

impl std::fmt::Debug for InfoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfoClient").field("url", &self.url).finish()
    }
}

// -----------------------------------------------------------------------------
// Payload parsing
// -----------------------------------------------------------------------------

/// Parse a JSON value that may be a decimal string or a bare number.
pub(crate) fn parse_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => Decimal::from_str(s).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

fn parse_universe(meta: &Value) -> VenueResult<Vec<AssetMeta>> {
    let universe = meta["universe"]
        .as_array()
        .ok_or_else(|| VenueError::InvalidResponse("meta missing universe".into()))?;

    Ok(universe
        .iter()
        .filter_map(|entry| {
            Some(AssetMeta {
                name: entry["name"].as_str()?.to_string(),
                sz_decimals: entry["szDecimals"].as_u64().unwrap_or(2) as u32,
                max_leverage: entry["maxLeverage"].as_u64().unwrap_or(5) as u32,
            })
        })
        .collect())
}

fn parse_asset_ctx(ctx: &Value) -> AssetCtx {
    AssetCtx {
        funding_rate: parse_decimal(&ctx["funding"]).unwrap_or_default(),
        predicted_rate: parse_decimal(&ctx["premium"]).unwrap_or_default(),
        open_interest: parse_decimal(&ctx["openInterest"]).unwrap_or_default(),
        day_volume: parse_decimal(&ctx["dayNtlVlm"]).unwrap_or_default(),
        mark_price: parse_decimal(&ctx["markPx"]).unwrap_or_default(),
    }
}
