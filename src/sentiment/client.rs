// =============================================================================
// Sentiment Client — strict-JSON advisory from an external LLM
// =============================================================================
//
// The client enforces a hard 15 s floor between any two requests and backs
// off for 2 minutes on a 429 (doubling on repeats, honouring Retry-After).
// A response that fails to parse yields no advisory; the trade decision
// proceeds without sentiment input.
// =============================================================================

use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

/// Hard floor between any two LLM requests.
const MIN_CALL_SPACING: Duration = Duration::from_secs(15);
/// Base backoff after a 429.
const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(120);
/// Request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Parsed advisory, mapped from the model's JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct SentimentAdvisory {
    /// bullish | bearish | neutral
    pub sentiment: String,
    /// [-100, 100]
    pub news_score: f64,
    pub should_boost: bool,
    pub should_avoid: bool,
    pub warnings: Vec<String>,
}

struct Throttle {
    last_call: Option<std::time::Instant>,
    backoff_until: Option<std::time::Instant>,
    consecutive_429: u32,
}

pub struct SentimentClient {
    url: String,
    api_key: String,
    model: String,
    http: reqwest::Client,
    throttle: Mutex<Throttle>,
}

impl SentimentClient {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            model: model.into(),
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("failed to build reqwest client"),
            throttle: Mutex::new(Throttle {
                last_call: None,
                backoff_until: None,
                consecutive_429: 0,
            }),
        }
    }

    /// Request a sentiment-only analysis. Returns `None` on throttle, HTTP
    /// failure, or parse failure; callers never depend on an advisory.
    pub async fn analyze(
        &self,
        symbol: &str,
        price_change_24h: f64,
        user_prompt: &str,
    ) -> Option<SentimentAdvisory> {
        // Spacing and backoff are checked first so a denied call costs nothing.
        {
            let throttle = self.throttle.lock();
            let now = std::time::Instant::now();
            if let Some(until) = throttle.backoff_until {
                if now < until {
                    debug!(symbol, "sentiment call suppressed by 429 backoff");
                    return None;
                }
            }
            if let Some(last) = throttle.last_call {
                if now.duration_since(last) < MIN_CALL_SPACING {
                    debug!(symbol, "sentiment call suppressed by 15s spacing");
                    return None;
                }
            }
        }
        self.throttle.lock().last_call = Some(std::time::Instant::now());

        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system_prompt() },
                { "role": "user", "content": user_message(symbol, price_change_24h, user_prompt) }
            ],
            "temperature": 0.2,
            "max_tokens": 400
        });

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                warn!(symbol, error = %e, "sentiment request failed");
                return None;
            }
        };

        if response.status().as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs);

            let mut throttle = self.throttle.lock();
            throttle.consecutive_429 += 1;
            let backoff = retry_after.unwrap_or_else(|| {
                RATE_LIMIT_BACKOFF * 2u32.pow(throttle.consecutive_429.saturating_sub(1).min(4))
            });
            throttle.backoff_until = Some(std::time::Instant::now() + backoff);
            warn!(
                symbol,
                backoff_s = backoff.as_secs(),
                "sentiment endpoint rate-limited"
            );
            return None;
        }

        if !response.status().is_success() {
            warn!(symbol, status = %response.status(), "sentiment endpoint error");
            return None;
        }
        self.throttle.lock().consecutive_429 = 0;

        let payload: Value = response.json().await.ok()?;
        let content = payload["choices"][0]["message"]["content"].as_str()?;

        let advisory = parse_advisory(content);
        match &advisory {
            Some(a) => info!(
                symbol,
                sentiment = %a.sentiment,
                news_score = a.news_score,
                boost = a.should_boost,
                avoid = a.should_avoid,
                "sentiment advisory received"
            ),
            None => debug!(symbol, "sentiment response unparseable, advisory dropped"),
        }
        advisory
    }
}

impl std::fmt::Debug for SentimentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentimentClient")
            .field("url", &self.url)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

fn system_prompt() -> &'static str {
    "You are a crypto market sentiment analyst. Respond with a single JSON \
     object and nothing else: {\"action\": \"buy\"|\"sell\"|\"avoid\"|\"neutral\", \
     \"confidence\": 0-100, \"newsScore\": -100 to 100, \"warnings\": [\"...\"]}. \
     No prose, no markdown."
}

fn user_message(symbol: &str, price_change_24h: f64, user_prompt: &str) -> String {
    let mut msg = format!(
        "Assess current news and social sentiment for {symbol}. \
         24h price change: {price_change_24h:.2}%."
    );
    if !user_prompt.is_empty() {
        msg.push_str("\nTrader context: ");
        msg.push_str(user_prompt);
    }
    msg
}

/// Parse the model's reply into an advisory. Tolerates markdown fences;
/// anything else unparseable yields `None`.
fn parse_advisory(content: &str) -> Option<SentimentAdvisory> {
    let trimmed = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let value: Value = serde_json::from_str(trimmed).ok()?;
    let action = value["action"].as_str()?.to_lowercase();
    let confidence = value["confidence"].as_f64().unwrap_or(0.0);
    let news_score = value["newsScore"].as_f64().unwrap_or(0.0).clamp(-100.0, 100.0);
    let warnings: Vec<String> = value["warnings"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|w| w.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    let sentiment = match action.as_str() {
        "buy" => "bullish",
        "sell" => "bearish",
        _ => "neutral",
    }
    .to_string();

    let should_avoid = action == "avoid" || news_score <= -50.0;
    let should_boost = !should_avoid && confidence >= 70.0 && news_score >= 50.0;

    Some(SentimentAdvisory {
        sentiment,
        news_score,
        should_boost,
        should_avoid,
        warnings,
    })
}
