//! Corrected Steam server clock.
//!
//! Guard codes and confirmation signatures are only valid against Steam's
//! idea of "now", which can drift from the local clock. The oracle keeps a
//! process-wide delta refreshed from `ITwoFactorService/QueryTime` at most
//! once per TTL; between refreshes every caller gets `local + delta` without
//! touching the network.

use anyhow::{anyhow, Result};
use reqwest::Client;
use serde_json::Value;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info_span, warn, Instrument};
use url::Url;

/// Shared server-clock state. One instance serves every handler in the
/// process; the internal mutex guarantees a single in-flight refresh.
pub struct TimeOracle {
    api: Url,
    ttl: Duration,
    state: Mutex<ClockState>,
}

#[derive(Default)]
struct ClockState {
    delta: Option<i64>,
    checked_at: Option<Instant>,
}

impl TimeOracle {
    #[must_use]
    pub fn new(api: Url, ttl: Duration) -> Self {
        Self {
            api,
            ttl,
            state: Mutex::new(ClockState::default()),
        }
    }

    /// Current Steam time in Unix seconds.
    ///
    /// Refreshes the delta when it is missing or older than the TTL. A failed
    /// refresh leaves the stored delta untouched and falls back to the raw
    /// local clock for this call only.
    pub async fn steam_time(&self, client: &Client) -> u32 {
        let mut state = self.state.lock().await;

        if let (Some(delta), Some(checked_at)) = (state.delta, state.checked_at) {
            if checked_at.elapsed() < self.ttl {
                return shifted(unix_now(), delta);
            }
        }

        match self.query_time(client).await {
            Ok(server_time) => {
                let now = unix_now();
                let delta = i64::try_from(server_time).unwrap_or_default()
                    - i64::try_from(now).unwrap_or_default();
                state.delta = Some(delta);
                state.checked_at = Some(Instant::now());
                debug!(delta, "Steam clock delta refreshed");
                shifted(now, delta)
            }
            Err(err) => {
                warn!("Failed to query Steam server time: {err}");
                shifted(unix_now(), 0)
            }
        }
    }

    async fn query_time(&self, client: &Client) -> Result<u64> {
        let url = self.api.join("/ITwoFactorService/QueryTime/v1/")?;

        let span = info_span!(
            "steam.query_time",
            http.method = "POST",
            url = %url
        );
        let response = client.post(url.clone()).send().instrument(span).await?;

        if !response.status().is_success() {
            return Err(anyhow!("{} - {}", url, response.status()));
        }

        let json: Value = response.json().await?;
        let server_time = json
            .get("response")
            .and_then(|v| v.get("server_time"))
            .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .ok_or_else(|| anyhow!("Error parsing JSON response: no server_time found"))?;

        if server_time == 0 {
            return Err(anyhow!("server reported a zero time"));
        }

        Ok(server_time)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

fn shifted(now: u64, delta: i64) -> u32 {
    let stamped = i64::try_from(now).unwrap_or_default().saturating_add(delta);
    u32::try_from(stamped).unwrap_or(u32::MAX)
}
