//! Process-wide context shared by every web handler.
//!
//! Steam rate-limits by origin, not by session, so the per-host limiter
//! pairs, the confirmations gate, and the server-clock delta all have to be
//! process scope. They live in one explicitly constructed [`Globals`] that
//! handlers receive at construction; there is no hidden lazy state.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use url::Url;

use crate::time::TimeOracle;

/// Reserved page size for inventory pagination.
pub const MAX_ITEMS_PER_INVENTORY_REQUEST: u16 = 5000;

/// The Steam hosts a session spans.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub community: Url,
    pub store: Url,
    pub help: Url,
    pub api: Url,
}

#[allow(clippy::expect_used)]
impl Default for Endpoints {
    fn default() -> Self {
        Self {
            community: Url::parse("https://steamcommunity.com").expect("literal URL"),
            store: Url::parse("https://store.steampowered.com").expect("literal URL"),
            help: Url::parse("https://help.steampowered.com").expect("literal URL"),
            api: Url::parse("https://api.steampowered.com").expect("literal URL"),
        }
    }
}

/// Logical request target, resolved through [`Endpoints`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Community,
    Store,
    Help,
    WebApi,
}

impl Endpoints {
    #[must_use]
    pub fn url(&self, service: Service) -> &Url {
        match service {
            Service::Community => &self.community,
            Service::Store => &self.store,
            Service::Help => &self.help,
            Service::WebApi => &self.api,
        }
    }
}

/// Tuning knobs. Defaults match the official mobile client's behavior.
#[derive(Debug, Clone)]
pub struct Config {
    pub endpoints: Endpoints,
    /// Minimum start-to-start spacing between requests to one host.
    /// Zero disables the limiter entirely.
    pub web_limiter_delay: Duration,
    /// Minimum spacing between confirmation listings, process-wide.
    pub confirmations_delay: Duration,
    /// In-flight request cap per host.
    pub max_connections: usize,
    /// Total attempt budget for session-aware operations.
    pub max_tries: u8,
    /// How long an operation waits for the session to become initialized.
    pub connection_timeout: Duration,
    /// How long a fetched server-clock delta stays trusted.
    pub time_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            web_limiter_delay: Duration::from_millis(300),
            confirmations_delay: Duration::from_secs(10),
            max_connections: 10,
            max_tries: 5,
            connection_timeout: Duration::from_secs(90),
            time_ttl: Duration::from_secs(86_400),
        }
    }
}

struct LimiterPair {
    rate: Arc<Semaphore>,
    connections: Arc<Semaphore>,
}

impl LimiterPair {
    fn new(max_connections: usize) -> Self {
        Self {
            rate: Arc::new(Semaphore::new(1)),
            connections: Arc::new(Semaphore::new(max_connections.max(1))),
        }
    }
}

/// Shared state for all handlers in the process.
pub struct Globals {
    config: Config,
    time: TimeOracle,
    buckets: HashMap<String, LimiterPair>,
    default_bucket: LimiterPair,
    confirmations: Arc<Semaphore>,
}

impl Globals {
    #[must_use]
    pub fn new(config: Config) -> Arc<Self> {
        let mut buckets = HashMap::new();
        for service in [
            Service::Community,
            Service::Store,
            Service::Help,
            Service::WebApi,
        ] {
            if let Some(host) = config.endpoints.url(service).host_str() {
                buckets
                    .entry(host.to_string())
                    .or_insert_with(|| LimiterPair::new(config.max_connections));
            }
        }

        let time = TimeOracle::new(config.endpoints.api.clone(), config.time_ttl);
        let default_bucket = LimiterPair::new(config.max_connections);

        Arc::new(Self {
            config,
            time,
            buckets,
            default_bucket,
            confirmations: Arc::new(Semaphore::new(1)),
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn time(&self) -> &TimeOracle {
        &self.time
    }

    /// Run `op` under the host's limiter pair.
    ///
    /// The connection permit is held for the whole call; the rate permit is
    /// handed to a detached timer so the next request to the same host can
    /// start as soon as the spacing elapses, even while `op` is still
    /// running. Hosts without a registered pair share the default bucket.
    pub async fn limit<T>(&self, host: &str, op: impl Future<Output = T>) -> T {
        if self.config.web_limiter_delay.is_zero() {
            return op.await;
        }

        let pair = self.buckets.get(host).unwrap_or(&self.default_bucket);

        let _connection = pair.connections.acquire().await.ok();
        if let Ok(permit) = pair.rate.clone().acquire_owned().await {
            let delay = self.config.web_limiter_delay;
            tokio::spawn(async move {
                sleep(delay).await;
                drop(permit);
            });
        }

        op.await
    }

    /// Acquire the process-wide confirmations gate.
    ///
    /// At most one confirmation listing starts per [`Config::confirmations_delay`];
    /// the permit is released by a detached timer.
    pub async fn confirmations_gate(&self) {
        if self.config.confirmations_delay.is_zero() {
            return;
        }

        if let Ok(permit) = self.confirmations.clone().acquire_owned().await {
            let delay = self.config.confirmations_delay;
            tokio::spawn(async move {
                sleep(delay).await;
                drop(permit);
            });
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::time::Instant;

    fn test_config(limiter_delay: Duration, max_connections: usize) -> Config {
        Config {
            web_limiter_delay: limiter_delay,
            max_connections,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_limit_spaces_request_starts() {
        let delay = Duration::from_millis(50);
        let globals = Globals::new(test_config(delay, 10));
        let origin = Instant::now();
        let starts = Arc::new(Mutex::new(Vec::new()));

        let mut tasks = Vec::new();
        for _ in 0..3 {
            let globals = Arc::clone(&globals);
            let starts = Arc::clone(&starts);
            tasks.push(tokio::spawn(async move {
                globals
                    .limit("steamcommunity.com", async {
                        starts.lock().unwrap().push(origin.elapsed());
                    })
                    .await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut starts = starts.lock().unwrap().clone();
        starts.sort();
        assert_eq!(starts.len(), 3);
        // Scheduler jitter tolerance: starts must be no closer than ~delay.
        assert!(starts[1] - starts[0] >= delay - Duration::from_millis(10));
        assert!(starts[2] - starts[1] >= delay - Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_limit_caps_in_flight_connections() {
        let globals = Globals::new(test_config(Duration::from_millis(1), 1));
        let origin = Instant::now();

        let first = {
            let globals = Arc::clone(&globals);
            tokio::spawn(async move {
                globals
                    .limit("steamcommunity.com", async {
                        sleep(Duration::from_millis(60)).await;
                    })
                    .await;
            })
        };
        // Let the first task take the only connection permit.
        sleep(Duration::from_millis(10)).await;
        globals.limit("steamcommunity.com", async {}).await;
        assert!(origin.elapsed() >= Duration::from_millis(55));
        first.await.unwrap();
    }

    #[tokio::test]
    async fn test_limit_bypassed_when_delay_is_zero() {
        let globals = Globals::new(test_config(Duration::ZERO, 1));
        let value = globals.limit("anything.example", async { 7 }).await;
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_unknown_host_uses_default_bucket() {
        let delay = Duration::from_millis(40);
        let globals = Globals::new(test_config(delay, 10));
        let origin = Instant::now();
        globals.limit("other.example", async {}).await;
        globals.limit("other.example", async {}).await;
        assert!(origin.elapsed() >= delay - Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_confirmations_gate_spaces_listings() {
        let config = Config {
            confirmations_delay: Duration::from_millis(50),
            ..Config::default()
        };
        let globals = Globals::new(config);
        let origin = Instant::now();
        globals.confirmations_gate().await;
        globals.confirmations_gate().await;
        assert!(origin.elapsed() >= Duration::from_millis(40));
    }
}
