//! Shared wiremock scaffolding for the session tests.

// Each integration test binary compiles this module separately and uses a
// different subset of it.
#![allow(dead_code)]

use async_trait::async_trait;
use mobileguard::{Authenticator, Config, Endpoints, Globals, SessionHost, Universe, WebHandler};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const STEAM_ID: u64 = 76_561_198_000_000_001;

/// A stand-in for the live Steam connection that hands out nonces on demand
/// and counts how often it was asked.
pub struct CountingHost {
    nonce_requests: AtomicUsize,
    limited: bool,
}

impl CountingHost {
    pub fn new(limited: bool) -> Self {
        Self {
            nonce_requests: AtomicUsize::new(0),
            limited,
        }
    }

    pub fn nonce_requests(&self) -> usize {
        self.nonce_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionHost for CountingHost {
    async fn request_web_nonce(&self) -> Option<String> {
        self.nonce_requests.fetch_add(1, Ordering::SeqCst);
        Some("renewed-nonce".to_string())
    }

    fn is_account_limited(&self) -> bool {
        self.limited
    }
}

/// The mock servers shut down on drop, so the environment keeps them alive
/// for the duration of a test even when a test never inspects them.
pub struct TestEnv {
    pub community: MockServer,
    pub store: MockServer,
    pub help: MockServer,
    pub api: MockServer,
    pub host: Arc<CountingHost>,
    pub handler: WebHandler,
}

/// Spin up one mock server per Steam host and a handler wired to them.
///
/// Mounts the always-needed baseline: a healthy session probe, a working
/// `AuthenticateUser`, and a `QueryTime` pinned to a fixed server time.
pub async fn test_env() -> TestEnv {
    build_env(false, 5).await
}

pub async fn test_env_limited() -> TestEnv {
    build_env(true, 5).await
}

pub async fn test_env_max_tries(max_tries: u8) -> TestEnv {
    build_env(false, max_tries).await
}

async fn build_env(limited: bool, max_tries: u8) -> TestEnv {
    let community = MockServer::start().await;
    let store = MockServer::start().await;
    let help = MockServer::start().await;
    let api = MockServer::start().await;

    Mock::given(method("HEAD"))
        .and(path("/account"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&store)
        .await;

    Mock::given(method("POST"))
        .and(path("/ISteamUserAuth/AuthenticateUser/v1/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "authenticateuser": {
                "token": "aa11%7C%7Ctoken",
                "tokensecure": "bb22%7C%7Csecure"
            }
        })))
        .mount(&api)
        .await;

    Mock::given(method("POST"))
        .and(path("/ITwoFactorService/QueryTime/v1/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "response": { "server_time": "1766000000" }
        })))
        .mount(&api)
        .await;

    let endpoints = Endpoints {
        community: parse_uri(&community),
        store: parse_uri(&store),
        help: parse_uri(&help),
        api: parse_uri(&api),
    };
    let config = Config {
        endpoints,
        web_limiter_delay: Duration::from_millis(1),
        confirmations_delay: Duration::ZERO,
        connection_timeout: Duration::from_secs(2),
        max_tries,
        ..Config::default()
    };

    let globals = Globals::new(config);
    let host = Arc::new(CountingHost::new(limited));
    #[allow(clippy::unwrap_used)]
    let handler = WebHandler::new(globals, Arc::clone(&host) as Arc<dyn SessionHost>, None).unwrap();

    TestEnv {
        community,
        store,
        help,
        api,
        host,
        handler,
    }
}

#[allow(clippy::unwrap_used)]
fn parse_uri(server: &MockServer) -> Url {
    Url::parse(&server.uri()).unwrap()
}

/// Run the handshake against the mocked hosts.
pub async fn initialize(env: &TestEnv) {
    assert!(
        env.handler
            .init(STEAM_ID, Universe::Public, "initial-nonce", None)
            .await
    );
    assert!(env.handler.is_initialized());
}

pub fn authenticator() -> Authenticator {
    Authenticator::new(
        "YWFhYWFhYWFhYWFhYWFhYWFhYWE=".to_string(),
        "AAAAAAAAAAAAAAAAAAAAAAAAAAA=".to_string(),
        "android:5A6B7C8D-DEAD-BEEF-1234-567890ABCDEF".to_string(),
    )
}
