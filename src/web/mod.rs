//! Authenticated Steam web session.
//!
//! A [`WebHandler`] owns one logged-in cookie session spanning the
//! community, store, and help hosts. The handshake installs the session;
//! the executor keeps every subsequent request inside the retry budget and
//! the process-wide limiters; expiry is detected and repaired in place; the
//! [`apikey`] and [`confirmations`] modules are the two scraped surfaces
//! built on top.

mod browser;
mod executor;
mod handshake;
mod session;

pub mod apikey;
pub mod confirmations;

pub use apikey::{ApiKeyAccess, ApiKeyState};
pub use confirmations::{Confirmation, ConfirmationKind};
pub use executor::SessionField;
pub use handshake::Universe;

use anyhow::Result;
use async_trait::async_trait;
use secrecy::SecretString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::time::Instant;
use url::Url;

use crate::globals::Globals;
use browser::Browser;

/// The live Steam connection a session rides on.
///
/// Session renewal needs a fresh single-use web-auth nonce, and only the
/// protocol connection can mint one. The connection also knows whether the
/// account is limited, which decides API-key eligibility up front.
#[async_trait]
pub trait SessionHost: Send + Sync {
    /// Request a fresh single-use web-auth nonce.
    async fn request_web_nonce(&self) -> Option<String>;

    /// Whether Steam considers the account limited.
    fn is_account_limited(&self) -> bool;
}

#[derive(Clone, Copy)]
pub(crate) struct Identity {
    pub(crate) steam_id: u64,
    pub(crate) universe: Universe,
}

pub(crate) struct SessionTimes {
    pub(crate) last_check: Instant,
    pub(crate) last_refresh: Instant,
}

impl SessionTimes {
    /// Whether the most recent completed check saw the session signed in.
    /// A check that observes expiry advances `last_check` alone, so equality
    /// of the two stamps encodes health.
    pub(crate) fn last_seen_healthy(&self) -> bool {
        self.last_check == self.last_refresh
    }
}

/// One authenticated web session.
pub struct WebHandler {
    pub(crate) globals: Arc<Globals>,
    pub(crate) host: Arc<dyn SessionHost>,
    pub(crate) browser: Browser,
    /// True between a successful handshake and the next observed expiry or
    /// disconnect.
    pub(crate) initialized: AtomicBool,
    pub(crate) identity: Mutex<Option<Identity>>,
    pub(crate) vanity_url: RwLock<Option<String>>,
    /// Family-view PIN from the first `init`, kept for renewals.
    pub(crate) parental_code: Mutex<Option<SecretString>>,
    /// Serializes expiry checks and refreshes.
    pub(crate) session_gate: tokio::sync::Mutex<()>,
    /// Invariant: `last_check >= last_refresh`. Equal means the last check
    /// saw the session healthy.
    pub(crate) times: Mutex<SessionTimes>,
    pub(crate) api_key: tokio::sync::Mutex<Option<ApiKeyAccess>>,
}

impl WebHandler {
    /// Build a handler around the shared process context.
    ///
    /// Construction is purely local: no network traffic, no API-key probing.
    /// The session only becomes usable after [`WebHandler::init`].
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        globals: Arc<Globals>,
        host: Arc<dyn SessionHost>,
        proxy: Option<reqwest::Proxy>,
    ) -> Result<Self> {
        let browser = Browser::new(proxy, globals.config().connection_timeout)?;
        let now = Instant::now();

        Ok(Self {
            globals,
            host,
            browser,
            initialized: AtomicBool::new(false),
            identity: Mutex::new(None),
            vanity_url: RwLock::new(None),
            parental_code: Mutex::new(None),
            session_gate: tokio::sync::Mutex::new(()),
            times: Mutex::new(SessionTimes {
                last_check: now,
                last_refresh: now,
            }),
            api_key: tokio::sync::Mutex::new(None),
        })
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn steam_id(&self) -> Option<u64> {
        self.identity().map(|identity| identity.steam_id)
    }

    /// The protocol connection dropped: the cookie session may outlive it,
    /// but nothing can be renewed until the next handshake, so the handler
    /// goes back to uninitialized and forgets the cached API key.
    pub async fn on_disconnected(&self) {
        self.initialized.store(false, Ordering::Relaxed);
        *self.api_key.lock().await = None;
    }

    /// The account's vanity URL changed (or was cleared).
    pub fn on_vanity_url_changed(&self, vanity_url: Option<String>) {
        if let Ok(mut slot) = self.vanity_url.write() {
            *slot = vanity_url.filter(|value| !value.is_empty());
        }
    }

    pub(crate) fn identity(&self) -> Option<Identity> {
        self.identity.lock().ok().and_then(|slot| *slot)
    }

    /// The session's own profile path: `/id/<vanity>` when a vanity URL is
    /// set, `/profiles/<steamid>` otherwise.
    pub(crate) fn profile_path(&self) -> Option<String> {
        if let Ok(vanity) = self.vanity_url.read() {
            if let Some(vanity) = vanity.as_deref() {
                return Some(format!("/id/{vanity}"));
            }
        }
        self.steam_id().map(|steam_id| format!("/profiles/{steam_id}"))
    }

    /// Steam sometimes terminates an unrelated request chain at the caller's
    /// own profile. Such responses carry no payload and must be retried.
    pub(crate) fn is_self_profile(&self, url: &Url) -> bool {
        self.profile_path()
            .is_some_and(|path| url.path() == path)
    }
}
