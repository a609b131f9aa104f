//! Session expiry detection and refresh.
//!
//! Both entry points run under the session gate and deduplicate through the
//! check/refresh timestamps: a caller whose entry instant is not newer than
//! the last completed check consumes that check's verdict instead of issuing
//! another probe. Equal timestamps mean the last check saw the session
//! healthy; a strictly newer check means it saw expiry.

use std::sync::atomic::Ordering;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

use super::WebHandler;

/// A terminal redirect that means the cookie session is signed out.
pub(crate) fn is_session_expired_url(url: &Url) -> bool {
    url.path().starts_with("/login") || url.host_str() == Some("lostauth")
}

impl WebHandler {
    /// Probe whether the cookie session is still signed in.
    ///
    /// Issues a HEAD against the store account page, which is light, stable,
    /// and redirects to the login flow when unauthenticated. Returns `None`
    /// only when the probe itself failed at the transport level.
    pub async fn is_session_expired(&self) -> Option<bool> {
        let triggered_at = Instant::now();
        let _gate = self.session_gate.lock().await;

        if let Ok(times) = self.times.lock() {
            if triggered_at <= times.last_check {
                return Some(!times.last_seen_healthy());
            }
        }

        let url = self
            .globals
            .config()
            .endpoints
            .store
            .join("/account")
            .ok()?;
        let host = url.host_str().unwrap_or_default().to_string();
        let final_url = self.globals.limit(&host, self.browser.head(url)).await;

        let now = Instant::now();
        let mut times = self.times.lock().ok()?;
        times.last_check = now;

        match final_url {
            None => None,
            Some(final_url) if is_session_expired_url(&final_url) => {
                debug!("session is expired, probe landed on {final_url}");
                self.initialized.store(false, Ordering::Relaxed);
                Some(true)
            }
            Some(_) => {
                times.last_refresh = now;
                Some(false)
            }
        }
    }

    /// Re-establish the session through the live connection.
    ///
    /// The winning caller marks the handler uninitialized, asks the host for
    /// a fresh nonce, and replays the handshake with the identity cached from
    /// the first `init`. Deduplicated callers report success when the last
    /// completed check saw the session healthy.
    pub async fn refresh_session(&self) -> bool {
        let triggered_at = Instant::now();
        let _gate = self.session_gate.lock().await;

        if let Ok(times) = self.times.lock() {
            if triggered_at <= times.last_check {
                return times.last_seen_healthy();
            }
        }

        self.initialized.store(false, Ordering::Relaxed);

        // On success the handshake's terminal write already stamped
        // last_check == last_refresh.
        let renewed = self.renew().await;
        if !renewed {
            warn!("Failed to refresh session");
            if let Ok(mut times) = self.times.lock() {
                times.last_check = Instant::now();
            }
        }
        renewed
    }

    async fn renew(&self) -> bool {
        let Some(identity) = self.identity() else {
            warn!("cannot refresh a session that was never initialized");
            return false;
        };

        let Some(nonce) = self.host.request_web_nonce().await else {
            warn!("host did not produce a web nonce");
            return false;
        };

        let parental_code = self.cached_parental_code();
        match self
            .perform_handshake(identity, &nonce, parental_code.as_deref())
            .await
        {
            Ok(()) => true,
            Err(err) => {
                warn!("Session renewal handshake failed: {err}");
                false
            }
        }
    }
}
