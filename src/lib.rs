//! # mobileguard
//!
//! `mobileguard` impersonates the official Steam mobile app well enough to
//! generate guard login codes and to approve or cancel the pending mobile
//! confirmations (trades, market listings, account recovery, phone changes)
//! that Steam gates behind the authenticator.
//!
//! ## Guard engine
//!
//! The [`guard`] module is pure: five-character login codes derived from the
//! `shared_secret` over 30-second windows, and per-request confirmation HMACs
//! derived from the `identity_secret`. Both are deterministic functions of the
//! secrets and the corrected Steam server time kept by [`time::TimeOracle`].
//!
//! ## Web session
//!
//! The [`web`] module owns the logged-in cookie session. [`web::WebHandler`]
//! establishes it with an RSA+AES handshake against `AuthenticateUser`,
//! installs the session cookies on the community, store, and help hosts, and
//! keeps every subsequent request honest: preemptive and reactive expiry
//! detection, serialized refresh through the live Steam connection, per-host
//! rate limiting with connection caps, and a bounded retry budget.
//!
//! Session-aware operations return `Option`/`bool` rather than rich errors.
//! Steam's HTML surfaces cannot reliably distinguish failure modes, so the
//! handler logs the underlying cause and hands callers a plain absence.
//!
//! Process-wide pieces (the server-time delta, the per-host limiters, the
//! confirmations gate) live in an explicitly constructed [`globals::Globals`]
//! shared by all handlers; nothing is lazily initialized behind the scenes.

pub mod globals;
pub mod guard;
pub mod time;
pub mod web;

pub use globals::{Config, Endpoints, Globals, Service};
pub use guard::Authenticator;
pub use web::{
    ApiKeyAccess, Confirmation, ConfirmationKind, SessionField, SessionHost, Universe, WebHandler,
};

/// User agent presented on every outbound request.
pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
