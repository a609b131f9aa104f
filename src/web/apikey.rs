//! Web API key lifecycle.
//!
//! The key only exists as HTML on `/dev/apikey`, so discovery is scraping:
//! classify the page, register if the account never had a key, cache the
//! outcome. Parse mismatches classify as errors, never as an empty result.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use tracing::{error, warn};

use super::executor::SessionField;
use super::WebHandler;
use crate::globals::Service;

/// What the `/dev/apikey` page said.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiKeyState {
    Registered(String),
    NotRegisteredYet,
    /// The account has to verify its email first. Transient, not a denial.
    EmailUnverified,
    AccessDenied,
    Timeout,
    Error,
}

/// Resolved access to the account's web API key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiKeyAccess {
    Granted(String),
    /// Steam will not hand this account a key: limited account or denied.
    Denied,
}

pub(crate) fn classify_api_key_page(html: &str) -> ApiKeyState {
    let document = Html::parse_document(html);

    let Ok(title_selector) = Selector::parse("#mainContents h2") else {
        return ApiKeyState::Error;
    };
    let Some(title) = document.select(&title_selector).next() else {
        return ApiKeyState::Timeout;
    };
    let title_text = text_of(&title);

    if title_text.contains("Access Denied") {
        return ApiKeyState::AccessDenied;
    }
    if title_text.contains("Validated email address required") {
        return ApiKeyState::EmailUnverified;
    }

    let Ok(body_selector) = Selector::parse("#bodyContents_ex p") else {
        return ApiKeyState::Error;
    };
    let Some(paragraph) = document.select(&body_selector).next() else {
        return ApiKeyState::Error;
    };
    let body_text = text_of(&paragraph);

    if body_text.contains("Registering for a Steam Web API Key") {
        return ApiKeyState::NotRegisteredYet;
    }
    if let Some(key) = extract_key(&body_text) {
        return ApiKeyState::Registered(key);
    }

    ApiKeyState::Error
}

fn text_of(element: &ElementRef<'_>) -> String {
    element.text().collect()
}

fn extract_key(text: &str) -> Option<String> {
    let pattern = Regex::new(r"Key: ([0-9A-Fa-f]{32})\b").ok()?;
    pattern
        .captures(text)
        .map(|captures| captures[1].to_string())
}

impl WebHandler {
    /// Resolve, and cache, the account's web API key.
    ///
    /// Resolution is lazy: nothing is fetched until the first caller asks.
    /// `None` reports a transient failure worth retrying later;
    /// [`ApiKeyAccess::Denied`] is cached and final for this session.
    pub async fn api_key(&self) -> Option<ApiKeyAccess> {
        let mut cache = self.api_key.lock().await;
        if let Some(resolved) = cache.as_ref() {
            return Some(resolved.clone());
        }

        if self.host.is_account_limited() {
            *cache = Some(ApiKeyAccess::Denied);
            return cache.clone();
        }

        let resolved = match self.discover_api_key_state().await {
            ApiKeyState::Registered(key) => ApiKeyAccess::Granted(key),
            ApiKeyState::AccessDenied => ApiKeyAccess::Denied,
            ApiKeyState::EmailUnverified => {
                warn!("API key unavailable until the account's email is verified");
                return None;
            }
            ApiKeyState::Timeout => return None,
            ApiKeyState::Error => {
                error!("unrecognized API key page layout");
                return None;
            }
            ApiKeyState::NotRegisteredYet => {
                if !self.register_api_key().await {
                    return None;
                }
                match self.discover_api_key_state().await {
                    ApiKeyState::Registered(key) => ApiKeyAccess::Granted(key),
                    ApiKeyState::Timeout => return None,
                    other => {
                        error!("API key registration did not take effect: {other:?}");
                        return None;
                    }
                }
            }
        };

        *cache = Some(resolved.clone());
        Some(resolved)
    }

    async fn discover_api_key_state(&self) -> ApiKeyState {
        match self
            .get_html(Service::Community, "/dev/apikey?l=english", true)
            .await
        {
            Some(html) => classify_api_key_page(&html),
            None => ApiKeyState::Timeout,
        }
    }

    async fn register_api_key(&self) -> bool {
        let mut form = HashMap::new();
        form.insert("agreeToTerms".to_string(), "agreed".to_string());
        form.insert(
            "domain".to_string(),
            format!("generated.by.{}.localhost", env!("CARGO_PKG_NAME")),
        );
        form.insert("Submit".to_string(), "Register".to_string());

        self.post_void(
            Service::Community,
            "/dev/registerkey",
            form,
            SessionField::Lower,
            true,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(title: &str, body: &str) -> String {
        format!(
            "<html><body><div id=\"mainContents\"><h2>{title}</h2></div>\
             <div id=\"bodyContents_ex\"><p>{body}</p></div></body></html>"
        )
    }

    #[test]
    fn test_classifies_registered_key() {
        let html = page(
            "Steam Web API Key",
            "Key: 0123456789ABCDEF0123456789ABCDEF",
        );
        assert_eq!(
            classify_api_key_page(&html),
            ApiKeyState::Registered("0123456789ABCDEF0123456789ABCDEF".to_string())
        );
    }

    #[test]
    fn test_classifies_not_registered() {
        let html = page(
            "Steam Web API Key",
            "Registering for a Steam Web API Key grants access.",
        );
        assert_eq!(classify_api_key_page(&html), ApiKeyState::NotRegisteredYet);
    }

    #[test]
    fn test_classifies_access_denied() {
        let html = page("Access Denied", "");
        assert_eq!(classify_api_key_page(&html), ApiKeyState::AccessDenied);
    }

    #[test]
    fn test_classifies_email_unverified_as_transient() {
        let html = page("Validated email address required", "");
        assert_eq!(classify_api_key_page(&html), ApiKeyState::EmailUnverified);
    }

    #[test]
    fn test_classifies_missing_title_as_timeout() {
        assert_eq!(
            classify_api_key_page("<html><body>maintenance</body></html>"),
            ApiKeyState::Timeout
        );
    }

    #[test]
    fn test_classifies_malformed_key_as_error() {
        let html = page("Steam Web API Key", "Key: tooshort");
        assert_eq!(classify_api_key_page(&html), ApiKeyState::Error);

        let long = page(
            "Steam Web API Key",
            "Key: 0123456789ABCDEF0123456789ABCDEF00",
        );
        assert_eq!(classify_api_key_page(&long), ApiKeyState::Error);
    }
}
